use serde::{Deserialize, Serialize};
use std::fmt;

/// The three metric kinds a client can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricType {
    #[serde(rename = "c")]
    Counter,
    #[serde(rename = "g")]
    Gauge,
    #[serde(rename = "ms")]
    Timer,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Counter, MetricType::Gauge, MetricType::Timer];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "c",
            MetricType::Gauge => "g",
            MetricType::Timer => "ms",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "c" => Some(MetricType::Counter),
            "g" => Some(MetricType::Gauge),
            "ms" => Some(MetricType::Timer),
            _ => None,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection split by metric type, serialized as `{ c: [...], ms: [...], g: [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ByType<T> {
    #[serde(default)]
    pub c: Vec<T>,
    #[serde(default)]
    pub ms: Vec<T>,
    #[serde(default)]
    pub g: Vec<T>,
}

impl<T> Default for ByType<T> {
    fn default() -> Self {
        Self {
            c: Vec::new(),
            ms: Vec::new(),
            g: Vec::new(),
        }
    }
}

impl<T> ByType<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, typ: MetricType) -> &Vec<T> {
        match typ {
            MetricType::Counter => &self.c,
            MetricType::Gauge => &self.g,
            MetricType::Timer => &self.ms,
        }
    }

    pub fn get_mut(&mut self, typ: MetricType) -> &mut Vec<T> {
        match typ {
            MetricType::Counter => &mut self.c,
            MetricType::Gauge => &mut self.g,
            MetricType::Timer => &mut self.ms,
        }
    }

    pub fn push(&mut self, typ: MetricType, item: T) {
        self.get_mut(typ).push(item);
    }

    /// Iterates every item tagged with its type, counters first, then gauges, then timers.
    pub fn iter(&self) -> impl Iterator<Item = (MetricType, &T)> {
        MetricType::ALL
            .into_iter()
            .flat_map(move |typ| self.get(typ).iter().map(move |item| (typ, item)))
    }

    pub fn into_items(self) -> impl Iterator<Item = (MetricType, T)> {
        let Self { c, ms, g } = self;
        c.into_iter()
            .map(|item| (MetricType::Counter, item))
            .chain(g.into_iter().map(|item| (MetricType::Gauge, item)))
            .chain(ms.into_iter().map(|item| (MetricType::Timer, item)))
    }

    pub fn len(&self) -> usize {
        self.c.len() + self.ms.len() + self.g.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pre-aggregated summary of one flush period for one metric path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub typ: MetricType,
    #[serde(rename = "pth")]
    pub path: String,
    pub pct: f64,
    pub sum: i64,
    #[serde(rename = "cnt")]
    pub count: u64,
    pub max: i64,
    pub min: i64,
    #[serde(rename = "fst")]
    pub first: i64,
    #[serde(rename = "lst")]
    pub last: i64,
    #[serde(rename = "bot")]
    pub bottom: i64,
    pub top: i64,
    #[serde(rename = "emp", default)]
    pub emphasis: bool,
}

/// Body of `PUT /agg`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialBatch {
    pub prt: ByType<Partial>,
}

impl PartialBatch {
    pub fn new(prt: ByType<Partial>) -> Self {
        Self { prt }
    }
}

/// Live view of one metric. Fields that do not apply to a type stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub typ: MetricType,
    #[serde(rename = "pth")]
    pub path: String,
    #[serde(rename = "emp", default)]
    pub emphasis: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<i64>,
    #[serde(rename = "lst", default, skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
}

pub type Status = ByType<StatusEntry>;

impl Status {
    pub fn sort_by_path(&mut self) {
        for typ in MetricType::ALL {
            self.get_mut(typ).sort_by(|a, b| a.path.cmp(&b.path));
        }
    }

    pub fn find(&self, typ: MetricType, path: &str) -> Option<&StatusEntry> {
        self.get(typ).iter().find(|entry| entry.path == path)
    }
}
