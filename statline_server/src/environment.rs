use crate::process::{KillButton, ProcessInfo, ProcessRegistry};
use crate::store::{AggregateRecord, StatusSnapshot};
use chrono::{DateTime, DurationRound, Utc};
use statline_core::{
    fold_partials, ByType, MetricType, Partial, Result, ServerConfig, StatlineError, Status,
    StatusEntry,
};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

type MetricKey = (MetricType, String);

/// A partial held in the retention window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    pub partial: Partial,
    pub received_at: Instant,
    /// Not yet part of a committed aggregate. Dirty entries are never slid out.
    pub dirty: bool,
}

/// What a commit has to persist, computed under the tenant lock.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    pub snapshot: StatusSnapshot,
    pub records: Vec<AggregateRecord>,
}

/// Per-tenant aggregation state: the live status, the retention window of
/// partials behind it, and the tenant's registered processes.
pub struct Environment {
    tenant: String,
    retention: Duration,
    status: BTreeMap<MetricKey, StatusEntry>,
    windows: BTreeMap<MetricKey, VecDeque<WindowEntry>>,
    dirty: bool,
    last_activity: DateTime<Utc>,
    processes: ProcessRegistry,
}

impl Environment {
    pub fn new(tenant: &str, config: &ServerConfig, initial: Option<Status>) -> Result<Self> {
        if tenant.trim().is_empty() {
            return Err(StatlineError::InvalidTenant(tenant.to_string()));
        }

        let status = initial
            .map(|status| {
                status
                    .into_items()
                    .map(|(typ, entry)| ((typ, entry.path.clone()), entry))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            tenant: tenant.to_string(),
            retention: config.retention_period,
            status,
            windows: BTreeMap::new(),
            dirty: false,
            last_activity: Utc::now(),
            processes: ProcessRegistry::new(config.liveness_timeout),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Ingests one client push.
    pub fn agg(&mut self, batch: ByType<Partial>) {
        self.agg_at(batch, Instant::now());
    }

    pub fn agg_at(&mut self, batch: ByType<Partial>, now: Instant) {
        self.slide_at(now);

        let mut fresh: BTreeMap<MetricKey, i64> = BTreeMap::new();
        for (typ, mut partial) in batch.into_items() {
            partial.typ = typ;
            let key = (typ, partial.path.clone());
            let fresh_sum = fresh.entry(key.clone()).or_insert(0);
            *fresh_sum = fresh_sum.saturating_add(partial.sum);
            self.windows.entry(key).or_default().push_back(WindowEntry {
                partial,
                received_at: now,
                dirty: true,
            });
        }

        for (key, fresh_sum) in &fresh {
            self.merge(key, *fresh_sum);
        }

        if !fresh.is_empty() {
            self.dirty = true;
        }
        self.last_activity = Utc::now();
        debug!("[{}] ingested {} path(s)", self.tenant, fresh.len());
    }

    /// Drops clean partials older than the retention period from the front
    /// of each window. Idempotent.
    pub fn slide(&mut self) {
        self.slide_at(Instant::now());
    }

    pub fn slide_at(&mut self, now: Instant) {
        let retention = self.retention;
        for window in self.windows.values_mut() {
            while let Some(front) = window.front() {
                if front.dirty || now.saturating_duration_since(front.received_at) < retention {
                    break;
                }
                window.pop_front();
            }
        }
        self.windows.retain(|_, window| !window.is_empty());
    }

    fn merge(&mut self, key: &MetricKey, fresh_sum: i64) {
        let Some(window) = self.windows.get(key) else {
            return;
        };
        let folded = fold_partials(window.iter().map(|entry| &entry.partial));
        let prior = self.status.get(key);

        let (typ, path) = key;
        let emphasis = folded
            .as_ref()
            .map(|f| f.emphasis)
            .or_else(|| prior.map(|p| p.emphasis))
            .unwrap_or(false);

        let mut entry = StatusEntry {
            typ: *typ,
            path: path.clone(),
            emphasis,
            sum: None,
            last: None,
            avg: None,
            max: None,
            min: None,
        };

        match typ {
            MetricType::Counter => {
                let seconds = self.retention.as_secs_f64();
                let window_sum = folded.as_ref().map(|f| f.sum).unwrap_or(0);
                let prior_sum = prior.and_then(|p| p.sum).unwrap_or(0);
                entry.sum = Some(prior_sum.saturating_add(fresh_sum));
                entry.avg = Some(round2(window_sum as f64 / seconds));
            }
            MetricType::Gauge => {
                entry.last = folded
                    .as_ref()
                    .map(|f| f.last)
                    .or_else(|| prior.and_then(|p| p.last));
                entry.avg = folded.as_ref().and_then(|f| f.average()).map(round2);
                entry.max = folded.as_ref().map(|f| f.max);
                entry.min = folded.as_ref().map(|f| f.min);
            }
            MetricType::Timer => {
                entry.avg = folded.as_ref().and_then(|f| f.average()).map(round2);
                entry.max = folded.as_ref().map(|f| f.max);
                entry.min = folded.as_ref().map(|f| f.min);
            }
        }

        self.status.insert(key.clone(), entry);
    }

    /// A copy of the live status, sorted by path within each type.
    pub fn current(&self) -> Status {
        let mut status = Status::new();
        for ((typ, _), entry) in &self.status {
            status.push(*typ, entry.clone());
        }
        status.sort_by_path();
        status
    }

    /// Number of distinct (type, path) entries in the status.
    pub fn count(&self) -> usize {
        self.status.len()
    }

    pub fn window(&self, typ: MetricType, path: &str) -> Option<&VecDeque<WindowEntry>> {
        self.windows.get(&(typ, path.to_string()))
    }

    /// Prepares a commit, or `None` when nothing changed since the last one.
    ///
    /// Clears the dirty bit of every consumed partial and of the environment,
    /// so the work is handed over exactly once whatever happens to it next.
    pub fn take_commit(&mut self) -> Option<CommitBatch> {
        self.take_commit_at(Instant::now(), Utc::now())
    }

    pub fn take_commit_at(&mut self, now: Instant, wall: DateTime<Utc>) -> Option<CommitBatch> {
        if !self.dirty {
            return None;
        }

        self.slide_at(now);
        let bucket = minute_bucket(wall);

        let mut records = Vec::new();
        for ((typ, path), window) in self.windows.iter_mut() {
            let folded = fold_partials(
                window
                    .iter()
                    .filter(|entry| entry.dirty)
                    .map(|entry| &entry.partial),
            );
            for entry in window.iter_mut() {
                entry.dirty = false;
            }

            if let Some(folded) = folded {
                records.push(AggregateRecord {
                    tenant: self.tenant.clone(),
                    bucket,
                    typ: *typ,
                    path: path.clone(),
                    folded,
                });
            }
        }
        self.dirty = false;

        Some(CommitBatch {
            snapshot: StatusSnapshot {
                tenant: self.tenant.clone(),
                status: self.current(),
            },
            records,
        })
    }

    pub fn add_process(&mut self, name: &str, kill: KillButton) -> Uuid {
        self.processes.add_process(name, kill)
    }

    pub fn kill_process(&mut self, name: &str) -> Result<usize> {
        self.processes.kill_process(name)
    }

    pub fn sweep_processes(&mut self) -> usize {
        self.processes.sweep()
    }

    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.processes()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.processes
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn minute_bucket(wall: DateTime<Utc>) -> DateTime<Utc> {
    wall.duration_trunc(chrono::Duration::minutes(1))
        .unwrap_or(wall)
}
