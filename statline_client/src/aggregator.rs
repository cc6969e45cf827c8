use parking_lot::Mutex;
use statline_core::{approx_indices, parse_value, validate_path, ByType, MetricType, Partial};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::debug;

/// A single captured value. Lives only until the next flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub value: i64,
    pub at: Instant,
    pub emphasis: bool,
}

type Buckets = BTreeMap<(MetricType, String), Vec<Observation>>;

/// Buckets observations per (type, path) between flushes.
pub struct LocalAggregator {
    buckets: Mutex<Buckets>,
    accepting: AtomicBool,
    percentile: f64,
    debug: bool,
}

impl LocalAggregator {
    /// Creates an aggregator that accepts captures right away.
    pub fn new(percentile: f64) -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            accepting: AtomicBool::new(true),
            percentile,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn start(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        !self.accepting.load(Ordering::SeqCst)
    }

    /// Records `raw` (e.g. `"42c"`, `"120ms!"`) under `path`.
    ///
    /// Malformed input is dropped. Nothing is recorded while stopped.
    pub fn capture(&self, path: &str, raw: &str) {
        self.capture_at(path, raw, Instant::now());
    }

    pub(crate) fn capture_at(&self, path: &str, raw: &str, at: Instant) {
        if self.is_stopped() {
            return;
        }

        let parsed = validate_path(path).and_then(|_| parse_value(raw));
        let value = match parsed {
            Ok(value) => value,
            Err(e) => {
                if self.debug {
                    debug!("Dropping capture at '{}': {}", path, e);
                }
                return;
            }
        };

        self.buckets
            .lock()
            .entry((value.typ, path.to_string()))
            .or_default()
            .push(Observation {
                value: value.value,
                at,
                emphasis: value.emphasis,
            });
    }

    /// Number of observations waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    /// Swaps in empty buckets and summarizes what was captured since the last flush.
    pub fn flush(&self) -> ByType<Partial> {
        let buckets = std::mem::take(&mut *self.buckets.lock());

        let mut partials = ByType::new();
        for ((typ, path), observations) in buckets {
            if let Some(partial) = summarize(typ, path, observations, self.percentile) {
                partials.push(typ, partial);
            }
        }
        partials
    }
}

fn summarize(
    typ: MetricType,
    path: String,
    mut observations: Vec<Observation>,
    percentile: f64,
) -> Option<Partial> {
    observations.sort_by_key(|o| o.at);
    let head = *observations.first()?;

    let mut partial = Partial {
        typ,
        path,
        pct: percentile,
        sum: 0,
        count: 0,
        max: head.value,
        min: head.value,
        first: head.value,
        last: head.value,
        bottom: head.value,
        top: head.value,
        emphasis: false,
    };

    for observation in &observations {
        partial.sum = partial.sum.saturating_add(observation.value);
        partial.count += 1;
        partial.max = partial.max.max(observation.value);
        partial.min = partial.min.min(observation.value);
        partial.last = observation.value;
        partial.emphasis |= observation.emphasis;
    }

    observations.sort_by_key(|o| o.value);
    let (bottom, top) = approx_indices(observations.len(), percentile);
    partial.bottom = observations[bottom].value;
    partial.top = observations[top].value;

    Some(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_counter_flush() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.capture("api.ok", "42c");
        aggregator.capture("api.ok", "42c");

        let partials = aggregator.flush();
        assert_eq!(partials.c.len(), 1);
        assert_eq!(partials.c[0].path, "api.ok");
        assert_eq!(partials.c[0].sum, 84);
        assert_eq!(partials.c[0].count, 2);
        assert!(!partials.c[0].emphasis);
        assert!(partials.ms.is_empty());
        assert!(partials.g.is_empty());
    }

    #[test]
    fn test_flush_saturates_large_values() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.capture("big", "9223372036854775807c");
        aggregator.capture("big", "1c");

        let partials = aggregator.flush();
        assert_eq!(partials.c[0].sum, i64::MAX);
        assert_eq!(partials.c[0].count, 2);
        assert_eq!(partials.c[0].max, i64::MAX);
    }

    #[test]
    fn test_timer_emphasis() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.capture("api.latency", "10ms!");

        let partials = aggregator.flush();
        assert_eq!(partials.ms.len(), 1);
        assert_eq!(partials.ms[0].sum, 10);
        assert_eq!(partials.ms[0].count, 1);
        assert!(partials.ms[0].emphasis);
    }

    #[test]
    fn test_same_path_different_types_are_separate() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.capture("queue", "3g");
        aggregator.capture("queue", "1c");

        let partials = aggregator.flush();
        assert_eq!(partials.c.len(), 1);
        assert_eq!(partials.g.len(), 1);
        assert_eq!(partials.g[0].last, 3);
    }

    #[test]
    fn test_first_last_follow_timestamps() {
        let aggregator = LocalAggregator::new(0.1);
        let t0 = Instant::now();
        aggregator.capture_at("pool.size", "7g", t0 + Duration::from_millis(20));
        aggregator.capture_at("pool.size", "3g", t0);
        aggregator.capture_at("pool.size", "5g", t0 + Duration::from_millis(10));

        let partial = &aggregator.flush().g[0];
        assert_eq!(partial.first, 3);
        assert_eq!(partial.last, 7);
        assert_eq!(partial.min, 3);
        assert_eq!(partial.max, 7);
    }

    #[test]
    fn test_bottom_top_approximation() {
        let aggregator = LocalAggregator::new(0.1);
        for v in (1..=10).rev() {
            aggregator.capture("db.query", &format!("{}ms", v * 10));
        }

        let partial = &aggregator.flush().ms[0];
        // sorted [10..=100], bottom index ceil(1.0) = 1, top index round(9.0) = 9
        assert_eq!(partial.bottom, 20);
        assert_eq!(partial.top, 100);
        assert_eq!(partial.pct, 0.1);
    }

    #[test]
    fn test_invalid_input_dropped() {
        let aggregator = LocalAggregator::new(0.1).with_debug(true);
        aggregator.capture("bad path", "1c");
        aggregator.capture("api.ok", "1x");
        aggregator.capture("api.ok", "c");

        assert_eq!(aggregator.pending(), 0);
        assert!(aggregator.flush().is_empty());
    }

    #[test]
    fn test_stopped_aggregator_ignores_captures() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.stop();
        aggregator.stop();
        aggregator.capture("api.ok", "1c");
        assert_eq!(aggregator.pending(), 0);

        aggregator.start();
        aggregator.capture("api.ok", "1c");
        assert_eq!(aggregator.pending(), 1);
    }

    #[test]
    fn test_flush_clears_buckets() {
        let aggregator = LocalAggregator::new(0.1);
        aggregator.capture("api.ok", "1c");

        assert_eq!(aggregator.flush().len(), 1);
        assert!(aggregator.flush().is_empty());
    }

    proptest! {
        #[test]
        fn test_flush_sum_and_count(values in prop::collection::vec(-10_000i64..10_000, 1..200)) {
            let aggregator = LocalAggregator::new(0.1);
            for v in &values {
                aggregator.capture("load", &format!("{}g", v));
            }

            let partials = aggregator.flush();
            prop_assert_eq!(partials.g.len(), 1);
            prop_assert_eq!(partials.g[0].sum, values.iter().sum::<i64>());
            prop_assert_eq!(partials.g[0].count, values.len() as u64);
            prop_assert_eq!(partials.g[0].max, *values.iter().max().unwrap());
            prop_assert_eq!(partials.g[0].min, *values.iter().min().unwrap());
        }
    }
}
