// =============================================================================
// Bounded counters — operation tallies, error tallies, latency histograms.
// None of these grow unbounded: the error log rotates at a fixed capacity
// and the latency histogram uses fixed buckets.
// =============================================================================

use std::collections::{HashMap, VecDeque};

/// Fixed latency buckets, in milliseconds. Samples above the last bucket fall
/// into an overflow bucket rather than growing the histogram.
pub const LATENCY_BUCKETS_MS: [u64; 8] = [1, 5, 10, 25, 50, 100, 250, 1000];

/// A fixed-bucket latency histogram. Memory is O(bucket count), independent
/// of sample volume.
#[derive(Debug, Clone, Default)]
pub struct LatencyHistogram {
    counts: [u64; LATENCY_BUCKETS_MS.len() + 1],
    sum_ms: u64,
    total: u64,
}

impl LatencyHistogram {
    pub fn record(&mut self, elapsed_ms: u64) {
        self.sum_ms = self.sum_ms.saturating_add(elapsed_ms);
        self.total += 1;
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if elapsed_ms <= *bound {
                self.counts[i] += 1;
                return;
            }
        }
        *self.counts.last_mut().unwrap() += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn mean_ms(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sum_ms as f64 / self.total as f64
        }
    }

    pub fn bucket_counts(&self) -> &[u64] {
        &self.counts
    }
}

/// A rotating window of the last `capacity` error kinds observed, plus the
/// all-time tally by kind. The window bounds memory; the tally is a single
/// integer per distinct kind seen so far, which is bounded in practice by the
/// number of error variants in the component's error enum.
#[derive(Debug, Clone)]
pub struct RotatingErrorLog {
    capacity: usize,
    recent: VecDeque<String>,
    tally: HashMap<String, u64>,
}

impl Default for RotatingErrorLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RotatingErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), recent: VecDeque::with_capacity(capacity), tally: HashMap::new() }
    }

    pub fn record(&mut self, kind: impl Into<String>) {
        let kind = kind.into();
        *self.tally.entry(kind.clone()).or_insert(0) += 1;
        if self.recent.len() >= self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(kind);
    }

    pub fn tally(&self) -> &HashMap<String, u64> {
        &self.tally
    }

    pub fn recent_count_for(&self, kind: &str) -> usize {
        self.recent.iter().filter(|k| k.as_str() == kind).count()
    }
}

/// Per-component counter set: operation tallies, error tallies, latency
/// histogram, and a size/memory gauge.
#[derive(Debug, Clone, Default)]
pub struct ComponentCounters {
    pub operations: HashMap<String, u64>,
    pub errors: RotatingErrorLog,
    pub latency: LatencyHistogram,
    pub gauges: HashMap<String, u64>,
}

impl ComponentCounters {
    pub fn record_operation(&mut self, name: &str) {
        *self.operations.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&mut self, kind: &str) {
        self.errors.record(kind);
    }

    pub fn record_latency_ms(&mut self, elapsed_ms: u64) {
        self.latency.record(elapsed_ms);
    }

    pub fn set_gauge(&mut self, name: &str, value: u64) {
        self.gauges.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_routes_samples_into_fixed_buckets() {
        let mut hist = LatencyHistogram::default();
        hist.record(3);
        hist.record(3000);
        assert_eq!(hist.total(), 2);
        assert_eq!(hist.bucket_counts()[1], 1);
        assert_eq!(*hist.bucket_counts().last().unwrap(), 1);
    }

    #[test]
    fn error_log_window_is_bounded_but_tally_is_cumulative() {
        let mut log = RotatingErrorLog::new(2);
        log.record("timeout");
        log.record("timeout");
        log.record("timeout");
        assert_eq!(log.recent_count_for("timeout"), 2);
        assert_eq!(*log.tally().get("timeout").unwrap(), 3);
    }
}
