// =============================================================================
// Statistics aggregator — TTL-cached snapshot across components
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::stats::counters::ComponentCounters;
use crate::stats::health::{health_score, HealthSignals, HealthThresholds, HealthTier, HealthWeights};

const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// A single component's counters behind its own lock, so one component's
/// writers never contend with another's.
pub struct ComponentSlot {
    name: String,
    counters: RwLock<ComponentCounters>,
}

impl ComponentSlot {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { name: name.into(), counters: RwLock::new(ComponentCounters::default()) })
    }

    pub fn with_counters<R>(&self, f: impl FnOnce(&mut ComponentCounters) -> R) -> R {
        f(&mut self.counters.write())
    }

    fn snapshot(&self) -> ComponentCounters {
        self.counters.read().clone()
    }
}

#[derive(Debug, Clone)]
pub struct AggregatedSnapshot {
    pub taken_at_secs_monotonic: u64,
    pub components: HashMap<String, ComponentCounters>,
    pub health_score: u8,
    pub health_tier: HealthTier,
}

struct Cached {
    snapshot: AggregatedSnapshot,
    fetched_at: Instant,
}

/// Collects every registered component's counters in parallel, caching the
/// merged result for `ttl` so bursts of readers (dashboards, exporters) share
/// one collection pass.
pub struct StatsAggregator {
    components: RwLock<Vec<Arc<ComponentSlot>>>,
    cache: RwLock<Option<Cached>>,
    ttl: Duration,
    thresholds: HealthThresholds,
    weights: HealthWeights,
}

impl StatsAggregator {
    pub fn new(ttl: Duration) -> Self {
        Self::with_weights(ttl, HealthWeights::default())
    }

    /// As [`Self::new`], but with the health-score weighting supplied by the
    /// caller rather than defaulted — used when a configured
    /// `HealthWeightsConfig` must actually drive the computed score.
    pub fn with_weights(ttl: Duration, weights: HealthWeights) -> Self {
        Self { components: RwLock::new(Vec::new()), cache: RwLock::new(None), ttl, thresholds: HealthThresholds::default(), weights }
    }

    pub fn register(&self, slot: Arc<ComponentSlot>) {
        self.components.write().push(slot);
    }

    /// Return the cached snapshot if still fresh, otherwise collect a fresh
    /// one. `signals` drives the health score for this collection pass; the
    /// caller (the suite, which can see every component) supplies it because
    /// the aggregator itself has no opinion on component semantics.
    pub fn snapshot(&self, now_monotonic_secs: u64, signals: HealthSignals) -> AggregatedSnapshot {
        {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return cached.snapshot.clone();
                }
            }
        }

        let slots: Vec<Arc<ComponentSlot>> = self.components.read().clone();
        let mut components = HashMap::new();
        for slot in &slots {
            components.insert(slot.name.clone(), slot.snapshot());
        }

        let score = health_score(signals, self.weights);
        let tier = self.thresholds.classify(score);
        let snapshot = AggregatedSnapshot { taken_at_secs_monotonic: now_monotonic_secs, components, health_score: score, health_tier: tier };

        *self.cache.write() = Some(Cached { snapshot: snapshot.clone(), fetched_at: Instant::now() });
        snapshot
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_snapshot_within_ttl_is_cached() {
        let aggregator = StatsAggregator::new(Duration::from_secs(60));
        let slot = ComponentSlot::new("transport");
        aggregator.register(slot.clone());
        slot.with_counters(|c| c.record_operation("request"));

        let first = aggregator.snapshot(0, HealthSignals::default());
        slot.with_counters(|c| c.record_operation("request"));
        let second = aggregator.snapshot(0, HealthSignals::default());

        assert_eq!(first.components["transport"].operations["request"], second.components["transport"].operations["request"]);
    }

    #[test]
    fn snapshot_after_ttl_expiry_reflects_new_writes() {
        let aggregator = StatsAggregator::new(Duration::from_millis(1));
        let slot = ComponentSlot::new("transport");
        aggregator.register(slot.clone());
        slot.with_counters(|c| c.record_operation("request"));
        let first = aggregator.snapshot(0, HealthSignals::default());
        std::thread::sleep(Duration::from_millis(5));
        slot.with_counters(|c| c.record_operation("request"));
        let second = aggregator.snapshot(0, HealthSignals::default());
        assert_eq!(first.components["transport"].operations["request"], 1);
        assert_eq!(second.components["transport"].operations["request"], 2);
    }
}
