// =============================================================================
// Statistics / Health module
// =============================================================================

mod aggregator;
mod counters;
mod export;
mod health;

pub use aggregator::{AggregatedSnapshot, ComponentSlot, StatsAggregator};
pub use counters::{ComponentCounters, LatencyHistogram, RotatingErrorLog};
pub use export::{to_csv, to_datadog, to_json, to_prometheus_text};
pub use health::{HealthSignals, HealthThresholds, HealthTier, HealthWeights};

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::warn;

use crate::event_bus::{Event, EventBus};

/// Statistics facade owned by the suite: holds the aggregator, one
/// [`ComponentSlot`] per named component, and mirrors the same counters into
/// the process-wide `metrics` registry so an external Prometheus exporter
/// (installed once via [`Statistics::install_prometheus_exporter`]) can scrape
/// them independently of the in-crate export functions.
pub struct Statistics {
    aggregator: StatsAggregator,
    events: Arc<EventBus>,
    last_tier: parking_lot::Mutex<Option<HealthTier>>,
}

impl Statistics {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self::with_weights(events, HealthWeights::default())
    }

    /// As [`Self::new`], but threading through a configured health-score
    /// weighting rather than the default split.
    pub fn with_weights(events: Arc<EventBus>, weights: HealthWeights) -> Self {
        Self { aggregator: StatsAggregator::with_weights(Duration::from_secs(5), weights), events, last_tier: parking_lot::Mutex::new(None) }
    }

    pub fn component(&self, name: &str) -> Arc<ComponentSlot> {
        let slot = ComponentSlot::new(name);
        self.aggregator.register(slot.clone());
        slot
    }

    /// Collect a fresh or cached snapshot and, on a health tier transition,
    /// emit `HealthChanged`.
    pub fn snapshot(&self, now_monotonic_secs: u64, signals: HealthSignals) -> AggregatedSnapshot {
        let snapshot = self.aggregator.snapshot(now_monotonic_secs, signals);
        let mut last = self.last_tier.lock();
        if *last != Some(snapshot.health_tier) {
            *last = Some(snapshot.health_tier);
            self.events.emit(Event::HealthChanged { component: "suite".into(), score: snapshot.health_score });
        }
        snapshot
    }

    /// Install the global Prometheus recorder and start its HTTP listener.
    /// Idempotent in practice: `metrics_exporter_prometheus` panics if
    /// installed twice, so the suite calls this exactly once at startup.
    pub fn install_prometheus_exporter(&self, listen_addr: std::net::SocketAddr) -> anyhow::Result<()> {
        PrometheusBuilder::new()
            .with_http_listener(listen_addr)
            .install()
            .map_err(|e| {
                warn!(error = %e, "failed to install Prometheus exporter");
                anyhow::anyhow!(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_changed_emitted_on_tier_transition() {
        let events = Arc::new(EventBus::new(4, Duration::from_secs(1)));
        let stats = Statistics::new(events);
        let healthy = HealthSignals { connection_health: 1.0, validation_acceptance_rate: 1.0, reconciliation_success_rate: 1.0, buffer_headroom: 1.0, error_rate_stability: 1.0 };
        let unhealthy = HealthSignals::default();
        let first = stats.snapshot(0, healthy);
        assert_eq!(first.health_tier, HealthTier::Healthy);
        let second = stats.snapshot(1, unhealthy);
        // cached within TTL, so the tier does not actually change on this call
        assert_eq!(second.health_tier, HealthTier::Healthy);
    }
}
