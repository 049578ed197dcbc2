// =============================================================================
// Bar Aggregator — multi-timeframe OHLCV from the trade stream
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::bars::bar::Bar;
use crate::bars::overflow::OverflowStore;
use crate::bars::ring::BarRing;
use crate::clock::SessionClock;
use crate::event_bus::{Event, EventBus};

#[derive(Debug, Clone)]
pub struct BarAggregatorConfig {
    pub timeframes_secs: Vec<u32>,
    pub max_live_bars_per_timeframe: usize,
    pub overflow_dir: Option<PathBuf>,
}

impl Default for BarAggregatorConfig {
    fn default() -> Self {
        Self {
            timeframes_secs: vec![1, 15, 60, 300, 900, 3600],
            max_live_bars_per_timeframe: 500,
            overflow_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RingKey {
    timeframe_secs: u32,
}

/// Aggregates closed trades into OHLCV bars for every configured timeframe,
/// one independent lock per (contract, timeframe) ring so a slow consumer of
/// one timeframe never blocks ingestion of another.
pub struct BarAggregator {
    config: BarAggregatorConfig,
    events: Arc<EventBus>,
    rings: Mutex<HashMap<String, HashMap<u32, Mutex<BarRing>>>>,
    clocks: Mutex<HashMap<String, SessionClock>>,
    last_offset_instant: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl BarAggregator {
    pub fn new(config: BarAggregatorConfig, events: Arc<EventBus>) -> Self {
        Self {
            config,
            events,
            rings: Mutex::new(HashMap::new()),
            clocks: Mutex::new(HashMap::new()),
            last_offset_instant: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_instrument(&self, contract_id: &str, clock: SessionClock) {
        self.clocks.lock().insert(contract_id.to_string(), clock);
        self.last_offset_instant.lock().insert(contract_id.to_string(), Utc::now());

        let mut rings = self.rings.lock();
        let per_timeframe = rings.entry(contract_id.to_string()).or_default();
        for &timeframe_secs in &self.config.timeframes_secs {
            let overflow = self.config.overflow_dir.as_ref().and_then(|dir| {
                OverflowStore::new(dir, contract_id, timeframe_secs).ok()
            });
            per_timeframe
                .entry(timeframe_secs)
                .or_insert_with(|| Mutex::new(BarRing::new(contract_id, timeframe_secs, self.config.max_live_bars_per_timeframe, overflow)));
        }
    }

    fn bucket_start(&self, clock: &SessionClock, timeframe_secs: u32, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let origin = clock.epoch_origin(timestamp);
        let elapsed = (timestamp - origin).num_seconds().max(0);
        let bucket_index = elapsed / timeframe_secs as i64;
        origin + chrono::Duration::seconds(bucket_index * timeframe_secs as i64)
    }

    /// Fold one validated trade into every configured timeframe for
    /// `contract_id`. A transactional stage/validate/commit: the ring's
    /// current in-progress bar is only mutated in place, and a bucket
    /// rollover is a close-then-open performed under the same lock, so a
    /// concurrent reader never observes a half-updated bar.
    pub fn handle_trade(&self, contract_id: &str, price: Decimal, size: u32, timestamp: DateTime<Utc>) {
        let clock = match self.clocks.lock().get(contract_id).cloned() {
            Some(c) => c,
            None => return,
        };

        self.check_dst_transition(contract_id, &clock, timestamp);

        let rings = self.rings.lock();
        let Some(per_timeframe) = rings.get(contract_id) else { return };

        for (&timeframe_secs, ring_lock) in per_timeframe.iter() {
            let bucket_start = self.bucket_start(&clock, timeframe_secs, timestamp);
            let mut ring = ring_lock.lock();

            let needs_new_bucket = match ring.in_progress() {
                Some(bar) => bar.bucket_start != bucket_start,
                None => true,
            };

            if needs_new_bucket {
                if ring.in_progress().is_some() {
                    ring.close_in_progress();
                    self.events.emit(Event::BarClosed { contract_id: contract_id.to_string(), timeframe_secs: timeframe_secs.into(), bucket_start });
                }
                ring.open_new(Bar::open_at(contract_id, timeframe_secs, bucket_start, price));
            }

            if let Some(bar) = ring.in_progress_mut() {
                bar.apply_trade(price, size);
            }
            self.events.emit(Event::BarUpdated { contract_id: contract_id.to_string(), timeframe_secs: timeframe_secs.into() });
        }
    }

    fn check_dst_transition(&self, contract_id: &str, clock: &SessionClock, now: DateTime<Utc>) {
        let mut last = self.last_offset_instant.lock();
        if let Some(previous) = last.get(contract_id).copied() {
            if clock.dst_offset_changed(previous, now) {
                let delta = clock.utc_offset_seconds(now) - clock.utc_offset_seconds(previous);
                info!(contract_id, delta_seconds = delta, "session offset changed, bucket origin realigned");
                self.events.emit(Event::SessionTransition { contract_id: contract_id.to_string(), offset_delta_seconds: delta });
            }
        }
        last.insert(contract_id.to_string(), now);
    }

    /// Force-close any in-progress bar that has run past its bucket end with
    /// no trades (an "empty bar"), so consumers see a continuous series even
    /// through a quiet period. Intended to be driven by a periodic timer.
    pub fn close_stale_buckets(&self, now: DateTime<Utc>) {
        let rings = self.rings.lock();
        for (contract_id, per_timeframe) in rings.iter() {
            for (&timeframe_secs, ring_lock) in per_timeframe.iter() {
                let mut ring = ring_lock.lock();
                let stale = matches!(ring.in_progress(), Some(bar) if bar.bucket_end() <= now);
                if stale {
                    let close_price = ring.in_progress().map(|b| b.close);
                    ring.close_in_progress();
                    self.events.emit(Event::BarClosed { contract_id: contract_id.clone(), timeframe_secs: timeframe_secs.into(), bucket_start: now });
                    if let (Some(clock), Some(close)) = (self.clocks.lock().get(contract_id).cloned(), close_price) {
                        let bucket_start = self.bucket_start(&clock, timeframe_secs, now);
                        ring.open_new(Bar::open_at(contract_id.clone(), timeframe_secs, bucket_start, close));
                        debug!(contract_id, timeframe_secs, "opened empty bar for quiet period");
                    }
                }
            }
        }
    }

    pub fn get_bars(&self, contract_id: &str, timeframe_secs: u32, count: usize) -> Vec<Bar> {
        let rings = self.rings.lock();
        rings
            .get(contract_id)
            .and_then(|per_timeframe| per_timeframe.get(&timeframe_secs))
            .map(|ring| ring.lock().get_bars(count))
            .unwrap_or_default()
    }

    pub fn current_price(&self, contract_id: &str) -> Option<Decimal> {
        let rings = self.rings.lock();
        let per_timeframe = rings.get(contract_id)?;
        let shortest = per_timeframe.keys().min().copied()?;
        let result = per_timeframe.get(&shortest)?.lock().current_price();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SessionConfig;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn aggregator() -> BarAggregator {
        let events = Arc::new(EventBus::new(8, Duration::from_secs(1)));
        let config = BarAggregatorConfig { timeframes_secs: vec![60], max_live_bars_per_timeframe: 10, overflow_dir: None };
        let agg = BarAggregator::new(config, events);
        let clock = SessionClock::new("America/New_York", SessionConfig::default()).unwrap();
        agg.register_instrument("ES", clock);
        agg
    }

    #[test]
    fn first_trade_opens_a_bar() {
        let agg = aggregator();
        agg.handle_trade("ES", dec!(5000.00), 1, Utc::now());
        let bars = agg.get_bars("ES", 60, 10);
        assert!(bars.is_empty(), "bar is still in-progress, not yet closed");
        assert_eq!(agg.current_price("ES"), Some(dec!(5000.00)));
    }

    #[test]
    fn trade_in_next_bucket_closes_previous_bar() {
        let agg = aggregator();
        let t0 = chrono::DateTime::parse_from_rfc3339("2024-06-10T14:00:10Z").unwrap().with_timezone(&Utc);
        let t1 = chrono::DateTime::parse_from_rfc3339("2024-06-10T14:01:05Z").unwrap().with_timezone(&Utc);
        agg.handle_trade("ES", dec!(5000.00), 1, t0);
        agg.handle_trade("ES", dec!(5010.00), 1, t1);
        let bars = agg.get_bars("ES", 60, 10);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(5000.00));
    }

    #[test]
    fn close_stale_buckets_force_closes_quiet_bars() {
        let agg = aggregator();
        let t0 = Utc::now() - chrono::Duration::seconds(120);
        agg.handle_trade("ES", dec!(5000.00), 1, t0);
        agg.close_stale_buckets(Utc::now());
        let bars = agg.get_bars("ES", 60, 10);
        assert!(!bars.is_empty());
    }
}
