// =============================================================================
// Per-timeframe bar ring — bounded live buffer with disk overflow (§4.4, §4.6)
// =============================================================================

use std::collections::VecDeque;

use tracing::warn;

use crate::bars::bar::Bar;
use crate::bars::overflow::OverflowStore;

const OVERFLOW_TRIGGER_FRACTION: f64 = 0.80;

/// Holds the live (in-memory) bars for one (contract, timeframe) pair plus
/// one in-progress bar. When the closed-bar count crosses 80% of
/// `max_live_bars`, the oldest half of the closed bars are spilled to
/// `overflow` and dropped from memory.
pub struct BarRing {
    contract_id: String,
    timeframe_secs: u32,
    max_live_bars: usize,
    closed: VecDeque<Bar>,
    in_progress: Option<Bar>,
    overflow: Option<OverflowStore>,
}

impl BarRing {
    pub fn new(contract_id: impl Into<String>, timeframe_secs: u32, max_live_bars: usize, overflow: Option<OverflowStore>) -> Self {
        Self {
            contract_id: contract_id.into(),
            timeframe_secs,
            max_live_bars,
            closed: VecDeque::with_capacity(max_live_bars),
            in_progress: None,
            overflow,
        }
    }

    pub fn in_progress(&self) -> Option<&Bar> {
        self.in_progress.as_ref()
    }

    pub fn in_progress_mut(&mut self) -> Option<&mut Bar> {
        self.in_progress.as_mut()
    }

    pub fn open_new(&mut self, bar: Bar) {
        self.in_progress = Some(bar);
    }

    /// Close the in-progress bar (if any) and push it into the live window,
    /// spilling the oldest closed bars to disk once the soft threshold is
    /// crossed.
    pub fn close_in_progress(&mut self) {
        if let Some(mut bar) = self.in_progress.take() {
            bar.closed = true;
            self.closed.push_back(bar);
            self.spill_if_needed();
        }
    }

    fn spill_if_needed(&mut self) {
        let utilization = self.closed.len() as f64 / self.max_live_bars.max(1) as f64;
        if utilization < OVERFLOW_TRIGGER_FRACTION {
            return;
        }
        let Some(overflow) = self.overflow.as_mut() else {
            while self.closed.len() > self.max_live_bars {
                self.closed.pop_front();
            }
            return;
        };
        let spill_count = self.closed.len() / 2;
        for _ in 0..spill_count {
            if let Some(bar) = self.closed.pop_front() {
                if let Err(e) = overflow.append(bar) {
                    warn!(contract_id = %self.contract_id, timeframe_secs = self.timeframe_secs, error = %e, "failed to spill bar to overflow store");
                }
            }
        }
    }

    /// Most recent `count` closed bars, oldest-first.
    pub fn get_bars(&self, count: usize) -> Vec<Bar> {
        let start = self.closed.len().saturating_sub(count);
        self.closed.iter().skip(start).cloned().collect()
    }

    pub fn current_price(&self) -> Option<rust_decimal::Decimal> {
        self.in_progress.as_ref().map(|b| b.close).or_else(|| self.closed.back().map(|b| b.close))
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(close: rust_decimal::Decimal) -> Bar {
        Bar::open_at("ES", 60, Utc::now(), close)
    }

    #[test]
    fn spills_oldest_half_past_soft_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let overflow = crate::bars::overflow::OverflowStore::new(dir.path(), "ES", 60).unwrap();
        let mut ring = BarRing::new("ES", 60, 10, Some(overflow));
        for i in 0..9 {
            ring.open_new(bar(dec!(5000) + rust_decimal::Decimal::from(i)));
            ring.close_in_progress();
        }
        assert!(ring.closed_count() < 9);
    }

    #[test]
    fn current_price_prefers_in_progress_bar() {
        let mut ring = BarRing::new("ES", 60, 10, None);
        ring.open_new(bar(dec!(5000)));
        ring.close_in_progress();
        ring.open_new(bar(dec!(5050)));
        assert_eq!(ring.current_price(), Some(dec!(5050)));
    }

    #[test]
    fn get_bars_returns_oldest_first() {
        let mut ring = BarRing::new("ES", 60, 10, None);
        for i in 0..3 {
            ring.open_new(bar(dec!(5000) + rust_decimal::Decimal::from(i)));
            ring.close_in_progress();
        }
        let bars = ring.get_bars(10);
        assert_eq!(bars[0].close, dec!(5000));
        assert_eq!(bars[2].close, dec!(5002));
    }
}
