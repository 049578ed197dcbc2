// =============================================================================
// Buffer policy — soft/hard caps, depth coalescing, trade sampling (§4.2, §4.6)
// =============================================================================
//
// At >=95% of a buffer's soft cap, depth updates for the same (price, side)
// key collapse to the latest value, and trades are thinned so the most
// recent 30% survive verbatim while the older 70% are sampled down toward
// the configured target utilization.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use rust_decimal::Decimal;

use crate::money::Side;

const SOFT_CAP_TRIGGER_FRACTION: f64 = 0.95;
const RECENT_PRESERVED_FRACTION: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthKey {
    pub price_ticks: i64,
    pub side: DepthSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthSide {
    Bid,
    Ask,
}

impl From<Side> for DepthSide {
    fn from(s: Side) -> Self {
        match s {
            Side::Buy => DepthSide::Bid,
            Side::Sell => DepthSide::Ask,
        }
    }
}

/// Coalescing buffer for depth updates: under pressure, only the latest
/// update per (price, side) is retained.
pub struct DepthCoalescer {
    soft_cap: usize,
    hard_cap: usize,
    pending: HashMap<DepthKey, Decimal>,
    order: VecDeque<DepthKey>,
}

impl DepthCoalescer {
    pub fn new(soft_cap: usize, hard_cap: usize) -> Self {
        Self { soft_cap, hard_cap, pending: HashMap::new(), order: VecDeque::new() }
    }

    pub fn utilization(&self) -> f64 {
        self.pending.len() as f64 / self.soft_cap.max(1) as f64
    }

    /// Stage a depth update. Returns `true` if it coalesced into an existing
    /// pending entry rather than occupying a new slot.
    pub fn stage(&mut self, key: DepthKey, new_size: Decimal) -> bool {
        let coalesced = self.pending.contains_key(&key);
        if !coalesced {
            self.order.push_back(key);
        }
        self.pending.insert(key, new_size);

        if self.pending.len() > self.hard_cap {
            if let Some(oldest) = self.order.pop_front() {
                self.pending.remove(&oldest);
            }
        }
        coalesced
    }

    pub fn is_under_pressure(&self) -> bool {
        self.utilization() >= SOFT_CAP_TRIGGER_FRACTION
    }

    pub fn drain(&mut self) -> Vec<(DepthKey, Decimal)> {
        self.order.clear();
        self.pending.drain().collect()
    }
}

/// Decide whether an older trade (outside the preserved most-recent window)
/// survives sampling at the given `keep_fraction`. `index_from_newest` is
/// zero for the newest element.
pub fn trade_survives_sampling(index_from_newest: usize, total: usize, keep_fraction: f64) -> bool {
    let preserved_count = (total as f64 * RECENT_PRESERVED_FRACTION).ceil() as usize;
    if index_from_newest < preserved_count {
        return true;
    }
    // Deterministic stride-based thinning of the older tail so the same
    // input always samples the same elements (no RNG needed for a pure
    // buffer-pressure decision).
    let stride = (1.0 / keep_fraction.max(0.01)).round().max(1.0) as usize;
    (index_from_newest - preserved_count) % stride == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn coalesces_repeated_key_into_one_slot() {
        let mut c = DepthCoalescer::new(10, 20);
        let key = DepthKey { price_ticks: 500000, side: DepthSide::Bid };
        assert!(!c.stage(key, dec!(5)));
        assert!(c.stage(key, dec!(7)));
        assert_eq!(c.pending.len(), 1);
        assert_eq!(*c.pending.get(&key).unwrap(), dec!(7));
    }

    #[test]
    fn evicts_oldest_past_hard_cap() {
        let mut c = DepthCoalescer::new(2, 2);
        c.stage(DepthKey { price_ticks: 1, side: DepthSide::Bid }, dec!(1));
        c.stage(DepthKey { price_ticks: 2, side: DepthSide::Bid }, dec!(1));
        c.stage(DepthKey { price_ticks: 3, side: DepthSide::Bid }, dec!(1));
        assert_eq!(c.pending.len(), 2);
        assert!(!c.pending.contains_key(&DepthKey { price_ticks: 1, side: DepthSide::Bid }));
    }

    #[test]
    fn preserves_recent_thirty_percent_verbatim() {
        assert!(trade_survives_sampling(0, 100, 0.5));
        assert!(trade_survives_sampling(29, 100, 0.5));
    }

    #[test]
    fn thins_older_tail() {
        let total = 100;
        let kept = (0..total).filter(|&i| trade_survives_sampling(i, total, 0.5)).count();
        assert!(kept < total);
        assert!(kept >= (total as f64 * RECENT_PRESERVED_FRACTION) as usize);
    }
}
