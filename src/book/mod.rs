// =============================================================================
// Book Engine — per-contract ladders plus analytics
// =============================================================================

mod analytics;
mod ladder;
mod level;
mod spoofing;

pub use analytics::{
    iceberg_candidates, imbalance, liquidity_levels, volume_profile, IcebergCandidate, IcebergThresholds, Imbalance,
    ImbalanceDirection, LiquidityLevel, VolumeProfile,
};
pub use ladder::{LadderSnapshot, OrderBookLadder};
pub use level::PriceLevel;
pub use spoofing::{SpoofDetection, SpoofPattern, SpoofingClassifier, SpoofingThresholds};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::money::Side;

const DEFAULT_MAX_DEPTH: usize = 1000;
const DEFAULT_MAX_TRACKED_PRICES: usize = 1000;

struct ContractBook {
    ladder: OrderBookLadder,
    classifier: SpoofingClassifier,
    recent_trades: std::collections::VecDeque<(Decimal, Decimal)>,
}

/// Owns one [`OrderBookLadder`] and [`SpoofingClassifier`] per contract,
/// each behind its own lock so activity on one instrument never blocks
/// another.
pub struct BookEngine {
    books: Mutex<HashMap<String, ContractBook>>,
    max_depth: usize,
    max_tracked_prices: usize,
}

impl BookEngine {
    pub fn new() -> Self {
        Self { books: Mutex::new(HashMap::new()), max_depth: DEFAULT_MAX_DEPTH, max_tracked_prices: DEFAULT_MAX_TRACKED_PRICES }
    }

    fn with_book<R>(&self, contract_id: &str, f: impl FnOnce(&mut ContractBook) -> R) -> R {
        let mut books = self.books.lock();
        let book = books.entry(contract_id.to_string()).or_insert_with(|| ContractBook {
            ladder: OrderBookLadder::new(self.max_depth),
            classifier: SpoofingClassifier::new(self.max_tracked_prices, SpoofingThresholds::default()),
            recent_trades: std::collections::VecDeque::with_capacity(1000),
        });
        f(book)
    }

    pub fn apply_depth_update(&self, contract_id: &str, side: Side, price: Decimal, volume: Decimal, at: DateTime<Utc>) {
        self.with_book(contract_id, |book| book.ladder.update(side, price, volume, at));
    }

    pub fn record_trade(&self, contract_id: &str, price: Decimal, volume: Decimal) {
        self.with_book(contract_id, |book| {
            book.recent_trades.push_back((price, volume));
            if book.recent_trades.len() > 1000 {
                book.recent_trades.pop_front();
            }
        });
    }

    pub fn record_order_placement(&self, contract_id: &str, price: Decimal, distance_from_market_ticks: u32, at: DateTime<Utc>) {
        self.with_book(contract_id, |book| book.classifier.record_placement(price, at, distance_from_market_ticks));
    }

    pub fn record_order_cancellation(&self, contract_id: &str, price: Decimal, at: DateTime<Utc>) {
        self.with_book(contract_id, |book| book.classifier.record_cancellation(price, at));
    }

    pub fn snapshot(&self, contract_id: &str, levels: usize) -> Option<LadderSnapshot> {
        let mut books = self.books.lock();
        books.get_mut(contract_id).map(|book| book.ladder.snapshot(levels))
    }

    pub fn imbalance(&self, contract_id: &str, depth: usize) -> Option<Imbalance> {
        let mut books = self.books.lock();
        books.get_mut(contract_id).map(|book| imbalance(&book.ladder, depth))
    }

    pub fn liquidity_levels(&self, contract_id: &str, min_refresh_samples: u64) -> Vec<LiquidityLevel> {
        let mut books = self.books.lock();
        books.get_mut(contract_id).map(|book| liquidity_levels(&book.ladder, min_refresh_samples)).unwrap_or_default()
    }

    pub fn iceberg_candidates(&self, contract_id: &str, thresholds: &IcebergThresholds) -> Vec<IcebergCandidate> {
        let mut books = self.books.lock();
        books.get_mut(contract_id).map(|book| iceberg_candidates(&book.ladder, thresholds)).unwrap_or_default()
    }

    pub fn volume_profile(&self, contract_id: &str, n_bins: usize) -> Option<VolumeProfile> {
        let mut books = self.books.lock();
        let book = books.get_mut(contract_id)?;
        let trades: Vec<(Decimal, Decimal)> = book.recent_trades.iter().copied().collect();
        volume_profile(&trades, n_bins)
    }

    pub fn spoof_detections(&self, contract_id: &str, now: DateTime<Utc>) -> Vec<SpoofDetection> {
        let mut books = self.books.lock();
        books.get_mut(contract_id).map(|book| book.classifier.classify(now)).unwrap_or_default()
    }
}

impl Default for BookEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn snapshot_is_none_for_untracked_contract() {
        let engine = BookEngine::new();
        assert!(engine.snapshot("ES", 10).is_none());
    }

    #[test]
    fn applies_depth_update_and_returns_snapshot() {
        let engine = BookEngine::new();
        engine.apply_depth_update("ES", Side::Buy, dec!(5000), dec!(10), Utc::now());
        engine.apply_depth_update("ES", Side::Sell, dec!(5001), dec!(5), Utc::now());
        let snapshot = engine.snapshot("ES", 10).unwrap();
        assert_eq!(snapshot.best_bid, Some(dec!(5000)));
        assert_eq!(snapshot.best_ask, Some(dec!(5001)));
    }

    #[test]
    fn per_contract_state_is_isolated() {
        let engine = BookEngine::new();
        engine.apply_depth_update("ES", Side::Buy, dec!(5000), dec!(10), Utc::now());
        engine.apply_depth_update("NQ", Side::Buy, dec!(18000), dec!(3), Utc::now());
        assert_eq!(engine.snapshot("ES", 10).unwrap().best_bid, Some(dec!(5000)));
        assert_eq!(engine.snapshot("NQ", 10).unwrap().best_bid, Some(dec!(18000)));
    }
}
