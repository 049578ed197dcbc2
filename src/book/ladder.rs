// =============================================================================
// Order book ladder — bounded bid/ask level maps
// =============================================================================

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::book::level::PriceLevel;
use crate::money::Side;

#[derive(Debug, Clone)]
pub struct LadderSnapshot {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub mid: Option<Decimal>,
    pub total_bid_volume: Decimal,
    pub total_ask_volume: Decimal,
}

/// Bid levels ordered descending (best bid first); ask levels ordered
/// ascending (best ask first). Both capped at `max_depth` — the worst level
/// is evicted when a new one would exceed the cap.
pub struct OrderBookLadder {
    max_depth: usize,
    bids: BTreeMap<Reverse<Decimal>, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
}

impl OrderBookLadder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth, bids: BTreeMap::new(), asks: BTreeMap::new() }
    }

    /// Apply a depth update: `volume == 0` removes the level.
    pub fn update(&mut self, side: Side, price: Decimal, volume: Decimal, at: DateTime<Utc>) {
        match side {
            Side::Buy => Self::apply(&mut self.bids, Reverse(price), price, volume, at, self.max_depth),
            Side::Sell => Self::apply(&mut self.asks, price, price, volume, at, self.max_depth),
        }
    }

    fn apply<K: Ord + Copy>(map: &mut BTreeMap<K, PriceLevel>, key: K, price: Decimal, volume: Decimal, at: DateTime<Utc>, max_depth: usize) {
        if volume.is_zero() {
            map.remove(&key);
            return;
        }
        map.entry(key)
            .and_modify(|level| level.refresh(volume, at))
            .or_insert_with(|| PriceLevel::new(price, volume, at));

        while map.len() > max_depth {
            if let Some(last_key) = map.keys().next_back().copied() {
                map.remove(&last_key);
            }
        }
    }

    pub fn level(&self, side: Side, price: Decimal) -> Option<&PriceLevel> {
        match side {
            Side::Buy => self.bids.get(&Reverse(price)),
            Side::Sell => self.asks.get(&price),
        }
    }

    pub fn levels(&self, side: Side) -> Vec<&PriceLevel> {
        match side {
            Side::Buy => self.bids.values().collect(),
            Side::Sell => self.asks.values().collect(),
        }
    }

    /// A single consistent read of the top `k` levels on each side plus
    /// derived metadata.
    pub fn snapshot(&self, k: usize) -> LadderSnapshot {
        let bids: Vec<(Decimal, Decimal)> = self.bids.values().take(k).map(|l| (l.price, l.volume)).collect();
        let asks: Vec<(Decimal, Decimal)> = self.asks.values().take(k).map(|l| (l.price, l.volume)).collect();

        let best_bid = bids.first().map(|(p, _)| *p);
        let best_ask = asks.first().map(|(p, _)| *p);
        let spread = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some(a - b),
            _ => None,
        };
        let mid = match (best_bid, best_ask) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => None,
        };

        let total_bid_volume = self.bids.values().map(|l| l.volume).sum();
        let total_ask_volume = self.asks.values().map(|l| l.volume).sum();

        LadderSnapshot { bids, asks, best_bid, best_ask, spread, mid, total_bid_volume, total_ask_volume }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn update_creates_and_removes_levels() {
        let mut ladder = OrderBookLadder::new(10);
        ladder.update(Side::Buy, dec!(5000), dec!(5), Utc::now());
        assert!(ladder.level(Side::Buy, dec!(5000)).is_some());
        ladder.update(Side::Buy, dec!(5000), dec!(0), Utc::now());
        assert!(ladder.level(Side::Buy, dec!(5000)).is_none());
    }

    #[test]
    fn bids_are_ordered_descending_asks_ascending() {
        let mut ladder = OrderBookLadder::new(10);
        ladder.update(Side::Buy, dec!(4999), dec!(1), Utc::now());
        ladder.update(Side::Buy, dec!(5001), dec!(1), Utc::now());
        ladder.update(Side::Sell, dec!(5002), dec!(1), Utc::now());
        ladder.update(Side::Sell, dec!(5003), dec!(1), Utc::now());

        let snapshot = ladder.snapshot(10);
        assert_eq!(snapshot.best_bid, Some(dec!(5001)));
        assert_eq!(snapshot.best_ask, Some(dec!(5002)));
        assert_eq!(snapshot.spread, Some(dec!(1)));
    }

    #[test]
    fn evicts_worst_level_past_max_depth() {
        let mut ladder = OrderBookLadder::new(2);
        ladder.update(Side::Buy, dec!(5000), dec!(1), Utc::now());
        ladder.update(Side::Buy, dec!(4999), dec!(1), Utc::now());
        ladder.update(Side::Buy, dec!(4998), dec!(1), Utc::now());
        assert_eq!(ladder.levels(Side::Buy).len(), 2);
        assert!(ladder.level(Side::Buy, dec!(4998)).is_none());
    }
}
