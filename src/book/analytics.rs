// =============================================================================
// Book analytics — imbalance, liquidity levels, icebergs, volume profile
//
// =============================================================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::book::ladder::OrderBookLadder;
use crate::money::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImbalanceDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize)]
pub struct Imbalance {
    pub ratio: f64,
    pub direction: ImbalanceDirection,
    pub confidence: Confidence,
}

/// Signed bid/ask volume imbalance in `[-1, 1]` over the top `depth` levels,
/// with a direction label and a confidence derived from how many of those
/// levels individually agree with the aggregate sign.
pub fn imbalance(ladder: &OrderBookLadder, depth: usize) -> Imbalance {
    let bids = ladder.levels(Side::Buy);
    let asks = ladder.levels(Side::Sell);

    let bid_volume: Decimal = bids.iter().take(depth).map(|l| l.volume).sum();
    let ask_volume: Decimal = asks.iter().take(depth).map(|l| l.volume).sum();
    let total = bid_volume + ask_volume;

    let ratio = if total.is_zero() {
        0.0
    } else {
        ((bid_volume - ask_volume) / total).to_f64().unwrap_or(0.0)
    };

    let direction = if ratio > 0.1 {
        ImbalanceDirection::Bullish
    } else if ratio < -0.1 {
        ImbalanceDirection::Bearish
    } else {
        ImbalanceDirection::Neutral
    };

    let agreeing = bids
        .iter()
        .take(depth)
        .filter(|l| ratio >= 0.0 && l.volume > Decimal::ZERO)
        .count()
        + asks
            .iter()
            .take(depth)
            .filter(|l| ratio < 0.0 && l.volume > Decimal::ZERO)
            .count();
    let sample = depth.min(bids.len().max(asks.len())).max(1);
    let agreement_fraction = agreeing as f64 / sample as f64;
    let confidence = if agreement_fraction >= 0.8 {
        Confidence::High
    } else if agreement_fraction >= 0.5 {
        Confidence::Medium
    } else {
        Confidence::Low
    };

    Imbalance { ratio, direction, confidence }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidityLevel {
    pub price: Decimal,
    pub side: &'static str,
    pub aggregated_volume: Decimal,
    pub refresh_count: u64,
}

/// Persistent price levels (appearing in at least `min_refresh_samples`
/// refreshes), sorted strongest-first by aggregated volume.
pub fn liquidity_levels(ladder: &OrderBookLadder, min_refresh_samples: u64) -> Vec<LiquidityLevel> {
    let mut levels: Vec<LiquidityLevel> = ladder
        .levels(Side::Buy)
        .into_iter()
        .filter(|l| l.refresh_count >= min_refresh_samples)
        .map(|l| LiquidityLevel { price: l.price, side: "bid", aggregated_volume: l.total_observed_volume(), refresh_count: l.refresh_count })
        .chain(
            ladder
                .levels(Side::Sell)
                .into_iter()
                .filter(|l| l.refresh_count >= min_refresh_samples)
                .map(|l| LiquidityLevel { price: l.price, side: "ask", aggregated_volume: l.total_observed_volume(), refresh_count: l.refresh_count }),
        )
        .collect();

    levels.sort_by(|a, b| b.aggregated_volume.cmp(&a.aggregated_volume));
    levels
}

#[derive(Debug, Clone, Serialize)]
pub struct IcebergCandidate {
    pub price: Decimal,
    pub side: &'static str,
    pub confidence: f64,
}

pub struct IcebergThresholds {
    pub min_refresh_count: u64,
    pub max_size_variance: f64,
    pub min_total_volume: Decimal,
    pub min_confidence: f64,
}

impl Default for IcebergThresholds {
    fn default() -> Self {
        Self {
            min_refresh_count: 5,
            max_size_variance: 4.0,
            min_total_volume: Decimal::from(100),
            min_confidence: 0.95,
        }
    }
}

/// Classify tracked levels as candidate icebergs: frequent, low-variance
/// refreshes with a large cumulative observed volume imply a hidden resting
/// order being topped up. Output ordered by descending confidence.
pub fn iceberg_candidates(ladder: &OrderBookLadder, thresholds: &IcebergThresholds) -> Vec<IcebergCandidate> {
    let mut candidates = Vec::new();
    for (side_label, side) in [("bid", Side::Buy), ("ask", Side::Sell)] {
        for level in ladder.levels(side) {
            if level.refresh_count < thresholds.min_refresh_count {
                continue;
            }
            if level.total_observed_volume() < thresholds.min_total_volume {
                continue;
            }
            let variance = level.size_variance();
            if variance > thresholds.max_size_variance {
                continue;
            }

            let cadence_score = (level.refresh_count as f64 / (level.refresh_count as f64 + 10.0)).min(1.0);
            let consistency_score = 1.0 / (1.0 + variance);
            let confidence = (cadence_score * 0.5 + consistency_score * 0.5).min(1.0);

            if confidence >= thresholds.min_confidence {
                candidates.push(IcebergCandidate { price: level.price, side: side_label, confidence });
            }
        }
    }
    candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeProfile {
    pub poc_price: Decimal,
    pub value_area_low: Decimal,
    pub value_area_high: Decimal,
    pub coverage_pct: f64,
}

/// Bucketize `trades` (price, volume) into `n_bins` and compute the
/// point-of-control bucket plus a 70% value area grown outward from it.
pub fn volume_profile(trades: &[(Decimal, Decimal)], n_bins: usize) -> Option<VolumeProfile> {
    if trades.is_empty() || n_bins == 0 {
        return None;
    }
    let min_price = trades.iter().map(|(p, _)| *p).min()?;
    let max_price = trades.iter().map(|(p, _)| *p).max()?;
    if max_price <= min_price {
        let total: Decimal = trades.iter().map(|(_, v)| *v).sum();
        let _ = total;
        return Some(VolumeProfile { poc_price: min_price, value_area_low: min_price, value_area_high: min_price, coverage_pct: 100.0 });
    }

    let bin_width = (max_price - min_price) / Decimal::from(n_bins as u64);
    let mut bins = vec![Decimal::ZERO; n_bins];
    let bin_index = |price: Decimal| -> usize {
        if bin_width.is_zero() {
            return 0;
        }
        let idx = ((price - min_price) / bin_width).to_u64().unwrap_or(0) as usize;
        idx.min(n_bins - 1)
    };
    for (price, volume) in trades {
        bins[bin_index(*price)] += *volume;
    }

    let total_volume: Decimal = bins.iter().copied().sum();
    let poc_index = bins.iter().enumerate().max_by_key(|(_, v)| **v).map(|(i, _)| i).unwrap_or(0);

    let target = total_volume * Decimal::from_str("0.70").unwrap();
    let mut covered = bins[poc_index];
    let mut low = poc_index;
    let mut high = poc_index;
    while covered < target && (low > 0 || high < n_bins - 1) {
        let expand_low = low > 0;
        let expand_high = high < n_bins - 1;
        let take_low = expand_low && (!expand_high || bins[low - 1] >= bins.get(high + 1).copied().unwrap_or(Decimal::ZERO));
        if take_low {
            low -= 1;
            covered += bins[low];
        } else if expand_high {
            high += 1;
            covered += bins[high];
        } else {
            break;
        }
    }

    let coverage_pct = if total_volume.is_zero() { 0.0 } else { (covered / total_volume * Decimal::from(100)).to_f64().unwrap_or(0.0) };

    Some(VolumeProfile {
        poc_price: min_price + bin_width * Decimal::from(poc_index as u64),
        value_area_low: min_price + bin_width * Decimal::from(low as u64),
        value_area_high: min_price + bin_width * Decimal::from((high + 1) as u64),
        coverage_pct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ladder_with_bid_heavy_book() -> OrderBookLadder {
        let mut ladder = OrderBookLadder::new(10);
        ladder.update(Side::Buy, dec!(5000), dec!(100), Utc::now());
        ladder.update(Side::Sell, dec!(5001), dec!(10), Utc::now());
        ladder
    }

    #[test]
    fn imbalance_is_bullish_when_bids_dominate() {
        let ladder = ladder_with_bid_heavy_book();
        let result = imbalance(&ladder, 10);
        assert!(result.ratio > 0.0);
        assert_eq!(result.direction, ImbalanceDirection::Bullish);
    }

    #[test]
    fn liquidity_levels_filter_by_min_samples() {
        let ladder = ladder_with_bid_heavy_book();
        let levels = liquidity_levels(&ladder, 2);
        assert!(levels.is_empty(), "fresh levels only have one refresh sample");
    }

    #[test]
    fn volume_profile_finds_poc_in_highest_volume_bucket() {
        let trades = vec![(dec!(5000), dec!(1)), (dec!(5000), dec!(1)), (dec!(5010), dec!(50)), (dec!(5020), dec!(1))];
        let profile = volume_profile(&trades, 3).unwrap();
        assert!(profile.poc_price >= dec!(5000) && profile.poc_price <= dec!(5020));
        assert!(profile.coverage_pct >= 70.0 - 1.0);
    }
}
