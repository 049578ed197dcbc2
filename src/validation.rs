// =============================================================================
// Frame Validator — layered inbound sanity checks
// =============================================================================
//
// Every inbound market-data frame passes through here before it reaches the
// Bar Aggregator or Order Book Engine. Checks are cheap and ordered so the
// common case (a well-formed frame) touches as little state as possible.
// =============================================================================

use std::collections::HashMap;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::money::{Instrument, Price};

const PRICE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
const BASELINE_WINDOW: usize = 1000;
const BAND_FRACTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    Format,
    PriceOutOfBounds,
    VolumeOutOfBounds,
    TimestampOutOfTolerance,
    NonMonotoneTimestamp,
    InvalidQuote,
}

impl From<&ValidationError> for RejectionReason {
    fn from(e: &ValidationError) -> Self {
        match e {
            ValidationError::Format(_) => RejectionReason::Format,
            ValidationError::PriceOutOfBounds => RejectionReason::PriceOutOfBounds,
            ValidationError::VolumeOutOfBounds => RejectionReason::VolumeOutOfBounds,
            ValidationError::TimestampOutOfTolerance => RejectionReason::TimestampOutOfTolerance,
            ValidationError::NonMonotoneTimestamp => RejectionReason::NonMonotoneTimestamp,
            ValidationError::InvalidQuote => RejectionReason::InvalidQuote,
        }
    }
}

struct InstrumentBaseline {
    recent_trade_prices: VecDeque<Decimal>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl InstrumentBaseline {
    fn new() -> Self {
        Self { recent_trade_prices: VecDeque::with_capacity(BASELINE_WINDOW), last_timestamp: None }
    }

    fn median(&self) -> Option<Decimal> {
        if self.recent_trade_prices.is_empty() {
            return None;
        }
        let mut sorted: Vec<Decimal> = self.recent_trade_prices.iter().copied().collect();
        sorted.sort();
        Some(sorted[sorted.len() / 2])
    }

    fn record_trade(&mut self, price: Decimal) {
        if self.recent_trade_prices.len() >= BASELINE_WINDOW {
            self.recent_trade_prices.pop_front();
        }
        self.recent_trade_prices.push_back(price);
    }
}

/// Layered validator with a per-instrument adaptive price baseline and a
/// running tally of rejection reasons for observability.
pub struct FrameValidator {
    baselines: RwLock<HashMap<String, InstrumentBaseline>>,
    rejection_counts: RwLock<HashMap<RejectionReason, u64>>,
    clock_tolerance: chrono::Duration,
    price_cap: Decimal,
}

impl FrameValidator {
    pub fn new(clock_tolerance: chrono::Duration, price_cap: Decimal) -> Self {
        Self {
            baselines: RwLock::new(HashMap::new()),
            rejection_counts: RwLock::new(HashMap::new()),
            clock_tolerance,
            price_cap,
        }
    }

    fn record_rejection(&self, reason: RejectionReason) {
        *self.rejection_counts.write().entry(reason).or_insert(0) += 1;
    }

    pub fn rejection_tally(&self) -> HashMap<RejectionReason, u64> {
        self.rejection_counts.read().clone()
    }

    /// Validate a trade price/volume/timestamp triple for `instrument`. On
    /// success, the trade is snapped to the instrument's tick before it is
    /// folded into the rolling median baseline, so the baseline and the
    /// returned price are always tick-aligned.
    pub fn validate_trade(
        &self,
        instrument: &Instrument,
        price: Decimal,
        volume: u32,
        timestamp: DateTime<Utc>,
    ) -> Result<Price, ValidationError> {
        if let Err(e) = self.check_basic(price, volume, timestamp) {
            self.record_rejection((&e).into());
            return Err(e);
        }

        let (aligned, _) = instrument.align(price);

        let mut baselines = self.baselines.write();
        let baseline = baselines.entry(instrument.contract_id.clone()).or_insert_with(InstrumentBaseline::new);

        if let Some(last) = baseline.last_timestamp {
            if timestamp < last {
                self.record_rejection(RejectionReason::NonMonotoneTimestamp);
                return Err(ValidationError::NonMonotoneTimestamp);
            }
        }

        if let Some(median) = baseline.median() {
            let median_f64: f64 = median.to_f64().unwrap_or(0.0);
            let price_f64: f64 = aligned.value().to_f64().unwrap_or(0.0);
            if median_f64 > 0.0 {
                let deviation = (price_f64 - median_f64).abs() / median_f64;
                if deviation > BAND_FRACTION {
                    self.record_rejection(RejectionReason::PriceOutOfBounds);
                    return Err(ValidationError::PriceOutOfBounds);
                }
            }
        }

        baseline.record_trade(aligned.value());
        baseline.last_timestamp = Some(timestamp);
        Ok(aligned)
    }

    /// Validate a bid/ask quote pair: neither crossed nor absurdly wide. Both
    /// sides are snapped to `instrument`'s tick before the checks run, and
    /// the aligned pair is returned on success.
    pub fn validate_quote(&self, instrument: &Instrument, bid: Decimal, ask: Decimal) -> Result<(Price, Price), ValidationError> {
        let (bid, _) = instrument.align(bid);
        let (ask, _) = instrument.align(ask);
        if bid.value() <= Decimal::ZERO || ask.value() <= Decimal::ZERO {
            self.record_rejection(RejectionReason::PriceOutOfBounds);
            return Err(ValidationError::PriceOutOfBounds);
        }
        if bid.value() > ask.value() {
            self.record_rejection(RejectionReason::InvalidQuote);
            return Err(ValidationError::InvalidQuote);
        }
        let mid = (bid.value() + ask.value()) / Decimal::TWO;
        if mid > Decimal::ZERO {
            let spread_fraction: f64 = ((ask.value() - bid.value()) / mid).to_f64().unwrap_or(0.0);
            if spread_fraction > BAND_FRACTION {
                self.record_rejection(RejectionReason::InvalidQuote);
                return Err(ValidationError::InvalidQuote);
            }
        }
        Ok((bid, ask))
    }

    fn check_basic(&self, price: Decimal, volume: u32, timestamp: DateTime<Utc>) -> Result<(), ValidationError> {
        if price < PRICE_FLOOR || price > self.price_cap {
            return Err(ValidationError::PriceOutOfBounds);
        }
        if volume == 0 {
            return Err(ValidationError::VolumeOutOfBounds);
        }
        let now = Utc::now();
        let delta_ms = (now - timestamp).num_milliseconds().abs();
        if delta_ms > self.clock_tolerance.num_milliseconds() {
            return Err(ValidationError::TimestampOutOfTolerance);
        }
        Ok(())
    }
}

impl Default for FrameValidator {
    fn default() -> Self {
        Self::new(chrono::Duration::seconds(30), Decimal::from(1_000_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn es() -> Instrument {
        Instrument::new("CON.F.US.EP.Z24", "ES", dec!(0.25), dec!(12.50), "America/New_York")
    }

    #[test]
    fn accepts_well_formed_trade() {
        let validator = FrameValidator::default();
        assert!(validator.validate_trade(&es(), dec!(5000.00), 1, Utc::now()).is_ok());
    }

    #[test]
    fn aligns_trade_price_to_tick() {
        let validator = FrameValidator::default();
        let price = validator.validate_trade(&es(), dec!(5000.13), 1, Utc::now()).unwrap();
        assert_eq!(price.value(), dec!(5000.00));
    }

    #[test]
    fn rejects_price_below_floor() {
        let validator = FrameValidator::default();
        assert_eq!(
            validator.validate_trade(&es(), dec!(0.0), 1, Utc::now()),
            Err(ValidationError::PriceOutOfBounds)
        );
    }

    #[test]
    fn rejects_zero_volume() {
        let validator = FrameValidator::default();
        assert_eq!(
            validator.validate_trade(&es(), dec!(5000.00), 0, Utc::now()),
            Err(ValidationError::VolumeOutOfBounds)
        );
    }

    #[test]
    fn rejects_price_deviating_beyond_band_of_rolling_median() {
        let validator = FrameValidator::default();
        for _ in 0..10 {
            validator.validate_trade(&es(), dec!(5000.00), 1, Utc::now()).unwrap();
        }
        let result = validator.validate_trade(&es(), dec!(20000.00), 1, Utc::now());
        assert_eq!(result, Err(ValidationError::PriceOutOfBounds));
    }

    #[test]
    fn rejects_crossed_quote() {
        let validator = FrameValidator::default();
        let result = validator.validate_quote(&es(), dec!(5001.0), dec!(5000.0));
        assert_eq!(result, Err(ValidationError::InvalidQuote));
    }

    #[test]
    fn tallies_rejection_reasons() {
        let validator = FrameValidator::default();
        let _ = validator.validate_trade(&es(), dec!(0.0), 1, Utc::now());
        let _ = validator.validate_trade(&es(), dec!(0.0), 1, Utc::now());
        assert_eq!(validator.rejection_tally().get(&RejectionReason::PriceOutOfBounds), Some(&2));
    }
}
