// =============================================================================
// Position sizing — equity/risk% + stop distance -> contract count
// =============================================================================

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::money::Instrument;

/// Number of contracts such that, if the stop fills exactly at `stop_price`,
/// realized loss is capped at `equity * risk_fraction`. Rounds down: sizing
/// never rounds in the direction that increases risk beyond the target.
pub fn size_for_risk(instrument: &Instrument, equity: Decimal, risk_fraction: Decimal, entry_price: Decimal, stop_price: Decimal) -> u32 {
    if instrument.tick_size.is_zero() || instrument.tick_value.is_zero() {
        return 0;
    }
    let distance = (entry_price - stop_price).abs();
    if distance.is_zero() {
        return 0;
    }
    let ticks_at_risk = distance / instrument.tick_size;
    let loss_per_contract = ticks_at_risk * instrument.tick_value;
    if loss_per_contract.is_zero() {
        return 0;
    }
    let risk_budget = equity * risk_fraction;
    let raw = risk_budget / loss_per_contract;
    raw.floor().to_u32().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn es() -> Instrument {
        Instrument::new("CON.F.US.EP.Z24", "ES", dec!(0.25), dec!(12.50), "America/New_York")
    }

    #[test]
    fn sizes_down_to_cap_loss_within_budget() {
        let instrument = es();
        // 10 tick stop distance -> $125/contract loss; $1000 budget -> 8 contracts.
        let size = size_for_risk(&instrument, dec!(100_000), dec!(0.01), dec!(5000), dec!(4997.5));
        assert_eq!(size, 8);
    }

    #[test]
    fn zero_distance_stop_sizes_to_zero() {
        let instrument = es();
        let size = size_for_risk(&instrument, dec!(100_000), dec!(0.01), dec!(5000), dec!(5000));
        assert_eq!(size, 0);
    }
}
