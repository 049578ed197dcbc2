// =============================================================================
// Money — tick-aligned decimal price and size arithmetic
// =============================================================================
//
// Float is banned from every price and P&L path. `Price` and `Size` wrap
// `rust_decimal::Decimal` / signed integers respectively and only ever
// change hands through the alignment helpers below, so a non-tick-aligned
// price cannot silently leak into a bar, a book level or an order.
// =============================================================================

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::{Deserialize, Serialize};

/// Contract identity and tick geometry. Immutable for the life of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Opaque broker contract id, e.g. `CON.F.US.EP.Z24`.
    pub contract_id: String,
    /// Uppercased root symbol, e.g. `ES`.
    pub symbol: String,
    /// Smallest allowed price increment.
    pub tick_size: Decimal,
    /// Currency value of one tick for one contract.
    pub tick_value: Decimal,
    /// IANA timezone name the instrument's session is defined against.
    pub timezone: String,
}

impl Instrument {
    pub fn new(
        contract_id: impl Into<String>,
        symbol: impl Into<String>,
        tick_size: Decimal,
        tick_value: Decimal,
        timezone: impl Into<String>,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            symbol: symbol.into().to_uppercase(),
            tick_size,
            tick_value,
            timezone: timezone.into(),
        }
    }

    /// Align `raw` to the instrument's tick using half-to-even rounding.
    /// Returns the aligned price and whether an adjustment was made.
    pub fn align(&self, raw: Decimal) -> (Price, bool) {
        if self.tick_size.is_zero() {
            return (Price(raw), false);
        }
        let ticks = (raw / self.tick_size).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
        let aligned = ticks * self.tick_size;
        let adjusted = aligned != raw;
        (Price(aligned), adjusted)
    }

    /// `true` iff `price` is an exact integer multiple of the tick size.
    pub fn is_aligned(&self, price: &Price) -> bool {
        if self.tick_size.is_zero() {
            return true;
        }
        (price.0 / self.tick_size).fract().is_zero()
    }

    /// Currency value of moving `ticks` ticks for `size` contracts.
    pub fn tick_pnl(&self, ticks: Decimal, size: Size) -> Decimal {
        ticks * self.tick_value * Decimal::from(size.0)
    }
}

/// An exact decimal multiple of an instrument's tick size.
///
/// Comparison is exact decimal equality — no epsilon tolerance. `Price`
/// values are only ever constructed through [`Instrument::align`] or via
/// [`Price::raw`] for values already known to be tick-aligned (e.g. a value
/// just read back off the wire and re-aligned).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(pub Decimal);

impl Price {
    /// Wrap an already tick-aligned decimal without re-validating it. Callers
    /// that cannot guarantee alignment should go through
    /// [`Instrument::align`] instead.
    pub fn raw(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Tick-alignment is idempotent: `align(align(p)) == align(p)`.
    pub fn idempotent_align(&self, instrument: &Instrument) -> Price {
        instrument.align(self.0).0
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for Price {
    type Output = Price;
    fn add(self, rhs: Price) -> Price {
        Price(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Price {
    type Output = Price;
    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

/// Number of contracts. Zero is a sentinel for "flat" and is never a valid
/// order size — [`Size::new`] rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Size(u32);

impl Size {
    pub fn new(contracts: u32) -> Option<Self> {
        if contracts == 0 {
            None
        } else {
            Some(Self(contracts))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buy or sell. For positions, direction is encoded by the sign of a signed
/// quantity instead (zero means flat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// `+1` for Buy, `-1` for Sell — the sign convention used throughout the
    /// bracket geometry and position P&L math.
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// Decode the Gateway's wire encoding (`0=Buy, 1=Sell`).
    pub fn from_wire(code: u8) -> Option<Side> {
        match code {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
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
    fn align_rounds_half_to_even() {
        let instrument = es();
        let (p, adjusted) = instrument.align(dec!(5137.625));
        assert_eq!(p.value(), dec!(5137.50));
        assert!(adjusted);

        let (p2, _) = instrument.align(dec!(5137.125));
        assert_eq!(p2.value(), dec!(5137.00));
    }

    #[test]
    fn align_exact_multiple_is_unadjusted() {
        let instrument = es();
        let (p, adjusted) = instrument.align(dec!(5137.50));
        assert_eq!(p.value(), dec!(5137.50));
        assert!(!adjusted);
    }

    #[test]
    fn align_is_idempotent() {
        let instrument = es();
        let (p, _) = instrument.align(dec!(5137.62));
        let reapplied = p.idempotent_align(&instrument);
        assert_eq!(p, reapplied);
    }

    #[test]
    fn size_rejects_zero() {
        assert!(Size::new(0).is_none());
        assert_eq!(Size::new(3).unwrap().get(), 3);
    }

    #[test]
    fn side_wire_roundtrip() {
        assert_eq!(Side::from_wire(0), Some(Side::Buy));
        assert_eq!(Side::from_wire(1), Some(Side::Sell));
        assert_eq!(Side::from_wire(2), None);
        assert_eq!(Side::Buy.to_wire(), 0);
    }
}
