// =============================================================================
// Bar — a single OHLCV bucket
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub contract_id: String,
    pub timeframe_secs: u32,
    pub bucket_start: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub trade_count: u32,
    pub closed: bool,
}

impl Bar {
    pub fn open_at(contract_id: impl Into<String>, timeframe_secs: u32, bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            contract_id: contract_id.into(),
            timeframe_secs,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            trade_count: 0,
            closed: false,
        }
    }

    /// Fold one trade into this bar's OHLCV fields.
    pub fn apply_trade(&mut self, price: Decimal, size: u32) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += size as u64;
        self.trade_count += 1;
    }

    pub fn bucket_end(&self) -> DateTime<Utc> {
        self.bucket_start + chrono::Duration::seconds(self.timeframe_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn apply_trade_updates_high_low_close() {
        let mut bar = Bar::open_at("ES", 60, Utc::now(), dec!(5000));
        bar.apply_trade(dec!(5010), 2);
        bar.apply_trade(dec!(4990), 3);
        bar.apply_trade(dec!(5005), 1);
        assert_eq!(bar.open, dec!(5000));
        assert_eq!(bar.high, dec!(5010));
        assert_eq!(bar.low, dec!(4990));
        assert_eq!(bar.close, dec!(5005));
        assert_eq!(bar.volume, 6);
        assert_eq!(bar.trade_count, 3);
    }
}
