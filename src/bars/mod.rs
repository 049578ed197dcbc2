// =============================================================================
// Bars — multi-timeframe OHLCV aggregation
// =============================================================================

mod aggregator;
mod bar;
mod overflow;
mod ring;

pub use aggregator::{BarAggregator, BarAggregatorConfig};
pub use bar::Bar;
pub use overflow::OverflowStore;
pub use ring::BarRing;
