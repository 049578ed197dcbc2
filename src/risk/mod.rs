// =============================================================================
// Risk Manager — sizing, trailing stops, daily reset, managed-trade scope
//
// =============================================================================

mod daily_reset;
mod scope;
mod sizing;
mod trailing;

pub use daily_reset::{DailyCounters, DailyResetTracker};
pub use scope::{ManagedTradeScope, ScopeGuard};
pub use sizing::size_for_risk;
pub use trailing::{spawn_trailing_stop, TrailingStopHandle};

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clock::SessionClock;
use crate::error::RiskError;
use crate::money::{Instrument, Side};
use crate::orders::OrderEngine;

/// Facade composing the Risk Manager's four responsibilities behind one
/// handle, as the suite wires it.
pub struct RiskManager {
    order_engine: Arc<OrderEngine>,
    scope_guard: ScopeGuard,
    daily: DailyResetTracker,
}

impl RiskManager {
    pub fn new(order_engine: Arc<OrderEngine>, session_clock: SessionClock) -> Self {
        Self { order_engine, scope_guard: ScopeGuard::new(), daily: DailyResetTracker::new(session_clock) }
    }

    pub fn size_for_risk(&self, instrument: &Instrument, equity: Decimal, risk_fraction: Decimal, entry_price: Decimal, stop_price: Decimal) -> u32 {
        size_for_risk(instrument, equity, risk_fraction, entry_price, stop_price)
    }

    pub async fn open_scope(&self, instrument: Instrument) -> Result<ManagedTradeScope, RiskError> {
        ManagedTradeScope::open(&self.scope_guard, self.order_engine.clone(), instrument).await
    }

    pub fn spawn_trailing_stop(&self, instrument: Instrument, side: Side, stop_order_id: Uuid, trail_ticks: u32, price_updates: watch::Receiver<Decimal>) -> TrailingStopHandle {
        spawn_trailing_stop(self.order_engine.clone(), instrument, side, stop_order_id, trail_ticks, price_updates)
    }

    pub fn daily_counters(&self, now: chrono::DateTime<chrono::Utc>) -> DailyCounters {
        self.daily.snapshot(now)
    }

    pub fn record_trade_opened(&self, now: chrono::DateTime<chrono::Utc>) {
        self.daily.record_trade_opened(now);
    }

    pub fn record_trade_closed(&self, now: chrono::DateTime<chrono::Utc>, won: bool) {
        self.daily.record_trade_closed(now, won);
    }
}
