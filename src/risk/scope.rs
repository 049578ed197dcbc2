// =============================================================================
// Managed-trade scope — guaranteed cleanup around a bracket trade
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::RiskError;
use crate::money::{Instrument, Side};
use crate::orders::{Bracket, BracketSpec, EntryType, OrderEngine};
use crate::risk::sizing::size_for_risk;

/// Guards against more than one open scope per contract at a time.
pub struct ScopeGuard {
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ScopeGuard {
    pub fn new() -> Self {
        Self { locks: AsyncMutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, contract_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(contract_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

impl Default for ScopeGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// A scoped acquisition of risk capacity for one contract. Holding a
/// `ManagedTradeScope` guarantees that, however the scope ends — normal drop,
/// early return, or an async cancellation while `.enter_long`/`.enter_short`
/// is awaiting — the per-contract lock is released and any still-open bracket
/// is unwound on `close`.
pub struct ManagedTradeScope {
    order_engine: Arc<OrderEngine>,
    instrument: Instrument,
    _permit: tokio::sync::OwnedMutexGuard<()>,
    open_bracket: Option<Bracket>,
}

impl ManagedTradeScope {
    pub async fn open(guard: &ScopeGuard, order_engine: Arc<OrderEngine>, instrument: Instrument) -> Result<Self, RiskError> {
        let lock = guard.lock_for(&instrument.contract_id).await;
        let permit = lock.try_lock_owned().map_err(|_| RiskError::ScopeAlreadyOpen)?;
        Ok(Self { order_engine, instrument, _permit: permit, open_bracket: None })
    }

    pub async fn enter_long(&mut self, equity: Decimal, risk_fraction: Decimal, entry_price: Decimal, stop_price: Decimal, stop_offset_ticks: u32, target_offset_ticks: u32) -> Result<Bracket, RiskError> {
        self.enter(Side::Buy, equity, risk_fraction, entry_price, stop_price, stop_offset_ticks, target_offset_ticks).await
    }

    pub async fn enter_short(&mut self, equity: Decimal, risk_fraction: Decimal, entry_price: Decimal, stop_price: Decimal, stop_offset_ticks: u32, target_offset_ticks: u32) -> Result<Bracket, RiskError> {
        self.enter(Side::Sell, equity, risk_fraction, entry_price, stop_price, stop_offset_ticks, target_offset_ticks).await
    }

    async fn enter(&mut self, side: Side, equity: Decimal, risk_fraction: Decimal, entry_price: Decimal, stop_price: Decimal, stop_offset_ticks: u32, target_offset_ticks: u32) -> Result<Bracket, RiskError> {
        let size = size_for_risk(&self.instrument, equity, risk_fraction, entry_price, stop_price);
        if size == 0 {
            return Err(RiskError::NonPositiveSize);
        }
        let spec = BracketSpec {
            contract_id: self.instrument.contract_id.clone(),
            side,
            size,
            entry_type: EntryType::Limit,
            entry_price: Some(entry_price),
            stop_offset_ticks,
            target_offset_ticks,
        };
        let bracket = self.order_engine.place_bracket(&self.instrument, spec).await.map_err(RiskError::Order)?;
        self.open_bracket = Some(bracket.clone());
        info!(contract_id = %self.instrument.contract_id, size, "managed trade scope entered");
        Ok(bracket)
    }

    /// Unwind the scope: cancel any still-working orders from the scope's
    /// bracket. Called on every exit path via `Drop`'s synchronous fallback
    /// and, preferably, explicitly before the scope is dropped so cancellation
    /// can be awaited.
    pub async fn close(mut self) {
        if let Some(bracket) = self.open_bracket.take() {
            Self::cancel_bracket_orders(self.order_engine.clone(), bracket).await;
        }
    }

    async fn cancel_bracket_orders(order_engine: Arc<OrderEngine>, bracket: Bracket) {
        for order_id in [Some(bracket.entry_order_id), bracket.stop_order_id, bracket.target_order_id].into_iter().flatten() {
            if let Err(e) = order_engine.cancel(order_id).await {
                warn!(order_id = %order_id, error = %e, "failed to cancel order during scope cleanup");
            }
        }
    }
}

impl Drop for ManagedTradeScope {
    fn drop(&mut self) {
        if let Some(bracket) = self.open_bracket.take() {
            warn!(contract_id = %self.instrument.contract_id, "managed trade scope dropped without calling close(); cancelling bracket orders from drop");
            let order_engine = self.order_engine.clone();
            tokio::spawn(async move {
                ManagedTradeScope::cancel_bracket_orders(order_engine, bracket).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_scope_for_same_contract_is_rejected_while_first_is_open() {
        let guard = ScopeGuard::new();
        let lock = guard.lock_for("ES").await;
        let _first = lock.clone().try_lock_owned().unwrap();
        let second = lock.try_lock_owned();
        assert!(second.is_err());
    }
}
