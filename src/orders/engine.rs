// =============================================================================
// Order Engine — validate, align, submit, track, and bracket orders (§4.7)
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{OrderError, TransportError};
use crate::event_bus::{Event, EventBus};
use crate::money::{Instrument, Side};
use crate::orders::oco::OcoLinks;
use crate::orders::types::{Bracket, BracketSpec, EntryType, Order, OrderStatus, OrderType};
use crate::stream::CircuitBreaker;
use crate::transport::Transport;

const DEFAULT_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);
const RECONCILE_CIRCUIT_THRESHOLD: u32 = 10;
const RECONCILE_CIRCUIT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Serialize)]
struct SubmitRequest {
    contract_id: String,
    side: u8,
    order_type: &'static str,
    size: u32,
    price: Option<Decimal>,
    stop_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    broker_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    filled_size: u32,
}

/// Whether the engine submits orders to the Gateway or simulates fills
/// in-process. Paper mode never contacts Transport for order placement,
/// cancellation, or reconciliation — every order fills immediately at its
/// requested price (or `instrument.tick_size` above/below the prior close
/// for a market order, since there is no book to cross).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    Paper,
    Live,
}

pub struct OrderEngineConfig {
    pub entry_timeout: Duration,
    pub retention: Duration,
    pub execution_mode: ExecutionMode,
}

impl Default for OrderEngineConfig {
    fn default() -> Self {
        Self { entry_timeout: DEFAULT_ENTRY_TIMEOUT, retention: DEFAULT_RETENTION, execution_mode: ExecutionMode::Live }
    }
}

pub struct OrderEngine {
    config: OrderEngineConfig,
    transport: Arc<Transport>,
    events: Arc<EventBus>,
    orders: RwLock<HashMap<Uuid, Order>>,
    oco: OcoLinks,
    contract_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    reconcile_breaker: CircuitBreaker,
}

impl OrderEngine {
    pub fn new(config: OrderEngineConfig, transport: Arc<Transport>, events: Arc<EventBus>) -> Self {
        Self {
            config,
            transport,
            events,
            orders: RwLock::new(HashMap::new()),
            oco: OcoLinks::new(),
            contract_locks: AsyncMutex::new(HashMap::new()),
            reconcile_breaker: CircuitBreaker::new(RECONCILE_CIRCUIT_THRESHOLD, RECONCILE_CIRCUIT_WINDOW),
        }
    }

    async fn lock_for(&self, contract_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.contract_locks.lock().await;
        locks.entry(contract_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub fn get(&self, order_id: Uuid) -> Option<Order> {
        self.orders.read().get(&order_id).cloned()
    }

    // -------------------------------------------------------------------
    // Simple order placement
    // -------------------------------------------------------------------

    pub async fn place_market(&self, instrument: &Instrument, side: Side, size: u32) -> Result<Order, OrderError> {
        let size = validate_size(size)?;
        self.place_internal(instrument, side, OrderType::Market, size.get(), None, None, None).await
    }

    pub async fn place_limit(&self, instrument: &Instrument, side: Side, size: u32, price: Decimal) -> Result<Order, OrderError> {
        let size = validate_size(size)?;
        let (aligned, _) = instrument.align(price);
        self.place_internal(instrument, side, OrderType::Limit, size.get(), Some(aligned.value()), None, None).await
    }

    pub async fn place_stop(&self, instrument: &Instrument, side: Side, size: u32, stop_price: Decimal) -> Result<Order, OrderError> {
        let size = validate_size(size)?;
        let (aligned, _) = instrument.align(stop_price);
        self.place_internal(instrument, side, OrderType::Stop, size.get(), None, Some(aligned.value()), None).await
    }

    pub async fn place_stop_limit(&self, instrument: &Instrument, side: Side, size: u32, stop_price: Decimal, limit_price: Decimal) -> Result<Order, OrderError> {
        let size = validate_size(size)?;
        let (aligned_stop, _) = instrument.align(stop_price);
        let (aligned_limit, _) = instrument.align(limit_price);
        self.place_internal(instrument, side, OrderType::StopLimit, size.get(), Some(aligned_limit.value()), Some(aligned_stop.value()), None).await
    }

    async fn place_internal(
        &self,
        instrument: &Instrument,
        side: Side,
        order_type: OrderType,
        size: u32,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
        bracket_id: Option<Uuid>,
    ) -> Result<Order, OrderError> {
        let contract_lock = self.lock_for(&instrument.contract_id).await;
        let _guard = contract_lock.lock().await;

        let mut order = Order::new(instrument.contract_id.clone(), side, order_type, size);
        order.price = price;
        order.stop_price = stop_price;
        order.bracket_id = bracket_id;

        if self.config.execution_mode == ExecutionMode::Paper {
            order.broker_id = Some(format!("paper-{}", order.id));
            order.filled_size = size;
            order.avg_fill_price = price.or(stop_price);
            order.status = OrderStatus::Filled;
            order.updated_at = Utc::now();
            self.orders.write().insert(order.id, order.clone());
            self.events.emit(Event::OrderPlaced { order_id: order.id });
            self.events.emit(Event::OrderFilled { order_id: order.id });
            info!(order_id = %order.id, contract_id = %instrument.contract_id, "paper order filled");
            return Ok(order);
        }

        let request = SubmitRequest {
            contract_id: instrument.contract_id.clone(),
            side: side.to_wire(),
            order_type: match order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
                OrderType::Stop => "stop",
                OrderType::StopLimit => "stop_limit",
            },
            size,
            price,
            stop_price,
        };

        let response: SubmitResponse = self
            .transport
            .request("orders", Method::POST, "/orders", Some(&request))
            .await
            .map_err(OrderError::Transport)?;

        order.broker_id = Some(response.broker_id);
        order.updated_at = Utc::now();
        self.orders.write().insert(order.id, order.clone());
        self.events.emit(Event::OrderPlaced { order_id: order.id });
        info!(order_id = %order.id, contract_id = %instrument.contract_id, "order placed");
        Ok(order)
    }

    pub async fn modify(&self, order_id: Uuid, new_price: Option<Decimal>, new_stop_price: Option<Decimal>) -> Result<Order, OrderError> {
        let existing = self.get(order_id).ok_or(OrderError::NotFound(order_id))?;
        if existing.is_terminal() {
            return Err(OrderError::TerminalState);
        }
        let contract_lock = self.lock_for(&existing.contract_id).await;
        let _guard = contract_lock.lock().await;

        #[derive(Serialize)]
        struct ModifyRequest {
            price: Option<Decimal>,
            stop_price: Option<Decimal>,
        }
        let _: serde_json::Value = self
            .transport
            .request("orders", Method::PATCH, &format!("/orders/{order_id}"), Some(&ModifyRequest { price: new_price, stop_price: new_stop_price }))
            .await
            .map_err(OrderError::Transport)?;

        let mut orders = self.orders.write();
        let order = orders.get_mut(&order_id).ok_or(OrderError::NotFound(order_id))?;
        if let Some(p) = new_price {
            order.price = Some(p);
        }
        if let Some(s) = new_stop_price {
            order.stop_price = Some(s);
        }
        order.updated_at = Utc::now();
        let updated = order.clone();
        drop(orders);
        self.events.emit(Event::OrderModified { order_id });
        Ok(updated)
    }

    /// Cancel is idempotent: cancelling an order already in a terminal state
    /// returns success without contacting Transport again.
    pub async fn cancel(&self, order_id: Uuid) -> Result<(), OrderError> {
        let existing = self.get(order_id).ok_or(OrderError::NotFound(order_id))?;
        if existing.is_terminal() {
            return Ok(());
        }

        let contract_lock = self.lock_for(&existing.contract_id).await;
        let _guard = contract_lock.lock().await;

        let result: Result<serde_json::Value, TransportError> =
            self.transport.request::<(), _>("orders", Method::DELETE, &format!("/orders/{order_id}"), None).await;
        if let Err(e) = result {
            warn!(order_id = %order_id, error = %e, "cancel request failed");
            return Err(OrderError::Transport(e));
        }

        {
            let mut orders = self.orders.write();
            if let Some(order) = orders.get_mut(&order_id) {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
            }
        }
        self.events.emit(Event::OrderCancelled { order_id });
        self.cancel_sibling(order_id).await;
        Ok(())
    }

    async fn cancel_sibling(&self, order_id: Uuid) {
        if let Some(sibling_id) = self.oco.unlink(order_id) {
            let sibling = self.get(sibling_id);
            if let Some(sibling) = sibling {
                if !sibling.is_terminal() {
                    if let Err(e) = Box::pin(self.cancel(sibling_id)).await {
                        warn!(order_id = %sibling_id, error = %e, "failed to cancel OCO sibling");
                    }
                }
            }
        }
    }

    /// Called when the Stream Client reports a fill or fresh status for an
    /// order already being tracked.
    pub fn record_fill(&self, order_id: Uuid, filled_size: u32, avg_fill_price: Option<Decimal>, status: OrderStatus) {
        let mut orders = self.orders.write();
        if let Some(order) = orders.get_mut(&order_id) {
            order.filled_size = filled_size;
            if avg_fill_price.is_some() {
                order.avg_fill_price = avg_fill_price;
            }
            order.status = status;
            order.updated_at = Utc::now();
        }
        drop(orders);
        match status {
            OrderStatus::Filled => self.events.emit(Event::OrderFilled { order_id }),
            OrderStatus::Cancelled => self.events.emit(Event::OrderCancelled { order_id }),
            OrderStatus::Rejected => self.events.emit(Event::OrderRejected { order_id, reason: "broker rejection".into() }),
            _ => {}
        }
    }

    // -------------------------------------------------------------------
    // Bracket orders
    // -------------------------------------------------------------------

    pub async fn place_bracket(&self, instrument: &Instrument, spec: BracketSpec) -> Result<Bracket, OrderError> {
        if spec.entry_type == EntryType::Limit && spec.entry_price.is_none() {
            return Err(OrderError::MissingEntryPrice);
        }
        if spec.stop_offset_ticks == 0 || spec.target_offset_ticks == 0 {
            return Err(OrderError::InvalidBracketGeometry);
        }

        let bracket_id = Uuid::new_v4();

        let entry_order = match spec.entry_type {
            EntryType::Market => self.place_internal(instrument, spec.side, OrderType::Market, spec.size, None, None, Some(bracket_id)).await?,
            EntryType::Limit => {
                let price = spec.entry_price.unwrap();
                let (aligned, _) = instrument.align(price);
                self.place_internal(instrument, spec.side, OrderType::Limit, spec.size, Some(aligned.value()), None, Some(bracket_id)).await?
            }
        };

        let filled_size = self.wait_for_entry_fill(entry_order.id, self.config.entry_timeout).await?;
        if filled_size == 0 {
            self.cancel(entry_order.id).await.ok();
            return Err(OrderError::EntryTimeout);
        }
        if filled_size < entry_order.size {
            self.cancel(entry_order.id).await.ok();
        }

        let entry_price = match self.get(entry_order.id).and_then(|o| o.avg_fill_price.or(o.price)) {
            Some(price) => price,
            None => {
                self.emergency_flatten(instrument, spec.side, filled_size).await;
                return Err(OrderError::MissingEntryPrice);
            }
        };
        let (stop_price, target_price) = self.protective_prices(instrument, spec.side, entry_price, spec.stop_offset_ticks, spec.target_offset_ticks)?;

        let protective_side = spec.side.opposite();
        let stop_result = self.place_protective_with_retry(instrument, protective_side, filled_size, stop_price, true).await;
        let target_result = self.place_protective_with_retry(instrument, protective_side, filled_size, target_price, false).await;

        match (stop_result, target_result) {
            (Ok(stop_order), Ok(target_order)) => {
                self.oco.link(stop_order.id, target_order.id);
                self.events.emit(Event::BracketOpened { bracket_id });
                Ok(Bracket { id: bracket_id, contract_id: instrument.contract_id.clone(), entry_order_id: entry_order.id, stop_order_id: Some(stop_order.id), target_order_id: Some(target_order.id) })
            }
            (stop_outcome, target_outcome) => {
                if let Ok(order) = &stop_outcome {
                    self.cancel(order.id).await.ok();
                }
                if let Ok(order) = &target_outcome {
                    self.cancel(order.id).await.ok();
                }
                self.emergency_flatten(instrument, spec.side, filled_size).await;
                let reason = stop_outcome.err().or(target_outcome.err()).map(|e| e.to_string()).unwrap_or_default();
                Err(OrderError::ProtectionFailed(reason))
            }
        }
    }

    fn protective_prices(&self, instrument: &Instrument, entry_side: Side, entry_price: Decimal, stop_offset_ticks: u32, target_offset_ticks: u32) -> Result<(Decimal, Decimal), OrderError> {
        let tick = instrument.tick_size;
        let stop_offset = tick * Decimal::from(stop_offset_ticks);
        let target_offset = tick * Decimal::from(target_offset_ticks);
        let (stop, target) = match entry_side {
            Side::Buy => (entry_price - stop_offset, entry_price + target_offset),
            Side::Sell => (entry_price + stop_offset, entry_price - target_offset),
        };
        let valid = match entry_side {
            Side::Buy => stop < entry_price && entry_price < target,
            Side::Sell => target < entry_price && entry_price < stop,
        };
        if !valid {
            return Err(OrderError::InvalidBracketGeometry);
        }
        Ok((instrument.align(stop).0.value(), instrument.align(target).0.value()))
    }

    async fn place_protective_with_retry(&self, instrument: &Instrument, side: Side, size: u32, price: Decimal, is_stop: bool) -> Result<Order, OrderError> {
        let order_type = if is_stop { OrderType::Stop } else { OrderType::Limit };
        let (price_field, stop_field) = if is_stop { (None, Some(price)) } else { (Some(price), None) };

        match self.place_internal(instrument, side, order_type, size, price_field, stop_field, None).await {
            Ok(order) => Ok(order),
            Err(_) => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                self.place_internal(instrument, side, order_type, size, price_field, stop_field, None).await
            }
        }
    }

    async fn emergency_flatten(&self, instrument: &Instrument, entry_side: Side, filled_size: u32) {
        warn!(contract_id = %instrument.contract_id, "attempting emergency market close after bracket protection failure");
        let close_side = entry_side.opposite();
        let result = self.place_internal(instrument, close_side, OrderType::Market, filled_size, None, None, None).await;
        if let Err(e) = result {
            warn!(contract_id = %instrument.contract_id, error = %e, "emergency flatten failed; position may remain unprotected");
        }
    }

    async fn wait_for_entry_fill(&self, order_id: Uuid, timeout: Duration) -> Result<u32, OrderError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = Duration::from_millis(250);
        loop {
            if let Some(order) = self.get(order_id) {
                if order.status == OrderStatus::Filled {
                    return Ok(order.filled_size);
                }
                if order.is_terminal() {
                    return Ok(order.filled_size);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(self.get(order_id).map(|o| o.filled_size).unwrap_or(0));
            }
            tokio::time::sleep(delay.min(Duration::from_secs(5))).await;
            delay = (delay * 2).min(Duration::from_secs(5));
        }
    }

    // -------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------

    /// Query tracking first; on a cache miss consult Transport with
    /// exponential backoff, bounded by a circuit breaker after repeated
    /// failures.
    pub async fn is_filled(&self, order_id: Uuid) -> Result<bool, OrderError> {
        if let Some(order) = self.get(order_id) {
            return Ok(order.status == OrderStatus::Filled);
        }

        if self.reconcile_breaker.is_open() {
            return Err(OrderError::CircuitOpen);
        }

        let mut delay = Duration::from_millis(500);
        for attempt in 0..5 {
            let result: Result<StatusResponse, TransportError> =
                self.transport.request::<(), _>("orders", Method::GET, &format!("/orders/{order_id}/status"), None).await;
            match result {
                Ok(status) => {
                    self.reconcile_breaker.record_success();
                    return Ok(status.status == "filled");
                }
                Err(e) => {
                    if attempt == 4 {
                        self.reconcile_breaker.record_failure();
                        return Err(OrderError::Transport(e));
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(30));
                }
            }
        }
        unreachable!()
    }

    /// Sweep every non-terminal tracked order against Transport's view and
    /// pull in any status/fill the Stream Client missed (a dropped
    /// `OrderUpdate` frame, a reconnect gap). Returns `(checked, corrected)`.
    /// In [`ExecutionMode::Paper`] there is nothing to reconcile against —
    /// every paper order is already terminal the instant it is placed.
    pub async fn reconcile_once(&self) -> (usize, usize) {
        if self.config.execution_mode == ExecutionMode::Paper {
            return (0, 0);
        }
        if self.reconcile_breaker.is_open() {
            return (0, 0);
        }

        let pending: Vec<Uuid> = self.orders.read().iter().filter(|(_, o)| !o.is_terminal()).map(|(id, _)| *id).collect();
        let mut corrected = 0;
        for order_id in &pending {
            let result: Result<StatusResponse, TransportError> =
                self.transport.request::<(), _>("orders", Method::GET, &format!("/orders/{order_id}/status"), None).await;
            match result {
                Ok(status) => {
                    self.reconcile_breaker.record_success();
                    if let Some(wire_status) = OrderStatus::from_wire(&status.status) {
                        let locally_tracked = self.get(*order_id);
                        let drifted = locally_tracked
                            .map(|o| o.status != wire_status || o.filled_size != status.filled_size)
                            .unwrap_or(false);
                        if drifted {
                            warn!(order_id = %order_id, wire_status = %status.status, "reconciliation found drift, applying broker state");
                            self.record_fill(*order_id, status.filled_size, None, wire_status);
                            corrected += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(order_id = %order_id, error = %e, "reconciliation status check failed");
                    self.reconcile_breaker.record_failure();
                }
            }
        }
        (pending.len(), corrected)
    }

    /// Evict completed/terminal orders older than `retention`. Active orders
    /// are never evicted. Intended to run on a periodic schedule.
    pub fn cleanup_terminal_orders(&self, now: chrono::DateTime<Utc>) {
        let mut orders = self.orders.write();
        orders.retain(|_, order| !order.is_terminal() || now - order.updated_at < chrono::Duration::from_std(self.config.retention).unwrap_or_default());
    }

    pub fn tracked_order_count(&self) -> usize {
        self.orders.read().len()
    }
}

fn validate_size(size: u32) -> Result<crate::money::Size, OrderError> {
    crate::money::Size::new(size).ok_or(OrderError::InvalidPrice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracket_geometry_validated_for_longs() {
        use rust_decimal_macros::dec;
        let instrument = Instrument::new("CON.F.US.EP.Z24", "ES", dec!(0.25), dec!(12.50), "America/New_York");
        let transport = Arc::new(Transport::new(crate::transport::TransportConfig::default()));
        let events = Arc::new(EventBus::new(4, Duration::from_secs(1)));
        let engine = OrderEngine::new(OrderEngineConfig::default(), transport, events);
        let result = engine.protective_prices(&instrument, Side::Buy, dec!(5000), 10, 20);
        assert!(result.is_ok());
        let (stop, target) = result.unwrap();
        assert!(stop < dec!(5000) && dec!(5000) < target);
    }
}
