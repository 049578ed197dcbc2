// =============================================================================
// Suite — composition root wiring every component together
// =============================================================================
//
// Lock-order discipline: Transport -> Stream Client -> Order Engine ->
// Position Tracker -> Statistics, with Risk Manager strictly above Order
// Engine (it calls into it, never the reverse). No code path here ever
// acquires a later component's lock while holding an earlier one's.
//
// Data flow: the Stream Client is the sole emitter of `Trade`/`DepthUpdated`/
// `OrderStatusReceived`/`OrderFilled`/`PositionChanged` onto the Event Bus;
// every other component learns about the outside world only by subscribing
// to it, never by being called directly from the hub. `Suite::new` wires that
// fan-out once, here, so no subscriber is ever missing when the Stream Client
// starts pumping frames.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bars::{BarAggregator, BarAggregatorConfig};
use crate::book::BookEngine;
use crate::clock::SessionClock;
use crate::config::{Credentials, SuiteConfig};
use crate::error::SuiteError;
use crate::event_bus::{Envelope, Event, EventBus, SideTag};
use crate::money::{Instrument, Side};
use crate::orders::{ExecutionMode, OrderEngine, OrderEngineConfig, OrderStatus};
use crate::position::{Fill, PositionTracker};
use crate::risk::RiskManager;
use crate::stats::{HealthWeights, Statistics};
use crate::stream::{StreamClient, StreamClientConfig};
use crate::transport::{Transport, TransportConfig};
use crate::validation::FrameValidator;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);

/// Every long-lived handle a caller needs after constructing a [`Suite`].
/// Kept as a separate struct (rather than exposing `Suite`'s fields directly)
/// so the suite can change its internal wiring without breaking callers that
/// only ever touch these handles.
pub struct SuiteHandles {
    pub transport: Arc<Transport>,
    pub stream: Arc<StreamClient>,
    pub bars: Arc<BarAggregator>,
    pub book: Arc<BookEngine>,
    pub orders: Arc<OrderEngine>,
    pub positions: Arc<PositionTracker>,
    pub risk: Arc<RiskManager>,
    pub stats: Arc<Statistics>,
    pub events: Arc<EventBus>,
}

/// Owns every subsystem and drives construction/shutdown in the order the
/// concurrency model requires.
pub struct Suite {
    handles: SuiteHandles,
    config: SuiteConfig,
    instrument: Instrument,
    reconcile_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Suite {
    pub fn new(config: SuiteConfig, credentials: Credentials) -> Result<Self, SuiteError> {
        let events = Arc::new(EventBus::new(64, std::time::Duration::from_secs(2)));

        let session_clock = SessionClock::new(&config.timezone, config.session_config.clone()).map_err(|e| SuiteError::Configuration(e.to_string()))?;

        let instrument = Instrument::new(config.contract_id.clone(), config.symbol.clone(), config.tick_size, config.tick_value, config.timezone.clone());

        let transport_config = TransportConfig {
            api_key: credentials.api_key,
            api_secret: credentials.api_secret,
            max_attempts: config.thresholds.transport_max_attempts,
            ..TransportConfig::default()
        };
        let transport = Arc::new(Transport::new(transport_config));
        transport.cache_instrument(instrument.clone());

        let validator = Arc::new(FrameValidator::default());
        let stream = Arc::new(StreamClient::new(
            StreamClientConfig {
                market_url: std::env::var("GATEWAY_MARKET_WS_URL").unwrap_or_default(),
                user_url: std::env::var("GATEWAY_USER_WS_URL").unwrap_or_default(),
            },
            transport.token_store(),
            events.clone(),
            validator,
            transport.instrument_cache(),
        ));

        let timeframes_secs: Vec<u32> = config.timeframes_secs.iter().map(|&t| t as u32).collect();
        let bar_config = BarAggregatorConfig { timeframes_secs, ..BarAggregatorConfig::default() };
        let bars = Arc::new(BarAggregator::new(bar_config, events.clone()));
        bars.register_instrument(&config.contract_id, session_clock.clone());

        let book = Arc::new(BookEngine::new());

        let execution_mode = if config.has_feature("paper_trading") { ExecutionMode::Paper } else { ExecutionMode::Live };
        let order_config = OrderEngineConfig { execution_mode, ..OrderEngineConfig::default() };
        let orders = Arc::new(OrderEngine::new(order_config, transport.clone(), events.clone()));

        let positions = Arc::new(PositionTracker::new());

        let risk = Arc::new(RiskManager::new(orders.clone(), session_clock));

        let stats = Arc::new(Statistics::with_weights(events.clone(), HealthWeights::from(&config.thresholds.health_weights)));

        Self::wire_event_fanout(&events, &bars, &book, &orders, &positions, &instrument);

        info!(contract_id = %config.contract_id, ?execution_mode, "suite constructed");

        Ok(Self {
            handles: SuiteHandles { transport, stream, bars, book, orders, positions, risk, stats, events },
            config,
            instrument,
            reconcile_task: parking_lot::Mutex::new(None),
        })
    }

    /// Subscribe every downstream component to the events the Stream Client
    /// emits, so a frame accepted by the hub always reaches bars, book,
    /// orders, and positions with no further wiring required at call sites.
    fn wire_event_fanout(
        events: &Arc<EventBus>,
        bars: &Arc<BarAggregator>,
        book: &Arc<BookEngine>,
        orders: &Arc<OrderEngine>,
        positions: &Arc<PositionTracker>,
        instrument: &Instrument,
    ) {
        let bars_handle = bars.clone();
        let book_handle = book.clone();
        let positions_handle = positions.clone();
        let instrument_handle = instrument.clone();
        events.subscribe(0, move |env: Envelope| {
            let bars = bars_handle.clone();
            let book = book_handle.clone();
            let positions = positions_handle.clone();
            let instrument = instrument_handle.clone();
            async move {
                if let Event::Trade { contract_id, price, size, timestamp } = env.event {
                    bars.handle_trade(&contract_id, price.value(), size, timestamp);
                    book.record_trade(&contract_id, price.value(), Decimal::from(size));
                    positions.mark_to_market(&instrument, &contract_id, price.value());
                }
            }
        });

        let book_handle = book.clone();
        events.subscribe(0, move |env: Envelope| {
            let book = book_handle.clone();
            async move {
                if let Event::DepthUpdated { contract_id, side, price, volume } = env.event {
                    let side = match side {
                        SideTag::Bid => Side::Buy,
                        SideTag::Ask => Side::Sell,
                    };
                    book.apply_depth_update(&contract_id, side, price.value(), volume, Utc::now());
                }
            }
        });

        let orders_handle = orders.clone();
        events.subscribe(0, move |env: Envelope| {
            let orders = orders_handle.clone();
            async move {
                if let Event::OrderStatusReceived { order_id, status, filled_size, avg_fill_price } = env.event {
                    if let Some(wire_status) = OrderStatus::from_wire(&status) {
                        orders.record_fill(order_id, filled_size, avg_fill_price, wire_status);
                    }
                }
            }
        });

        let orders_handle = orders.clone();
        let positions_handle = positions.clone();
        let instrument_handle = instrument.clone();
        let events_handle = events.clone();
        events.subscribe(0, move |env: Envelope| {
            let orders = orders_handle.clone();
            let positions = positions_handle.clone();
            let instrument = instrument_handle.clone();
            let events = events_handle.clone();
            async move {
                let Event::OrderFilled { order_id } = env.event else { return };
                let Some(order) = orders.get(order_id) else { return };
                if order.filled_size == 0 {
                    return;
                }
                let Some(price) = order.avg_fill_price.or(order.price) else { return };

                let was_flat = positions.is_flat(&order.contract_id);
                positions
                    .process_fill(&instrument, Fill { fill_id: order_id, contract_id: order.contract_id.clone(), side: order.side, size: order.filled_size, price })
                    .await;
                let is_flat = positions.is_flat(&order.contract_id);

                if !was_flat && is_flat {
                    events.emit(Event::PositionClosed { contract_id: order.contract_id });
                } else if was_flat && !is_flat {
                    events.emit(Event::PositionOpened { contract_id: order.contract_id });
                } else {
                    events.emit(Event::PositionChanged { contract_id: order.contract_id });
                }
            }
        });

        let orders_handle = orders.clone();
        events.subscribe(0, move |env: Envelope| {
            let orders = orders_handle.clone();
            async move {
                if let Event::PositionChanged { contract_id } = env.event {
                    let (checked, corrected) = orders.reconcile_once().await;
                    debug!(contract_id, checked, corrected, "reconciliation sweep after broker position change");
                }
            }
        });
    }

    pub fn handles(&self) -> &SuiteHandles {
        &self.handles
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Start the Stream Client's background hub tasks and the periodic
    /// reconciliation sweep. Everything downstream (bars, book, orders,
    /// positions) is already constructed and subscribed before this call, so
    /// no frame is ever dropped for lack of a subscriber.
    pub fn start(&self) {
        self.handles.stream.connect();

        let orders = self.handles.orders.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECONCILE_INTERVAL);
            ticker.tick().await; // first tick fires immediately, skip it
            loop {
                ticker.tick().await;
                let (checked, corrected) = orders.reconcile_once().await;
                if corrected > 0 {
                    info!(checked, corrected, "periodic reconciliation applied broker drift");
                }
            }
        });
        *self.reconcile_task.lock() = Some(handle);

        info!("suite started");
    }

    /// Reverse-topological shutdown: stop the reconciliation timer and the
    /// Stream Client first so no new frame or drift-correction starts, run
    /// one last reconciliation pass so Order Engine's state reflects the
    /// broker's truth, clean up settled orders, and drain the Event Bus last
    /// so components can still react to final events.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reconcile_task.lock().take() {
            handle.abort();
        }
        self.handles.stream.disconnect().await;

        let (checked, corrected) = self.handles.orders.reconcile_once().await;
        info!(checked, corrected, "final reconciliation sweep before shutdown");
        self.handles.orders.cleanup_terminal_orders(Utc::now());

        self.handles.events.shutdown(64).await;
        info!(contract_id = %self.instrument.contract_id, "suite shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_config() -> SuiteConfig {
        SuiteConfig {
            contract_id: "CON.F.US.EP.Z24".into(),
            symbol: "ES".into(),
            tick_size: dec!(0.25),
            tick_value: dec!(12.50),
            timeframes_secs: vec![60],
            features: vec!["orderbook".into(), "risk_manager".into()],
            initial_days: 1,
            timezone: "America/New_York".into(),
            session_config: crate::clock::SessionConfig::default(),
            thresholds: crate::config::Thresholds::default(),
        }
    }

    #[test]
    fn constructs_with_every_handle_present() {
        let suite = Suite::new(test_config(), Credentials { api_key: "key".into(), api_secret: "secret".into() }).unwrap();
        assert!(!suite.handles().stream.is_connected());
        assert_eq!(suite.config().contract_id, "CON.F.US.EP.Z24");
    }

    #[tokio::test]
    async fn trade_event_reaches_bars_and_book() {
        let suite = Suite::new(test_config(), Credentials { api_key: "key".into(), api_secret: "secret".into() }).unwrap();
        suite.handles().events.emit(Event::Trade {
            contract_id: "CON.F.US.EP.Z24".into(),
            price: crate::money::Price::raw(dec!(5000.00)),
            size: 2,
            timestamp: Utc::now(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(suite.handles().bars.current_price("CON.F.US.EP.Z24"), Some(dec!(5000.00)));
    }
}
