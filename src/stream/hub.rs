// =============================================================================
// Hub connection — one long-lived streaming socket (market or user) (§4.2)
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StreamError;
use crate::event_bus::{Event, EventBus, HubTag};
use crate::stream::backoff::{BackoffConfig, CircuitBreaker, ReconnectBackoff};
use crate::stream::frame::{IngressSequencer, RawFrame};
use crate::stream::state::ConnectionState;
use crate::transport::{InstrumentCache, SharedTokenStore};
use crate::validation::FrameValidator;

const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(15);
const TOKEN_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_DEADLINE: Duration = Duration::from_secs(2);
const CIRCUIT_THRESHOLD: u32 = 10;
const CIRCUIT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub struct HubHealth {
    pub state: String,
    pub consecutive_failures: u32,
    pub circuit_open_cooldown: Option<Duration>,
}

/// One of the two long-lived streaming sockets. `stream_url` must already
/// carry the session token as a query parameter — the Gateway's wire
/// protocol requires it there rather than as a header.
pub struct HubConnection {
    kind: HubTag,
    base_url: String,
    tokens: SharedTokenStore,
    events: Arc<EventBus>,
    validator: Arc<FrameValidator>,
    instruments: Arc<InstrumentCache>,
    state: RwLock<ConnectionState>,
    backoff: Mutex<ReconnectBackoff>,
    breaker: CircuitBreaker,
    subscriptions: RwLock<Vec<String>>,
    token_lock: tokio::sync::Mutex<()>,
    last_heartbeat: Mutex<std::time::Instant>,
    cancel: CancellationToken,
    connected_once: AtomicBool,
    reconnect_notify: Notify,
}

impl HubConnection {
    pub fn new(
        kind: HubTag,
        base_url: impl Into<String>,
        tokens: SharedTokenStore,
        events: Arc<EventBus>,
        validator: Arc<FrameValidator>,
        instruments: Arc<InstrumentCache>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            base_url: base_url.into(),
            tokens,
            events,
            validator,
            instruments,
            state: RwLock::new(ConnectionState::Disconnected),
            backoff: Mutex::new(ReconnectBackoff::new(BackoffConfig::default())),
            breaker: CircuitBreaker::new(CIRCUIT_THRESHOLD, CIRCUIT_WINDOW),
            subscriptions: RwLock::new(Vec::new()),
            token_lock: tokio::sync::Mutex::new(()),
            last_heartbeat: Mutex::new(std::time::Instant::now()),
            cancel: CancellationToken::new(),
            connected_once: AtomicBool::new(false),
            reconnect_notify: Notify::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn health(&self) -> HubHealth {
        HubHealth {
            state: self.state().to_string(),
            consecutive_failures: self.backoff.lock().consecutive_failures(),
            circuit_open_cooldown: self.breaker.open_cooldown(),
        }
    }

    fn transition(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if state.can_transition_to(next) {
            let previous = *state;
            *state = next;
            drop(state);
            debug!(hub = ?self.kind, from = %previous, to = %next, "connection state transition");
            self.events.emit(Event::ConnectionStateChanged { hub: self.kind, state: next.to_string() });
        } else {
            warn!(hub = ?self.kind, from = %*state, to = %next, "ignored illegal state transition");
        }
    }

    /// Record a subscription message so it can be replayed after a
    /// reconnect. Does not itself send anything over the wire.
    pub fn add_subscription(&self, message: String) {
        self.subscriptions.write().push(message);
    }

    /// Run the connect/reconnect loop until `disconnect` cancels it. Spawned
    /// as a background task by [`crate::stream::StreamClient::connect`].
    pub async fn run(self: Arc<Self>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            if let Some(cooldown) = self.breaker.open_cooldown() {
                warn!(hub = ?self.kind, ?cooldown, "circuit open, refusing connect attempt");
                tokio::select! {
                    _ = tokio::time::sleep(cooldown) => {}
                    _ = self.cancel.cancelled() => return,
                }
                continue;
            }

            self.transition(ConnectionState::Connecting);
            match self.connect_and_pump().await {
                Ok(()) => {
                    self.backoff.lock().reset();
                    self.breaker.record_success();
                    if self.cancel.is_cancelled() {
                        self.transition(ConnectionState::Disconnected);
                        return;
                    }
                    self.transition(ConnectionState::Reconnecting);
                }
                Err(e) => {
                    warn!(hub = ?self.kind, error = %e, "hub connection failed");
                    self.breaker.record_failure();
                    self.transition(ConnectionState::Reconnecting);
                }
            }

            let delay = self.backoff.lock().next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn connect_and_pump(&self) -> Result<(), StreamError> {
        let token = self
            .tokens
            .current()
            .await
            .ok_or_else(|| StreamError::ConnectFailed("no session token available".into()))?;

        let url = format!("{}?token={}", self.base_url, token.value);
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| StreamError::ConnectFailed(e.to_string()))?;

        info!(hub = ?self.kind, "hub connected");
        self.transition(ConnectionState::Connected);
        self.connected_once.store(true, Ordering::SeqCst);
        *self.last_heartbeat.lock() = std::time::Instant::now();

        let (mut write, mut read) = ws_stream.split();

        let pending_subscriptions: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        for message in pending_subscriptions {
            let _ = write.send(Message::Text(message)).await;
        }

        let mut sequencer = IngressSequencer::new();
        let mut missed_heartbeats: u8 = 0;

        loop {
            let deadline = tokio::time::sleep(HEARTBEAT_DEADLINE);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(DRAIN_DEADLINE, write.close()).await;
                    return Ok(());
                }
                _ = deadline => {
                    missed_heartbeats += 1;
                    warn!(hub = ?self.kind, missed_heartbeats, "heartbeat deadline missed");
                    if missed_heartbeats == 1 {
                        self.transition(ConnectionState::Degraded);
                    } else {
                        self.transition(ConnectionState::Reconnecting);
                        return Err(StreamError::HeartbeatMissed);
                    }
                }
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            missed_heartbeats = 0;
                            *self.last_heartbeat.lock() = std::time::Instant::now();
                            self.handle_frame(&text, &mut sequencer);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            return Err(StreamError::ConnectFailed("stream closed by peer".into()));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(StreamError::ConnectFailed(e.to_string())),
                    }
                }
            }
        }
    }

    fn handle_frame(&self, text: &str, sequencer: &mut IngressSequencer) {
        let frame = match RawFrame::decode(text) {
            Ok(f) => f,
            Err(e) => {
                warn!(hub = ?self.kind, error = %e, "dropping malformed frame");
                return;
            }
        };

        let (_, gap) = sequencer.record(frame.sequence());
        if gap {
            warn!(hub = ?self.kind, "sequence gap detected on inbound frame");
            self.transition(ConnectionState::Degraded);
        }

        match frame {
            RawFrame::Heartbeat { .. } => {}
            RawFrame::Trade { contract_id, price, size, timestamp, .. } => {
                let Some(instrument) = self.instruments.get(&contract_id) else {
                    warn!(hub = ?self.kind, contract_id, "dropping trade for unknown instrument");
                    return;
                };
                match self.validator.validate_trade(&instrument, price, size, timestamp) {
                    Ok(aligned) => {
                        self.events.emit(Event::Trade { contract_id, price: aligned, size, timestamp });
                    }
                    Err(e) => {
                        warn!(hub = ?self.kind, contract_id, error = %e, "dropping invalid trade");
                    }
                }
            }
            RawFrame::Quote { contract_id, bid, ask, .. } => {
                let Some(instrument) = self.instruments.get(&contract_id) else {
                    warn!(hub = ?self.kind, contract_id, "dropping quote for unknown instrument");
                    return;
                };
                match self.validator.validate_quote(&instrument, bid, ask) {
                    Ok((bid, ask)) => {
                        self.events.emit(Event::Quote { contract_id, bid, ask });
                    }
                    Err(e) => {
                        warn!(hub = ?self.kind, contract_id, error = %e, "dropping invalid quote");
                    }
                }
            }
            RawFrame::Depth { contract_id, side, price, size, .. } => {
                let Some(instrument) = self.instruments.get(&contract_id) else {
                    warn!(hub = ?self.kind, contract_id, "dropping depth update for unknown instrument");
                    return;
                };
                if let Some(side) = RawFrame::decode_depth_side(side) {
                    let (aligned, _) = instrument.align(price);
                    self.events.emit(Event::DepthUpdated { contract_id, side: side.into(), price: aligned, volume: size });
                }
            }
            RawFrame::OrderUpdate { order_id, status, filled_size, avg_fill_price, .. } => {
                self.events.emit(Event::OrderStatusReceived { order_id, status, filled_size, avg_fill_price });
            }
            RawFrame::PositionUpdate { contract_id, .. } => {
                self.events.emit(Event::PositionChanged { contract_id });
            }
        }
    }

    /// Atomically rotate the session token this hub is using: takes the
    /// bounded token lock, re-authorizes the stream, and rolls back on
    /// failure.
    pub async fn rotate_token(&self) -> Result<(), StreamError> {
        let _guard = tokio::time::timeout(TOKEN_LOCK_TIMEOUT, self.token_lock.lock())
            .await
            .map_err(|_| StreamError::Timeout(TOKEN_LOCK_TIMEOUT))?;

        let previous = self.tokens.current().await;
        self.cancel.cancel();
        self.reconnect_notify.notify_waiters();
        // The run loop observes cancellation, tears down the socket, and a
        // fresh CancellationToken / reconnect is established by the caller
        // re-invoking `connect` with the rotated token already installed in
        // the shared TokenStore. If no new token materializes, roll back.
        if self.tokens.current().await.is_none() {
            self.tokens.rollback(previous).await;
            return Err(StreamError::TokenRotationFailed("no replacement token installed".into()));
        }
        Ok(())
    }

    pub fn request_disconnect(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruments() -> Arc<InstrumentCache> {
        Arc::new(InstrumentCache::new(10, Duration::from_secs(60)))
    }

    #[test]
    fn health_reports_disconnected_initially() {
        // Constructed purely for the state/health accessors; no network I/O.
        let events = Arc::new(EventBus::new(4, Duration::from_secs(1)));
        let validator = Arc::new(FrameValidator::default());
        let tokens = Arc::new(crate::transport::TokenStore::new(Duration::from_secs(5)));
        let hub = HubConnection::new(HubTag::Market, "wss://example", tokens, events, validator, instruments());
        assert_eq!(hub.state(), ConnectionState::Disconnected);
        assert!(!hub.is_connected());
    }

    #[test]
    fn subscriptions_accumulate_for_replay() {
        let events = Arc::new(EventBus::new(4, Duration::from_secs(1)));
        let validator = Arc::new(FrameValidator::default());
        let tokens = Arc::new(crate::transport::TokenStore::new(Duration::from_secs(5)));
        let hub = HubConnection::new(HubTag::Market, "wss://example", tokens, events, validator, instruments());
        hub.add_subscription("{\"subscribe\":\"ES\"}".into());
        assert_eq!(hub.subscriptions.read().len(), 1);
    }
}
