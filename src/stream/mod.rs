// =============================================================================
// Stream Client — dual-hub (market, user) realtime data pipeline
// =============================================================================

mod backoff;
mod backpressure;
mod frame;
mod hub;
mod state;

pub use backoff::{BackoffConfig, CircuitBreaker, ReconnectBackoff};
pub use backpressure::{DepthCoalescer, DepthKey, DepthSide};
pub use frame::{IngressSequencer, RawFrame};
pub use hub::{HubConnection, HubHealth};
pub use state::ConnectionState;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::event_bus::{EventBus, HubTag};
use crate::transport::{InstrumentCache, SharedTokenStore};
use crate::validation::FrameValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Depth,
    Trades,
    Quotes,
}

#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    pub market_url: String,
    pub user_url: String,
}

/// Owns the two long-lived hub connections and exposes the public streaming
/// contract used by the rest of the suite.
pub struct StreamClient {
    market: Arc<HubConnection>,
    user: Arc<HubConnection>,
    market_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    user_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    market_subscriptions: parking_lot::Mutex<HashSet<(String, Channel)>>,
}

impl StreamClient {
    pub fn new(
        config: StreamClientConfig,
        tokens: SharedTokenStore,
        events: Arc<EventBus>,
        validator: Arc<FrameValidator>,
        instruments: Arc<InstrumentCache>,
    ) -> Self {
        let market = HubConnection::new(
            HubTag::Market,
            config.market_url,
            tokens.clone(),
            events.clone(),
            validator.clone(),
            instruments.clone(),
        );
        let user = HubConnection::new(HubTag::User, config.user_url, tokens, events, validator, instruments);
        Self {
            market,
            user,
            market_task: parking_lot::Mutex::new(None),
            user_task: parking_lot::Mutex::new(None),
            market_subscriptions: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    /// Start both hubs' connect/reconnect loops as background tasks.
    pub fn connect(&self) {
        let market = self.market.clone();
        *self.market_task.lock() = Some(tokio::spawn(async move { market.run().await }));
        let user = self.user.clone();
        *self.user_task.lock() = Some(tokio::spawn(async move { user.run().await }));
    }

    /// Cancel in-flight reads and the reconnect schedule on both hubs,
    /// draining each with its own bounded deadline.
    pub async fn disconnect(&self) {
        self.market.request_disconnect();
        self.user.request_disconnect();
        if let Some(handle) = self.market_task.lock().take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        }
        if let Some(handle) = self.user_task.lock().take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
        }
    }

    pub fn subscribe_market(&self, contract_id: impl Into<String>, channels: &[Channel]) {
        let contract_id = contract_id.into();
        let mut subs = self.market_subscriptions.lock();
        for channel in channels {
            subs.insert((contract_id.clone(), *channel));
        }
        let message = serde_json::json!({
            "action": "subscribe",
            "contract_id": contract_id,
            "channels": channels,
        })
        .to_string();
        self.market.add_subscription(message);
    }

    pub fn subscribe_user(&self, account_id: impl Into<String>) {
        let message = serde_json::json!({ "action": "subscribe_user", "account_id": account_id.into() }).to_string();
        self.user.add_subscription(message);
    }

    pub fn is_connected(&self) -> bool {
        self.market.is_connected() && self.user.is_connected()
    }

    pub fn health(&self) -> (HubHealth, HubHealth) {
        (self.market.health(), self.user.health())
    }

    /// Atomically rotate the session token both hubs authenticate with.
    pub async fn rotate_token(&self) -> Result<(), crate::error::StreamError> {
        self.market.rotate_token().await?;
        self.user.rotate_token().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TokenStore;
    use std::time::Duration;

    fn client() -> StreamClient {
        let tokens = Arc::new(TokenStore::new(Duration::from_secs(5)));
        let events = Arc::new(EventBus::new(4, Duration::from_secs(1)));
        let validator = Arc::new(FrameValidator::default());
        let instruments = Arc::new(InstrumentCache::new(10, Duration::from_secs(60)));
        StreamClient::new(
            StreamClientConfig { market_url: "wss://market.example".into(), user_url: "wss://user.example".into() },
            tokens,
            events,
            validator,
            instruments,
        )
    }

    #[test]
    fn starts_disconnected() {
        let client = client();
        assert!(!client.is_connected());
    }

    #[test]
    fn subscribe_market_records_subscription_for_replay() {
        let client = client();
        client.subscribe_market("CON.F.US.EP.Z24", &[Channel::Depth, Channel::Trades]);
        assert_eq!(client.market_subscriptions.lock().len(), 2);
    }
}
