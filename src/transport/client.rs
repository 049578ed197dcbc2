// =============================================================================
// Gateway REST client — HMAC-signed requests, retry/backoff, auth
// =============================================================================
//
// SECURITY: the API secret is held only long enough to sign a request and is
// never logged. All requests carry the current session token as a bearer
// header once authenticated.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::error::TransportError;
use crate::money::Instrument;
use crate::transport::cache::InstrumentCache;
use crate::transport::rate_limit::{BucketConfig, RateLimiter};
use crate::transport::token::{SessionToken, SharedTokenStore, TokenStore};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub auth_lock_timeout: Duration,
    pub instrument_cache_capacity: usize,
    pub instrument_cache_ttl: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(30),
            max_attempts: 5,
            request_timeout: Duration::from_secs(10),
            auth_lock_timeout: Duration::from_secs(30),
            instrument_cache_capacity: 1000,
            instrument_cache_ttl: Duration::from_secs(3600),
        }
    }
}

/// Signed REST client for the trading Gateway. Owns the session token and
/// instrument lookup cache shared with the Streaming Client.
pub struct Transport {
    config: TransportConfig,
    http: reqwest::Client,
    tokens: SharedTokenStore,
    rate_limiter: RateLimiter,
    instruments: Arc<InstrumentCache>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("failed to build reqwest client");

        let tokens = Arc::new(TokenStore::new(config.auth_lock_timeout));
        let rate_limiter = RateLimiter::new(BucketConfig::default(), Duration::from_secs(10));
        let instruments = Arc::new(InstrumentCache::new(config.instrument_cache_capacity, config.instrument_cache_ttl));

        Self { config, http, tokens, rate_limiter, instruments }
    }

    pub fn on_token_changed(&self) -> watch::Receiver<u64> {
        self.tokens.subscribe_changes()
    }

    pub async fn current_token(&self) -> Option<SessionToken> {
        self.tokens.current().await
    }

    /// Shared handle to the token store, for components (the Stream Client)
    /// that authenticate independently of REST requests.
    pub fn token_store(&self) -> SharedTokenStore {
        self.tokens.clone()
    }

    pub fn configure_rate_class(&self, class: &str, config: BucketConfig) {
        self.rate_limiter.configure_class(class, config);
    }

    pub fn cache_instrument(&self, instrument: Instrument) {
        self.instruments.insert(instrument);
    }

    pub fn cached_instrument(&self, contract_id: &str) -> Option<Instrument> {
        self.instruments.get(contract_id)
    }

    /// Shared handle to the instrument cache, for components (the Stream
    /// Client) that need to align wire prices independently of REST calls.
    pub fn instrument_cache(&self) -> Arc<InstrumentCache> {
        self.instruments.clone()
    }

    /// Exchange API key/secret for a session token. Single-flight: concurrent
    /// callers observe one underlying fetch.
    #[instrument(skip(self), name = "transport::authenticate")]
    pub async fn authenticate(&self) -> Result<SessionToken, TransportError> {
        self.tokens
            .authenticate(|| async {
                let url = format!("{}/auth/session", self.config.base_url);
                let signature = self.sign(&format!("api_key={}", self.config.api_key));
                let resp = self
                    .http
                    .post(&url)
                    .json(&serde_json::json!({
                        "api_key": self.config.api_key,
                        "signature": signature,
                    }))
                    .send()
                    .await
                    .map_err(|e| TransportError::Transient(e.to_string()))?;

                if !resp.status().is_success() {
                    return Err(TransportError::Authentication(format!("status {}", resp.status())));
                }

                #[derive(serde::Deserialize)]
                struct AuthResponse {
                    token: String,
                    expires_in_secs: i64,
                }
                let body: AuthResponse = resp
                    .json()
                    .await
                    .map_err(|e| TransportError::Authentication(e.to_string()))?;

                let now = chrono::Utc::now();
                Ok(SessionToken {
                    value: body.token,
                    issued_at: now,
                    expires_at: now + chrono::Duration::seconds(body.expires_in_secs),
                })
            })
            .await
    }

    /// Produce a hex HMAC-SHA256 signature of `payload` using the configured
    /// API secret. The secret is read once per call and never retained
    /// beyond the scope of the MAC computation.
    pub fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Perform a signed request against `path`, with retry: network/transient
    /// errors and 5xx are retried with exponential backoff
    /// (base/cap/max_attempts from config); 401 triggers one re-authentication
    /// then one retry; any other 4xx is surfaced immediately.
    #[instrument(skip(self, body), fields(path = %path))]
    pub async fn request<B: Serialize, R: DeserializeOwned>(
        &self,
        rate_class: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<R, TransportError> {
        self.rate_limiter.acquire(rate_class, 1.0).await?;

        let mut attempt = 0u32;
        let mut reauthenticated_once = false;
        loop {
            attempt += 1;
            let token = match self.tokens.current().await {
                Some(t) => t,
                None => self.authenticate().await?,
            };

            let url = format!("{}{}", self.config.base_url, path);
            let mut req = self.http.request(method.clone(), &url).bearer_auth(&token.value);
            if let Some(b) = body {
                req = req.json(b);
            }

            let outcome = req.send().await;
            match outcome {
                Err(e) => {
                    if attempt >= self.config.max_attempts {
                        return Err(TransportError::Transient(e.to_string()));
                    }
                    self.backoff_sleep(attempt).await;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<R>().await.map_err(|e| TransportError::Transient(e.to_string()));
                    }

                    if status == StatusCode::UNAUTHORIZED && !reauthenticated_once {
                        reauthenticated_once = true;
                        debug!("request unauthorized, re-authenticating once before retry");
                        let previous = self.tokens.current().await;
                        if self.authenticate().await.is_err() {
                            self.tokens.rollback(previous).await;
                        }
                        continue;
                    }

                    if status.is_client_error() {
                        let message = resp.text().await.unwrap_or_default();
                        return Err(TransportError::Rejected { status: status.as_u16(), message });
                    }

                    if status.is_server_error() {
                        if attempt >= self.config.max_attempts {
                            let message = resp.text().await.unwrap_or_default();
                            return Err(TransportError::Rejected { status: status.as_u16(), message });
                        }
                        warn!(status = %status, attempt, "server error, retrying with backoff");
                        self.backoff_sleep(attempt).await;
                        continue;
                    }

                    let message = resp.text().await.unwrap_or_default();
                    return Err(TransportError::Rejected { status: status.as_u16(), message });
                }
            }
        }
    }

    async fn backoff_sleep(&self, attempt: u32) {
        let exp = self.config.retry_base.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped = exp.min(self.config.retry_cap.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(capped)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig {
            base_url: "https://gateway.example".into(),
            api_key: "key".into(),
            api_secret: "secret".into(),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn signs_deterministically() {
        let transport = Transport::new(config());
        let a = transport.sign("payload");
        let b = transport.sign("payload");
        assert_eq!(a, b);
        assert_ne!(a, transport.sign("other"));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = TransportConfig {
            retry_base: Duration::from_millis(500),
            retry_cap: Duration::from_secs(30),
            ..TransportConfig::default()
        };
        let exp_attempt_1 = config.retry_base.as_millis() as u64;
        let exp_attempt_7 = (config.retry_base.as_millis() as u64 * 2u64.pow(6)).min(config.retry_cap.as_millis() as u64);
        assert_eq!(exp_attempt_1, 500);
        assert_eq!(exp_attempt_7, 30_000);
    }

    #[tokio::test]
    async fn instrument_cache_roundtrips_through_transport() {
        let transport = Transport::new(config());
        let instrument = Instrument::new("CON.F.US.EP.Z24", "ES", rust_decimal_macros::dec!(0.25), rust_decimal_macros::dec!(12.50), "America/New_York");
        transport.cache_instrument(instrument.clone());
        assert_eq!(transport.cached_instrument("CON.F.US.EP.Z24"), Some(instrument));
    }
}
