// =============================================================================
// Error taxonomy — kinds, not type names
// =============================================================================
//
// Every public operation returns a `Result<T, E>` with a component-specific
// error enum. `SuiteError` is the crate-wide umbrella that `suite.rs` and the
// demonstration binary deal in; individual components match on their own
// narrower enum when they need to branch on kind (e.g. retry vs. fatal).
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Correlation id attached to every failure so operators can trace a single
/// logical operation across components and log lines.
pub type CorrelationId = Uuid;

/// A fully-described failure: an enumerated kind, a human message, a
/// correlation id, and the timestamp it occurred at.
#[derive(Debug, Clone)]
pub struct Failure<K> {
    pub kind: K,
    pub message: String,
    pub correlation_id: CorrelationId,
    pub occurred_at: DateTime<Utc>,
}

impl<K: std::fmt::Display> std::fmt::Display for Failure<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} (correlation_id={})",
            self.kind, self.message, self.correlation_id
        )
    }
}

impl<K> Failure<K> {
    pub fn new(kind: K, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
        }
    }
}

/// Transport-layer failures (§4.1, §7).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transient network error: {0}")]
    Transient(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("request rate limited, retry after {0:?}")]
    RateLimited(Duration),
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit open, cooldown remaining {0:?}")]
    CircuitOpen(Duration),
    #[error("not authenticated")]
    Unauthenticated,
}

/// Streaming hub failures (§4.2, §7).
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("protocol corruption: {0}")]
    ProtocolCorruption(String),
    #[error("heartbeat deadline missed")]
    HeartbeatMissed,
    #[error("circuit open for hub, cooldown remaining {0:?}")]
    CircuitOpen(Duration),
    #[error("token rotation failed: {0}")]
    TokenRotationFailed(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Inbound frame validation failures (§4.6).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed frame: {0}")]
    Format(String),
    #[error("price out of bounds")]
    PriceOutOfBounds,
    #[error("volume out of bounds")]
    VolumeOutOfBounds,
    #[error("timestamp out of tolerance")]
    TimestampOutOfTolerance,
    #[error("timestamp not monotone")]
    NonMonotoneTimestamp,
    #[error("quote crossed or spread out of bounds")]
    InvalidQuote,
}

/// Order engine failures (§4.7).
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("unknown instrument: {0}")]
    InvalidInstrument(String),
    #[error("insufficient margin")]
    InsufficientMargin,
    #[error("order rejected by broker: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("invalid price")]
    InvalidPrice,
    #[error("invalid entry type")]
    InvalidEntryType,
    #[error("entry price required for limit entry")]
    MissingEntryPrice,
    #[error("invalid bracket geometry")]
    InvalidBracketGeometry,
    #[error("entry fill wait timed out")]
    EntryTimeout,
    #[error("protection could not be installed: {0}")]
    ProtectionFailed(String),
    #[error("order not found: {0}")]
    NotFound(Uuid),
    #[error("order is in a terminal state")]
    TerminalState,
    #[error("operation refused, circuit open")]
    CircuitOpen,
}

/// Risk manager failures (§4.9).
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("order engine error: {0}")]
    Order(#[from] OrderError),
    #[error("a managed trade scope is already open for this contract")]
    ScopeAlreadyOpen,
    #[error("computed size is non-positive for the given risk parameters")]
    NonPositiveSize,
}

/// Crate-wide umbrella error.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Risk(#[from] RiskError),
    #[error("critical: unprotected position after bracket failure on contract {contract_id}")]
    UnprotectedPosition { contract_id: String },
    #[error("configuration error: {0}")]
    Configuration(String),
}
