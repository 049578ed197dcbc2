// =============================================================================
// Transport — signed REST access to the Gateway
// =============================================================================

mod cache;
mod client;
mod rate_limit;
mod token;

pub use cache::InstrumentCache;
pub use client::{Transport, TransportConfig};
pub use rate_limit::{BucketConfig, RateLimiter};
pub use token::{SessionToken, SharedTokenStore, TokenStore};
