// =============================================================================
// Token-bucket rate limiter, one bucket per endpoint class
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::TransportError;

#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_second: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self { capacity: 50.0, refill_per_second: 10.0 }
    }
}

struct Bucket {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: BucketConfig) -> Self {
        Self { config, tokens: config.capacity, last_refill: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.config.refill_per_second).min(self.config.capacity);
        self.last_refill = now;
    }

    fn try_take(&mut self, cost: f64) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= cost {
            self.tokens -= cost;
            Ok(())
        } else {
            let deficit = cost - self.tokens;
            let wait = Duration::from_secs_f64(deficit / self.config.refill_per_second.max(0.001));
            Err(wait)
        }
    }
}

/// Tracks one token bucket per named endpoint class (e.g. `"orders"`,
/// `"market_data"`, `"account"`).
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    default_config: BucketConfig,
    wait_timeout: Duration,
}

impl RateLimiter {
    pub fn new(default_config: BucketConfig, wait_timeout: Duration) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), default_config, wait_timeout }
    }

    pub fn configure_class(&self, class: &str, config: BucketConfig) {
        self.buckets.lock().insert(class.to_string(), Bucket::new(config));
    }

    /// Acquire `cost` tokens from `class`'s bucket, waiting (bounded by
    /// `wait_timeout`) if the bucket is currently empty.
    pub async fn acquire(&self, class: &str, cost: f64) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let bucket = buckets
                    .entry(class.to_string())
                    .or_insert_with(|| Bucket::new(self.default_config));
                match bucket.try_take(cost) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            if Instant::now() + wait > deadline {
                warn!(class, "rate limiter wait exceeds bounded timeout");
                return Err(TransportError::RateLimited(wait));
            }
            tokio::time::sleep(wait.min(Duration::from_millis(50))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquires_immediately_when_tokens_available() {
        let limiter = RateLimiter::new(BucketConfig { capacity: 5.0, refill_per_second: 1.0 }, Duration::from_secs(1));
        assert!(limiter.acquire("orders", 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn waits_then_succeeds_when_bucket_refills_in_time() {
        let limiter = RateLimiter::new(BucketConfig { capacity: 1.0, refill_per_second: 20.0 }, Duration::from_secs(2));
        assert!(limiter.acquire("orders", 1.0).await.is_ok());
        // Bucket now empty; refills at 20/s so 1 token arrives in 50ms.
        assert!(limiter.acquire("orders", 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn fails_with_rate_limited_when_timeout_too_short() {
        let limiter = RateLimiter::new(BucketConfig { capacity: 1.0, refill_per_second: 0.1 }, Duration::from_millis(10));
        assert!(limiter.acquire("orders", 1.0).await.is_ok());
        let err = limiter.acquire("orders", 1.0).await;
        assert!(matches!(err, Err(TransportError::RateLimited(_))));
    }
}
