// =============================================================================
// Reconnect backoff with full jitter, and a failure-window circuit breaker.
// Backoff: base 1s, factor 2, cap 60s. Circuit breaker: N=10 failures within
// a rolling W=300s window opens the circuit.
// =============================================================================

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub factor: f64,
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: Duration::from_secs(1), factor: 2.0, cap: Duration::from_secs(60) }
    }
}

/// Tracks consecutive failures and hands back a jittered delay for the next
/// reconnect attempt. `reset` is called on a successful connection.
pub struct ReconnectBackoff {
    config: BackoffConfig,
    consecutive_failures: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, consecutive_failures: 0 }
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Compute the delay for the next attempt and advance the failure count.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.config.base.as_secs_f64() * self.config.factor.powi(self.consecutive_failures as i32);
        let capped = exp.min(self.config.cap.as_secs_f64());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let jittered = rand::thread_rng().gen_range(0.0..=capped);
        Duration::from_secs_f64(jittered)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Opens after `threshold` failures inside a rolling `window`, and closes
/// again once `window` has elapsed since the most recent failure that kept
/// it open.
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    failures: Mutex<Vec<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self { threshold, window, failures: Mutex::new(Vec::new()) }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.retain(|t| now.duration_since(*t) < self.window);
        failures.push(now);
    }

    pub fn record_success(&self) {
        self.failures.lock().clear();
    }

    /// `Some(remaining_cooldown)` if the breaker is currently open.
    pub fn open_cooldown(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.retain(|t| now.duration_since(*t) < self.window);
        if failures.len() as u32 >= self.threshold {
            let oldest = *failures.first().unwrap();
            let elapsed = now.duration_since(oldest);
            Some(self.window.saturating_sub(elapsed))
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.open_cooldown().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_within_cap() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig { base: Duration::from_secs(1), factor: 2.0, cap: Duration::from_secs(60) });
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(60));
        }
        assert_eq!(backoff.consecutive_failures(), 10);
    }

    #[test]
    fn reset_clears_failure_count() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.consecutive_failures(), 0);
    }

    #[test]
    fn circuit_opens_after_threshold_failures_in_window() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_breaker() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
    }
}
