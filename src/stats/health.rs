// =============================================================================
// Health scoring — weighted 0-100 score over component signals
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTier {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub healthy_at: u8,
    pub degraded_at: u8,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self { healthy_at: 80, degraded_at: 50 }
    }
}

impl HealthThresholds {
    pub fn classify(&self, score: u8) -> HealthTier {
        if score >= self.healthy_at {
            HealthTier::Healthy
        } else if score >= self.degraded_at {
            HealthTier::Degraded
        } else {
            HealthTier::Unhealthy
        }
    }
}

/// The raw signals rolled into a single health score. Each is already
/// normalized to `[0.0, 1.0]` where `1.0` is the best possible value for that
/// signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthSignals {
    pub connection_health: f64,
    pub validation_acceptance_rate: f64,
    pub reconciliation_success_rate: f64,
    pub buffer_headroom: f64,
    pub error_rate_stability: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthWeights {
    pub connection: f64,
    pub validation: f64,
    pub reconciliation: f64,
    pub buffer: f64,
    pub error_rate: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self { connection: 0.30, validation: 0.20, reconciliation: 0.20, buffer: 0.15, error_rate: 0.15 }
    }
}

/// Combine `signals` into a 0-100 health score using `weights` (assumed to
/// sum to 1.0; callers that supply weights that don't are just scaling the
/// result, not an error condition here).
pub fn health_score(signals: HealthSignals, weights: HealthWeights) -> u8 {
    let raw = signals.connection_health * weights.connection
        + signals.validation_acceptance_rate * weights.validation
        + signals.reconciliation_success_rate * weights.reconciliation
        + signals.buffer_headroom * weights.buffer
        + signals.error_rate_stability * weights.error_rate;
    (raw.clamp(0.0, 1.0) * 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_signals_score_one_hundred() {
        let signals = HealthSignals { connection_health: 1.0, validation_acceptance_rate: 1.0, reconciliation_success_rate: 1.0, buffer_headroom: 1.0, error_rate_stability: 1.0 };
        assert_eq!(health_score(signals, HealthWeights::default()), 100);
    }

    #[test]
    fn thresholds_classify_boundaries_correctly() {
        let thresholds = HealthThresholds::default();
        assert_eq!(thresholds.classify(80), HealthTier::Healthy);
        assert_eq!(thresholds.classify(79), HealthTier::Degraded);
        assert_eq!(thresholds.classify(50), HealthTier::Degraded);
        assert_eq!(thresholds.classify(49), HealthTier::Unhealthy);
    }

    #[test]
    fn degraded_connection_lowers_score_proportionally() {
        let signals = HealthSignals { connection_health: 0.0, validation_acceptance_rate: 1.0, reconciliation_success_rate: 1.0, buffer_headroom: 1.0, error_rate_stability: 1.0 };
        let score = health_score(signals, HealthWeights::default());
        assert_eq!(score, 70);
    }
}
