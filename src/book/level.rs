// =============================================================================
// Price level — volume, refresh history
// =============================================================================

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

const MAX_HISTORY_SAMPLES: usize = 1000;
const ANALYTICS_WINDOW: chrono::Duration = chrono::Duration::minutes(30);

#[derive(Debug, Clone)]
pub struct RefreshSample {
    pub at: DateTime<Utc>,
    pub volume: Decimal,
}

#[derive(Debug, Clone)]
pub struct PriceLevel {
    pub price: Decimal,
    pub volume: Decimal,
    pub last_update: DateTime<Utc>,
    pub refresh_count: u64,
    history: VecDeque<RefreshSample>,
}

impl PriceLevel {
    pub fn new(price: Decimal, volume: Decimal, at: DateTime<Utc>) -> Self {
        let mut history = VecDeque::with_capacity(16);
        history.push_back(RefreshSample { at, volume });
        Self { price, volume, last_update: at, refresh_count: 1, history }
    }

    /// Record a refresh (new volume at `at`), evicting samples older than the
    /// analytics window and capping total retained samples at 1000.
    pub fn refresh(&mut self, volume: Decimal, at: DateTime<Utc>) {
        self.volume = volume;
        self.last_update = at;
        self.refresh_count += 1;

        self.history.push_back(RefreshSample { at, volume });
        while self.history.len() > MAX_HISTORY_SAMPLES {
            self.history.pop_front();
        }
        let cutoff = at - ANALYTICS_WINDOW;
        while matches!(self.history.front(), Some(s) if s.at < cutoff) {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> &VecDeque<RefreshSample> {
        &self.history
    }

    /// Population variance of visible sizes across retained refreshes, used
    /// by iceberg detection as a consistency signal.
    pub fn size_variance(&self) -> f64 {
        if self.history.len() < 2 {
            return 0.0;
        }
        let values: Vec<f64> = self.history.iter().filter_map(|s| s.volume.to_string().parse().ok()).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
    }

    pub fn total_observed_volume(&self) -> Decimal {
        self.history.iter().map(|s| s.volume).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn refresh_appends_history_and_updates_volume() {
        let mut level = PriceLevel::new(dec!(5000), dec!(10), Utc::now());
        level.refresh(dec!(15), Utc::now());
        assert_eq!(level.volume, dec!(15));
        assert_eq!(level.refresh_count, 2);
        assert_eq!(level.history().len(), 2);
    }

    #[test]
    fn evicts_samples_older_than_analytics_window() {
        let base = Utc::now() - chrono::Duration::hours(1);
        let mut level = PriceLevel::new(dec!(5000), dec!(10), base);
        level.refresh(dec!(12), Utc::now());
        assert_eq!(level.history().len(), 1);
    }

    #[test]
    fn caps_history_at_max_samples() {
        let mut level = PriceLevel::new(dec!(5000), dec!(1), Utc::now());
        for _ in 0..1500 {
            level.refresh(dec!(1), Utc::now());
        }
        assert_eq!(level.history().len(), MAX_HISTORY_SAMPLES);
    }
}
