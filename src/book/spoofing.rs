// =============================================================================
// Spoofing classifier — six detectable manipulation patterns
// =============================================================================
//
// Bounded by `max_tracked_prices`: once the tracked-price table is full, the
// least-recently-active price is evicted to make room for a new one. Each
// tracked price keeps a small rolling window of placement/cancellation
// events; classification sorts that window once per call, giving the
// required O(N log N) bound in the window's event count.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SpoofPattern {
    Layering,
    QuoteStuffing,
    MomentumIgnition,
    Flashing,
    WashTrading,
    BasicSpoofing,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpoofDetection {
    pub price: Decimal,
    pub pattern: SpoofPattern,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Placed,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct OrderEvent {
    at: DateTime<Utc>,
    kind: EventKind,
    distance_from_market_ticks: u32,
}

struct PriceActivity {
    events: VecDeque<OrderEvent>,
    last_active: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SpoofingThresholds {
    pub window: chrono::Duration,
    pub min_placement_frequency: f64,
    pub min_cancellation_rate: f64,
    pub max_time_to_cancel: chrono::Duration,
    pub min_distance_from_market_ticks: u32,
}

impl Default for SpoofingThresholds {
    fn default() -> Self {
        Self {
            window: chrono::Duration::seconds(60),
            min_placement_frequency: 5.0,
            min_cancellation_rate: 0.8,
            max_time_to_cancel: chrono::Duration::milliseconds(500),
            min_distance_from_market_ticks: 5,
        }
    }
}

pub struct SpoofingClassifier {
    max_tracked_prices: usize,
    thresholds: SpoofingThresholds,
    by_price: HashMap<Decimal, PriceActivity>,
}

impl SpoofingClassifier {
    pub fn new(max_tracked_prices: usize, thresholds: SpoofingThresholds) -> Self {
        Self { max_tracked_prices, thresholds, by_price: HashMap::new() }
    }

    fn activity_for(&mut self, price: Decimal, at: DateTime<Utc>) -> &mut PriceActivity {
        if !self.by_price.contains_key(&price) && self.by_price.len() >= self.max_tracked_prices {
            if let Some(oldest) = self.by_price.iter().min_by_key(|(_, a)| a.last_active).map(|(p, _)| *p) {
                self.by_price.remove(&oldest);
            }
        }
        self.by_price
            .entry(price)
            .or_insert_with(|| PriceActivity { events: VecDeque::new(), last_active: at })
    }

    pub fn record_placement(&mut self, price: Decimal, at: DateTime<Utc>, distance_from_market_ticks: u32) {
        let activity = self.activity_for(price, at);
        activity.events.push_back(OrderEvent { at, kind: EventKind::Placed, distance_from_market_ticks });
        activity.last_active = at;
    }

    pub fn record_cancellation(&mut self, price: Decimal, at: DateTime<Utc>) {
        let activity = self.activity_for(price, at);
        activity.events.push_back(OrderEvent { at, kind: EventKind::Cancelled, distance_from_market_ticks: 0 });
        activity.last_active = at;
    }

    /// Evaluate every tracked price against the window and thresholds,
    /// returning zero or more detections tagged with a confidence in
    /// `[0, 1]`.
    pub fn classify(&mut self, now: DateTime<Utc>) -> Vec<SpoofDetection> {
        let cutoff = now - self.thresholds.window;
        let mut detections = Vec::new();

        for (price, activity) in self.by_price.iter_mut() {
            activity.events.retain(|e| e.at >= cutoff);
            if activity.events.is_empty() {
                continue;
            }
            let mut sorted: Vec<OrderEvent> = activity.events.iter().copied().collect();
            sorted.sort_by_key(|e| e.at);

            let placements = sorted.iter().filter(|e| matches!(e.kind, EventKind::Placed)).count();
            let cancellations = sorted.iter().filter(|e| matches!(e.kind, EventKind::Cancelled)).count();
            if placements == 0 {
                continue;
            }

            let window_secs = self.thresholds.window.num_milliseconds() as f64 / 1000.0;
            let placement_frequency = placements as f64 / window_secs.max(0.001);
            let cancellation_rate = cancellations as f64 / placements as f64;

            let avg_time_to_cancel = average_time_to_cancel(&sorted);
            let max_distance = sorted.iter().map(|e| e.distance_from_market_ticks).max().unwrap_or(0);

            if placement_frequency < self.thresholds.min_placement_frequency || cancellation_rate < self.thresholds.min_cancellation_rate {
                continue;
            }

            let fast_cancel = avg_time_to_cancel.map(|d| d <= self.thresholds.max_time_to_cancel).unwrap_or(false);
            let far_from_market = max_distance >= self.thresholds.min_distance_from_market_ticks;

            let pattern = if placement_frequency > self.thresholds.min_placement_frequency * 3.0 {
                SpoofPattern::QuoteStuffing
            } else if fast_cancel && far_from_market {
                SpoofPattern::Layering
            } else if fast_cancel && !far_from_market {
                SpoofPattern::Flashing
            } else if far_from_market {
                SpoofPattern::BasicSpoofing
            } else if placements > 1 && cancellations > 1 {
                SpoofPattern::MomentumIgnition
            } else {
                SpoofPattern::WashTrading
            };

            let confidence = (cancellation_rate * 0.6 + (placement_frequency / (placement_frequency + 5.0)) * 0.4).min(1.0);
            detections.push(SpoofDetection { price: *price, pattern, confidence });
        }

        detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        detections
    }
}

fn average_time_to_cancel(sorted: &[OrderEvent]) -> Option<chrono::Duration> {
    let mut durations = Vec::new();
    let mut open_placement: Option<DateTime<Utc>> = None;
    for event in sorted {
        match event.kind {
            EventKind::Placed => open_placement = Some(event.at),
            EventKind::Cancelled => {
                if let Some(placed_at) = open_placement.take() {
                    durations.push(event.at - placed_at);
                }
            }
        }
    }
    if durations.is_empty() {
        return None;
    }
    let total_ms: i64 = durations.iter().map(|d| d.num_milliseconds()).sum();
    Some(chrono::Duration::milliseconds(total_ms / durations.len() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn detects_layering_far_from_market_with_fast_cancel() {
        let thresholds = SpoofingThresholds {
            window: chrono::Duration::seconds(2),
            min_placement_frequency: 5.0,
            min_cancellation_rate: 0.8,
            max_time_to_cancel: chrono::Duration::milliseconds(50),
            min_distance_from_market_ticks: 5,
        };
        let mut classifier = SpoofingClassifier::new(1000, thresholds);
        let t0 = Utc::now();
        for i in 0..20 {
            let at = t0 + chrono::Duration::milliseconds(i * 100);
            classifier.record_placement(dec!(4900), at, 5);
            if i < 19 {
                classifier.record_cancellation(dec!(4900), at + chrono::Duration::milliseconds(40));
            }
        }
        let detections = classifier.classify(t0 + chrono::Duration::seconds(2));
        assert!(!detections.is_empty());
        assert_eq!(detections[0].pattern, SpoofPattern::Layering);
        assert!(detections[0].confidence >= 0.8, "confidence {} below 0.8", detections[0].confidence);
    }

    #[test]
    fn no_detection_below_placement_frequency_threshold() {
        let mut classifier = SpoofingClassifier::new(1000, SpoofingThresholds::default());
        let t0 = Utc::now();
        classifier.record_placement(dec!(5000), t0, 1);
        classifier.record_cancellation(dec!(5000), t0 + chrono::Duration::seconds(1));
        let detections = classifier.classify(t0 + chrono::Duration::seconds(2));
        assert!(detections.is_empty());
    }

    #[test]
    fn evicts_least_recently_active_price_past_capacity() {
        let mut classifier = SpoofingClassifier::new(2, SpoofingThresholds::default());
        let t0 = Utc::now();
        classifier.record_placement(dec!(5000), t0, 1);
        classifier.record_placement(dec!(5001), t0 + chrono::Duration::seconds(1), 1);
        classifier.record_placement(dec!(5002), t0 + chrono::Duration::seconds(2), 1);
        assert_eq!(classifier.by_price.len(), 2);
        assert!(!classifier.by_price.contains_key(&dec!(5000)));
    }
}
