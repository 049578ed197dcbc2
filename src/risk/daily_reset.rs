// =============================================================================
// Daily reset — DST-aware per-day counter rollover
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::info;

use crate::clock::SessionClock;

/// Per-day counters reset at the configured session's start. Readers always
/// see either the pre- or post-reset snapshot, never a partial mix, because
/// the whole struct lives behind one lock and is replaced atomically.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyCounters {
    pub trades_opened: u32,
    pub trades_closed: u32,
    pub wins: u32,
    pub losses: u32,
}

struct Inner {
    counters: DailyCounters,
    session_day: Option<DateTime<Utc>>,
}

/// Tracks daily counters and resets them exactly once per session day,
/// determined by [`SessionClock::is_new_session_day`] (America/New_York by
/// default, DST-aware).
pub struct DailyResetTracker {
    clock: SessionClock,
    inner: RwLock<Inner>,
}

impl DailyResetTracker {
    pub fn new(clock: SessionClock) -> Self {
        Self { clock, inner: RwLock::new(Inner { counters: DailyCounters::default(), session_day: None }) }
    }

    /// Check whether `now` starts a new session day and, if so, reset
    /// counters under the lock before returning the (possibly just-reset)
    /// snapshot.
    pub fn snapshot(&self, now: DateTime<Utc>) -> DailyCounters {
        let mut inner = self.inner.write();
        let is_new_day = match inner.session_day {
            None => true,
            Some(previous) => self.clock.is_new_session_day(previous, now),
        };
        if is_new_day {
            info!("daily counters reset for new session day");
            inner.counters = DailyCounters::default();
        }
        inner.session_day = Some(now);
        inner.counters
    }

    pub fn record_trade_opened(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        self.maybe_reset(&mut inner, now);
        inner.counters.trades_opened += 1;
    }

    pub fn record_trade_closed(&self, now: DateTime<Utc>, won: bool) {
        let mut inner = self.inner.write();
        self.maybe_reset(&mut inner, now);
        inner.counters.trades_closed += 1;
        if won {
            inner.counters.wins += 1;
        } else {
            inner.counters.losses += 1;
        }
    }

    fn maybe_reset(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let is_new_day = match inner.session_day {
            None => true,
            Some(previous) => self.clock.is_new_session_day(previous, now),
        };
        if is_new_day {
            inner.counters = DailyCounters::default();
        }
        inner.session_day = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{SessionClock, SessionConfig};
    use chrono::TimeZone;

    fn clock() -> SessionClock {
        SessionClock::new("America/New_York", SessionConfig::default()).unwrap()
    }

    #[test]
    fn counters_persist_within_the_same_session_day() {
        let tracker = DailyResetTracker::new(clock());
        let t1 = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 10, 16, 0, 0).unwrap();
        tracker.record_trade_opened(t1);
        tracker.record_trade_opened(t2);
        assert_eq!(tracker.snapshot(t2).trades_opened, 2);
    }

    #[test]
    fn crossing_session_boundary_resets_counters() {
        let tracker = DailyResetTracker::new(clock());
        let day1 = Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 3, 11, 15, 0, 0).unwrap();
        tracker.record_trade_opened(day1);
        tracker.record_trade_opened(day2);
        assert_eq!(tracker.snapshot(day2).trades_opened, 1);
    }
}
