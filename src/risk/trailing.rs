// =============================================================================
// Trailing stop — managed task that ratchets a stop order
// =============================================================================

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::money::{Instrument, Side};
use crate::orders::OrderEngine;

/// Handle to a running trailing-stop task. Dropping the handle does not stop
/// the task — call [`TrailingStopHandle::cancel`] explicitly, which is
/// idempotent.
pub struct TrailingStopHandle {
    cancel_token: CancellationToken,
}

impl TrailingStopHandle {
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a task that watches `price_updates` and moves `stop_order_id` to
/// `max(current_stop, price - trail_ticks*tick)` for a long (mirrored for a
/// short), never loosening the stop.
pub fn spawn_trailing_stop(
    engine: Arc<OrderEngine>,
    instrument: Instrument,
    side: Side,
    stop_order_id: Uuid,
    trail_ticks: u32,
    mut price_updates: watch::Receiver<Decimal>,
) -> TrailingStopHandle {
    let cancel_token = CancellationToken::new();
    let task_token = cancel_token.clone();

    tokio::spawn(async move {
        let trail_offset = instrument.tick_size * Decimal::from(trail_ticks);
        let mut current_stop: Option<Decimal> = None;

        loop {
            tokio::select! {
                _ = task_token.cancelled() => {
                    info!(stop_order_id = %stop_order_id, "trailing stop task cancelled");
                    break;
                }
                changed = price_updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let price = *price_updates.borrow();
                    let candidate = match side {
                        Side::Buy => price - trail_offset,
                        Side::Sell => price + trail_offset,
                    };
                    let (aligned, _) = instrument.align(candidate);
                    let next_stop = match current_stop {
                        None => aligned.value(),
                        Some(existing) => match side {
                            Side::Buy => existing.max(aligned.value()),
                            Side::Sell => existing.min(aligned.value()),
                        },
                    };
                    if Some(next_stop) != current_stop {
                        current_stop = Some(next_stop);
                        if let Err(e) = engine.modify(stop_order_id, None, Some(next_stop)).await {
                            warn!(stop_order_id = %stop_order_id, error = %e, "failed to move trailing stop");
                        }
                    }
                }
            }
        }
    });

    TrailingStopHandle { cancel_token }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let handle = TrailingStopHandle { cancel_token: CancellationToken::new() };
        handle.cancel();
        handle.cancel();
        assert!(handle.cancel_token.is_cancelled());
    }
}
