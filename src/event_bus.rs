// =============================================================================
// Event Bus — non-blocking typed pub/sub with priority
// =============================================================================
//
// Emission is fire-and-forget from the emitter's point of view: `emit`
// returns as soon as each handler's task has been spawned. The bus never
// holds a lock across a handler invocation — handlers are cloned out of the
// registry and dropped before their tasks run.
// =============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use rust_decimal::Decimal;

use crate::money::{Price, Side};

/// Tagged union of everything the core can emit.
#[derive(Debug, Clone, Serialize)]
pub enum Event {
    BarClosed { contract_id: String, timeframe_secs: u64, bucket_start: DateTime<Utc> },
    BarUpdated { contract_id: String, timeframe_secs: u64 },
    Quote { contract_id: String, bid: Price, ask: Price },
    Trade { contract_id: String, price: Price, size: u32, timestamp: DateTime<Utc> },
    DepthUpdated { contract_id: String, side: SideTag, price: Price, volume: Decimal },
    OrderPlaced { order_id: uuid::Uuid },
    OrderModified { order_id: uuid::Uuid },
    /// Raw status/fill data off the wire, before the Order Engine has applied
    /// it. Subscribers that need the engine's own view of an order's
    /// lifecycle should listen for `OrderFilled`/`OrderCancelled`/
    /// `OrderRejected` instead, which the engine emits once it has recorded
    /// the fill.
    OrderStatusReceived { order_id: uuid::Uuid, status: String, filled_size: u32, avg_fill_price: Option<Decimal> },
    OrderFilled { order_id: uuid::Uuid },
    OrderCancelled { order_id: uuid::Uuid },
    OrderRejected { order_id: uuid::Uuid, reason: String },
    PositionOpened { contract_id: String },
    PositionChanged { contract_id: String },
    PositionClosed { contract_id: String },
    ConnectionStateChanged { hub: HubTag, state: String },
    SessionTransition { contract_id: String, offset_delta_seconds: i32 },
    BracketOpened { bracket_id: uuid::Uuid },
    HealthChanged { component: String, score: u8 },
    OverflowSampling { buffer: String, utilization_pct: u8 },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum SideTag {
    Bid,
    Ask,
}

impl From<Side> for SideTag {
    fn from(s: Side) -> Self {
        match s {
            Side::Buy => SideTag::Bid,
            Side::Sell => SideTag::Ask,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum HubTag {
    Market,
    User,
}

/// An event wrapped with the monotone sequence number of its emitting
/// component, scoped per-component rather than bus-wide.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub sequence: u64,
    pub event: Event,
}

type HandlerFn = Arc<dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Handler {
    priority: i32,
    id: u64,
    func: HandlerFn,
}

/// Non-blocking typed pub/sub bus.
pub struct EventBus {
    handlers: RwLock<Vec<Handler>>,
    next_handler_id: AtomicU64,
    sequence: AtomicU64,
    /// Caps the number of concurrently-running handler tasks so a burst of
    /// slow handlers cannot exhaust the runtime; does not block `emit`
    /// itself, only throttles how many handler futures run at once.
    concurrency: Arc<Semaphore>,
    drain_deadline: Duration,
}

impl EventBus {
    pub fn new(max_concurrent_handlers: usize, drain_deadline: Duration) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_handler_id: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            concurrency: Arc::new(Semaphore::new(max_concurrent_handlers.max(1))),
            drain_deadline,
        }
    }

    /// Register a handler with the given priority (higher runs first within
    /// a single event's dispatch). Returns a subscription id usable with
    /// [`Self::unsubscribe`].
    pub fn subscribe<F, Fut>(&self, priority: i32, handler: F) -> u64
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        let func: HandlerFn = Arc::new(move |env| Box::pin(handler(env)));
        let mut handlers = self.handlers.write();
        handlers.push(Handler { priority, id, func });
        handlers.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.handlers.write().retain(|h| h.id != id);
    }

    /// Emit an event. Returns immediately; each handler runs in its own
    /// spawned task, in priority order of scheduling (not completion).
    pub fn emit(&self, event: Event) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = Envelope { sequence, event };

        let snapshot: Vec<HandlerFn> = {
            let handlers = self.handlers.read();
            handlers.iter().map(|h| h.func.clone()).collect()
        };

        for func in snapshot {
            let envelope = envelope.clone();
            let permit = self.concurrency.clone();
            tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                func(envelope).await;
            });
        }
    }

    /// Drain in-flight handler work on shutdown, cancelling anything that
    /// does not finish within `drain_deadline`. Because handler tasks are
    /// independent spawns rather than tracked in a `JoinSet`, draining here
    /// means waiting out the deadline for the semaphore to return to full
    /// capacity (all permits released implies all handlers finished or were
    /// abandoned by the runtime shutdown).
    pub async fn shutdown(&self, total_permits: usize) {
        let acquire_all = self.concurrency.clone().acquire_many_owned(total_permits as u32);
        let _ = tokio::time::timeout(self.drain_deadline, acquire_all).await;
    }
}

/// Helper used by components that need to run a batch of async handlers for
/// a single dispatch and observe completion (used by tests and by the
/// managed-task supervisor, which never spawns a handler without a way to
/// observe its completion).
pub async fn join_all_with_deadline(mut set: JoinSet<()>, deadline: Duration) {
    let _ = tokio::time::timeout(deadline, async {
        while set.join_next().await.is_some() {}
    })
    .await;
    if !set.is_empty() {
        warn!(remaining = set.len(), "event bus drain deadline exceeded, abandoning handlers");
        set.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn emits_in_priority_order() {
        let bus = EventBus::new(8, StdDuration::from_secs(1));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.subscribe(10, move |_| {
            let o = o1.clone();
            async move {
                o.lock().push("high");
            }
        });
        let o2 = order.clone();
        bus.subscribe(0, move |_| {
            let o = o2.clone();
            async move {
                o.lock().push("low");
            }
        });

        bus.emit(Event::OrderPlaced { order_id: uuid::Uuid::nil() });
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let observed = order.lock().clone();
        assert_eq!(observed, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn sequence_numbers_increase_monotonically() {
        let bus = EventBus::new(8, StdDuration::from_secs(1));
        let seqs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let s = seqs.clone();
        bus.subscribe(0, move |env: Envelope| {
            let s = s.clone();
            async move {
                s.lock().push(env.sequence);
            }
        });

        for _ in 0..5 {
            bus.emit(Event::OrderPlaced { order_id: uuid::Uuid::nil() });
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let observed = seqs.lock().clone();
        assert_eq!(observed, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_emit() {
        let bus = EventBus::new(8, StdDuration::from_secs(1));
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe(0, move |_| {
            let h = h.clone();
            async move {
                tokio::time::sleep(StdDuration::from_millis(200)).await;
                h.fetch_add(1, Ordering::SeqCst);
            }
        });

        let start = std::time::Instant::now();
        bus.emit(Event::OrderPlaced { order_id: uuid::Uuid::nil() });
        assert!(start.elapsed() < StdDuration::from_millis(50));
    }
}
