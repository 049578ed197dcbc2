// =============================================================================
// Position Tracker — FIFO lots, Decimal P&L, idempotent fills
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

use crate::money::{Instrument, Side};

/// One FIFO lot: `size` contracts acquired at `price`, always on the side
/// that currently defines the position's direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Lot {
    size: u32,
    price: Decimal,
}

/// Current state for a single contract, derived entirely from fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub contract_id: String,
    /// Positive for long, negative for short, zero for flat.
    pub net_size: i64,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    last_trade_price: Decimal,
    #[serde(skip)]
    lots: VecDeque<Lot>,
    #[serde(skip)]
    side: Option<Side>,
}

impl Position {
    fn flat(contract_id: String) -> Self {
        Self {
            contract_id,
            net_size: 0,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            last_trade_price: Decimal::ZERO,
            lots: VecDeque::new(),
            side: None,
        }
    }

    fn recompute_avg_price(&mut self) {
        if self.lots.is_empty() {
            self.avg_price = Decimal::ZERO;
            return;
        }
        let total_size: u32 = self.lots.iter().map(|l| l.size).sum();
        let weighted: Decimal = self.lots.iter().map(|l| l.price * Decimal::from(l.size)).sum();
        self.avg_price = weighted / Decimal::from(total_size);
    }

    fn apply_fill(&mut self, instrument: &Instrument, fill_side: Side, fill_size: u32, fill_price: Decimal) {
        match self.side {
            None => {
                self.side = Some(fill_side);
                self.lots.push_back(Lot { size: fill_size, price: fill_price });
                self.net_size = fill_side.sign() * fill_size as i64;
            }
            Some(position_side) if position_side == fill_side => {
                self.lots.push_back(Lot { size: fill_size, price: fill_price });
                self.net_size += fill_side.sign() * fill_size as i64;
            }
            Some(position_side) => {
                let mut remaining = fill_size;
                while remaining > 0 {
                    let Some(front) = self.lots.front_mut() else { break };
                    let matched = remaining.min(front.size);
                    let ticks = (fill_price - front.price) / instrument.tick_size * Decimal::from(position_side.sign());
                    self.realized_pnl += instrument.tick_pnl(ticks, crate::money::Size::new(matched).unwrap());
                    front.size -= matched;
                    remaining -= matched;
                    if front.size == 0 {
                        self.lots.pop_front();
                    }
                }
                self.net_size -= position_side.sign() * fill_size as i64;

                if remaining > 0 {
                    // Position reversed: the fill's remainder opens a new
                    // position on the opposite side.
                    self.side = Some(fill_side);
                    self.lots.push_back(Lot { size: remaining, price: fill_price });
                } else if self.lots.is_empty() {
                    self.side = None;
                }
            }
        }
        self.recompute_avg_price();
    }

    fn mark(&mut self, instrument: &Instrument, last_trade_price: Decimal) {
        self.last_trade_price = last_trade_price;
        if self.net_size == 0 || self.lots.is_empty() {
            self.unrealized_pnl = Decimal::ZERO;
            return;
        }
        let direction = if self.net_size > 0 { Side::Buy } else { Side::Sell };
        let ticks = (last_trade_price - self.avg_price) / instrument.tick_size * Decimal::from(direction.sign());
        let size = crate::money::Size::new(self.net_size.unsigned_abs() as u32).unwrap();
        self.unrealized_pnl = instrument.tick_pnl(ticks, size);
    }
}

/// A single fill event applied to a tracked contract.
#[derive(Debug, Clone)]
pub struct Fill {
    pub fill_id: uuid::Uuid,
    pub contract_id: String,
    pub side: Side,
    pub size: u32,
    pub price: Decimal,
}

/// Tracks one [`Position`] per contract. Updates for a given contract are
/// serialized through a per-contract async mutex so fills can never interleave
/// against the same contract's lot list, while different contracts proceed
/// independently.
pub struct PositionTracker {
    positions: parking_lot::Mutex<HashMap<String, Position>>,
    contract_queues: AsyncMutex<HashMap<String, std::sync::Arc<AsyncMutex<()>>>>,
    seen_fills: parking_lot::Mutex<HashSet<uuid::Uuid>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            positions: parking_lot::Mutex::new(HashMap::new()),
            contract_queues: AsyncMutex::new(HashMap::new()),
            seen_fills: parking_lot::Mutex::new(HashSet::new()),
        }
    }

    async fn queue_for(&self, contract_id: &str) -> std::sync::Arc<AsyncMutex<()>> {
        let mut queues = self.contract_queues.lock().await;
        queues.entry(contract_id.to_string()).or_insert_with(|| std::sync::Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Apply a fill. Duplicate `fill_id`s (retransmitted by the hub after a
    /// reconnect) are discarded without effect.
    pub async fn process_fill(&self, instrument: &Instrument, fill: Fill) {
        {
            let mut seen = self.seen_fills.lock();
            if !seen.insert(fill.fill_id) {
                return;
            }
        }

        let queue = self.queue_for(&fill.contract_id).await;
        let _guard = queue.lock().await;

        let mut positions = self.positions.lock();
        let position = positions.entry(fill.contract_id.clone()).or_insert_with(|| Position::flat(fill.contract_id.clone()));
        let was_flat = position.net_size == 0;
        position.apply_fill(instrument, fill.side, fill.size, fill.price);
        let is_flat = position.net_size == 0;
        info!(contract_id = %fill.contract_id, net_size = position.net_size, avg_price = %position.avg_price, "fill applied");

        if was_flat && !is_flat {
            // caller emits PositionOpened via the event bus at the suite layer
        } else if !was_flat && is_flat {
            // caller emits PositionClosed
        }
    }

    /// Mark a contract's unrealized P&L to the latest trade price.
    pub fn mark_to_market(&self, instrument: &Instrument, contract_id: &str, last_trade_price: Decimal) {
        let mut positions = self.positions.lock();
        if let Some(position) = positions.get_mut(contract_id) {
            position.mark(instrument, last_trade_price);
        }
    }

    pub fn get(&self, contract_id: &str) -> Option<Position> {
        self.positions.lock().get(contract_id).cloned()
    }

    pub fn is_flat(&self, contract_id: &str) -> bool {
        self.get(contract_id).map(|p| p.net_size == 0).unwrap_or(true)
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn es() -> Instrument {
        Instrument::new("CON.F.US.EP.Z24", "ES", dec!(0.25), dec!(12.50), "America/New_York")
    }

    fn fill(side: Side, size: u32, price: Decimal) -> Fill {
        Fill { fill_id: uuid::Uuid::new_v4(), contract_id: "CON.F.US.EP.Z24".into(), side, size, price }
    }

    #[tokio::test]
    async fn opening_fill_sets_avg_price_and_net_size() {
        let tracker = PositionTracker::new();
        let instrument = es();
        tracker.process_fill(&instrument, fill(Side::Buy, 2, dec!(5000))).await;
        let position = tracker.get(&instrument.contract_id).unwrap();
        assert_eq!(position.net_size, 2);
        assert_eq!(position.avg_price, dec!(5000));
    }

    #[tokio::test]
    async fn adding_to_position_updates_weighted_avg_price() {
        let tracker = PositionTracker::new();
        let instrument = es();
        tracker.process_fill(&instrument, fill(Side::Buy, 2, dec!(5000))).await;
        tracker.process_fill(&instrument, fill(Side::Buy, 2, dec!(5010))).await;
        let position = tracker.get(&instrument.contract_id).unwrap();
        assert_eq!(position.net_size, 4);
        assert_eq!(position.avg_price, dec!(5005));
    }

    #[tokio::test]
    async fn reducing_fill_realizes_pnl_fifo() {
        let tracker = PositionTracker::new();
        let instrument = es();
        tracker.process_fill(&instrument, fill(Side::Buy, 2, dec!(5000))).await;
        tracker.process_fill(&instrument, fill(Side::Sell, 1, dec!(5010))).await;
        let position = tracker.get(&instrument.contract_id).unwrap();
        assert_eq!(position.net_size, 1);
        assert_eq!(position.realized_pnl, dec!(500.0));
    }

    #[tokio::test]
    async fn duplicate_fill_id_is_discarded() {
        let tracker = PositionTracker::new();
        let instrument = es();
        let f = fill(Side::Buy, 1, dec!(5000));
        tracker.process_fill(&instrument, f.clone()).await;
        tracker.process_fill(&instrument, f).await;
        let position = tracker.get(&instrument.contract_id).unwrap();
        assert_eq!(position.net_size, 1);
    }

    #[tokio::test]
    async fn position_reversal_flips_side_and_opens_remainder() {
        let tracker = PositionTracker::new();
        let instrument = es();
        tracker.process_fill(&instrument, fill(Side::Buy, 2, dec!(5000))).await;
        tracker.process_fill(&instrument, fill(Side::Sell, 3, dec!(4990))).await;
        let position = tracker.get(&instrument.contract_id).unwrap();
        assert_eq!(position.net_size, -1);
        assert_eq!(position.avg_price, dec!(4990));
    }
}
