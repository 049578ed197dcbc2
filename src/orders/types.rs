// =============================================================================
// Order model
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
    }

    /// Decode the Gateway's wire status string. Unknown strings (future wire
    /// additions) return `None` rather than guessing.
    pub fn from_wire(status: &str) -> Option<OrderStatus> {
        match status {
            "working" => Some(OrderStatus::Working),
            "partially_filled" => Some(OrderStatus::PartiallyFilled),
            "filled" => Some(OrderStatus::Filled),
            "cancelled" => Some(OrderStatus::Cancelled),
            "rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub broker_id: Option<String>,
    pub contract_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub size: u32,
    pub filled_size: u32,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    /// Size-weighted average price of fills recorded so far. `None` until
    /// the first fill arrives, even for orders with a limit `price`.
    pub avg_fill_price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub bracket_id: Option<Uuid>,
}

impl Order {
    pub fn new(contract_id: impl Into<String>, side: Side, order_type: OrderType, size: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            broker_id: None,
            contract_id: contract_id.into(),
            side,
            order_type,
            size,
            filled_size: 0,
            price: None,
            stop_price: None,
            avg_fill_price: None,
            status: OrderStatus::Working,
            created_at: now,
            updated_at: now,
            bracket_id: None,
        }
    }

    pub fn remaining_size(&self) -> u32 {
        self.size.saturating_sub(self.filled_size)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BracketSpec {
    pub contract_id: String,
    pub side: Side,
    pub size: u32,
    pub entry_type: EntryType,
    pub entry_price: Option<Decimal>,
    pub stop_offset_ticks: u32,
    pub target_offset_ticks: u32,
}

#[derive(Debug, Clone)]
pub struct Bracket {
    pub id: Uuid,
    pub contract_id: String,
    pub entry_order_id: Uuid,
    pub stop_order_id: Option<Uuid>,
    pub target_order_id: Option<Uuid>,
}
