// =============================================================================
// Wire frame decoding
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::StreamError;
use crate::money::Side;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawFrame {
    Heartbeat { sequence: u64 },
    Depth { contract_id: String, side: u8, price: Decimal, size: Decimal, sequence: u64 },
    Trade { contract_id: String, price: Decimal, size: u32, timestamp: DateTime<Utc>, sequence: u64 },
    Quote { contract_id: String, bid: Decimal, ask: Decimal, sequence: u64 },
    OrderUpdate {
        order_id: uuid::Uuid,
        status: String,
        #[serde(default)]
        filled_size: u32,
        #[serde(default)]
        avg_fill_price: Option<Decimal>,
        sequence: u64,
    },
    PositionUpdate { contract_id: String, net_quantity: i64, sequence: u64 },
}

impl RawFrame {
    pub fn sequence(&self) -> u64 {
        match self {
            RawFrame::Heartbeat { sequence }
            | RawFrame::Depth { sequence, .. }
            | RawFrame::Trade { sequence, .. }
            | RawFrame::Quote { sequence, .. }
            | RawFrame::OrderUpdate { sequence, .. }
            | RawFrame::PositionUpdate { sequence, .. } => *sequence,
        }
    }

    pub fn decode(text: &str) -> Result<RawFrame, StreamError> {
        serde_json::from_str(text).map_err(|e| StreamError::ProtocolCorruption(e.to_string()))
    }

    pub fn decode_depth_side(code: u8) -> Option<Side> {
        Side::from_wire(code)
    }
}

/// Ingress sequencing: assigns a monotone sequence to each accepted frame,
/// independent of whatever sequence number the wire format carries, and
/// detects gaps in the *wire* sequence for the purposes of the connection
/// state machine's `Connected -> Degraded` transition.
pub struct IngressSequencer {
    next_ingress: u64,
    last_wire_sequence: Option<u64>,
}

impl IngressSequencer {
    pub fn new() -> Self {
        Self { next_ingress: 0, last_wire_sequence: None }
    }

    /// Record a frame's wire sequence and assign it an ingress sequence.
    /// Returns `(ingress_sequence, gap_detected)`.
    pub fn record(&mut self, wire_sequence: u64) -> (u64, bool) {
        let gap = match self.last_wire_sequence {
            Some(last) => wire_sequence > last + 1,
            None => false,
        };
        self.last_wire_sequence = Some(wire_sequence);
        let ingress = self.next_ingress;
        self.next_ingress += 1;
        (ingress, gap)
    }
}

impl Default for IngressSequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_heartbeat() {
        let frame = RawFrame::decode(r#"{"type":"heartbeat","sequence":1}"#).unwrap();
        assert!(matches!(frame, RawFrame::Heartbeat { sequence: 1 }));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RawFrame::decode("not json").is_err());
    }

    #[test]
    fn ingress_sequence_is_monotone() {
        let mut seq = IngressSequencer::new();
        let (a, gap_a) = seq.record(1);
        let (b, gap_b) = seq.record(2);
        assert_eq!((a, b), (0, 1));
        assert!(!gap_a && !gap_b);
    }

    #[test]
    fn detects_wire_sequence_gap() {
        let mut seq = IngressSequencer::new();
        seq.record(1);
        let (_, gap) = seq.record(5);
        assert!(gap);
    }
}
