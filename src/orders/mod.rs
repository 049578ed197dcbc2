// =============================================================================
// Order Engine module — placement, brackets, OCO linkage
// =============================================================================

mod engine;
mod oco;
mod types;

pub use engine::{ExecutionMode, OrderEngine, OrderEngineConfig};
pub use oco::OcoLinks;
pub use types::{Bracket, BracketSpec, EntryType, Order, OrderStatus, OrderType};
