use serde::{Deserialize, Serialize};

/// A single fill event produced by the matching loop.
///
/// - `price` is always the maker's (resting order's) price — the taker gets
///   whatever price improvement that implies.
/// - `quantity` is the size filled in this event, not either order's total
///   remaining size.
/// - Self-trades (same trader on both sides) are not prevented and show up
///   here like any other match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub taker_trader_id: u64,
    pub maker_trader_id: u64,
    pub price: u64,
    pub quantity: u64,
}
