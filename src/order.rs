use serde::{Deserialize, Serialize};

/// Which side of the book an order rests on (or crosses into).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// The side an order on `self` would have to cross against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// How an order behaves once it cannot be fully matched on admission.
///
/// `Market` and `FillAndKill` never rest: any residual quantity left after
/// matching is discarded rather than inserted into the book. `Limit` rests
/// the residual at its own price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
    FillAndKill,
}

impl OrderType {
    /// Whether a residual of this order type is ever inserted into the book.
    pub fn rests(self) -> bool {
        matches!(self, OrderType::Limit)
    }
}

/// One resting or in-flight order.
///
/// `price` and `side` are fixed at admission; `quantity` is the only field
/// that mutates in place (matching decrements it, `update` can rewrite it).
/// A zero-quantity `Order` must never be observable outside a single step
/// of the matching loop — it is removed in the same step that zeroed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub side: Side,
    pub price: u64,
    pub quantity: u64,
    pub order_type: OrderType,
    pub trader_id: u64,
}

impl Order {
    pub fn new(
        id: u64,
        side: Side,
        price: u64,
        quantity: u64,
        order_type: OrderType,
        trader_id: u64,
    ) -> Self {
        Self {
            id,
            side,
            price,
            quantity,
            order_type,
            trader_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_side_is_involutive() {
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::Ask.opposite(), Side::Bid);
        assert_eq!(Side::Bid.opposite().opposite(), Side::Bid);
    }

    #[test]
    fn only_limit_orders_rest() {
        assert!(OrderType::Limit.rests());
        assert!(!OrderType::Market.rests());
        assert!(!OrderType::FillAndKill.rests());
    }
}
