use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use crate::order::{Order, OrderType, Side};
use crate::price_level::PriceLevel;
use crate::transaction::Transaction;

/// Sentinel returned by the submission surface when an order is rejected
/// before admission (negative price, non-positive quantity). Matches the
/// C-heritage `-1` sentinel rather than an `Option`/`Result`, since the
/// submission surface never raises exceptions across the command boundary.
pub const REJECTED: i64 = -1;

/// Market orders cross at any price; representing that as the
/// side-appropriate extreme lets the rest of the matching code treat a
/// market order exactly like a limit order whose price always crosses.
const MARKET_BID_PRICE: u64 = u64::MAX;
const MARKET_ASK_PRICE: u64 = 0;

#[derive(Clone, Copy)]
struct OrderLocation {
    side: Side,
    price: u64,
}

/// Price-time priority limit order book for a single instrument.
///
/// `bids` and `asks` are each a price→[`PriceLevel`] map; `orders_by_id`
/// locates the level (and therefore the order) for any id in O(1), which is
/// what lets `cancel`/`update` avoid scanning the book. The two side maps
/// never both touch: `invariant 3` (no bid price ≥ any ask price) holds at
/// every command boundary, though it may be transiently violated mid-match.
pub struct OrderBook {
    bids: BTreeMap<u64, PriceLevel>,
    asks: BTreeMap<u64, PriceLevel>,
    orders_by_id: HashMap<u64, OrderLocation>,
    next_order_id: u64,
    executed_transactions: Vec<Transaction>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders_by_id: HashMap::new(),
            next_order_id: 0,
            executed_transactions: Vec::new(),
        }
    }

    /// Submit a bid. `price < 0` or `quantity == 0` rejects pre-admission
    /// with no state change and no log entry.
    pub fn bid(&mut self, quantity: u64, price: i64, order_type: OrderType, trader_id: u64) -> i64 {
        let Some(price) = validate_price(price) else {
            warn!(price, "bid rejected: negative price");
            return REJECTED;
        };
        if quantity == 0 {
            warn!("bid rejected: non-positive quantity");
            return REJECTED;
        }
        self.submit(Side::Bid, price, quantity, order_type, trader_id)
    }

    /// Submit an ask. Same rejection rules as [`OrderBook::bid`].
    pub fn ask(&mut self, quantity: u64, price: i64, order_type: OrderType, trader_id: u64) -> i64 {
        let Some(price) = validate_price(price) else {
            warn!(price, "ask rejected: negative price");
            return REJECTED;
        };
        if quantity == 0 {
            warn!("ask rejected: non-positive quantity");
            return REJECTED;
        }
        self.submit(Side::Ask, price, quantity, order_type, trader_id)
    }

    /// Submit a market buy: crosses every resting ask, any residual is
    /// discarded rather than resting.
    pub fn market_bid(&mut self, quantity: u64, trader_id: u64) -> i64 {
        if quantity == 0 {
            warn!("market_bid rejected: non-positive quantity");
            return REJECTED;
        }
        self.submit(Side::Bid, MARKET_BID_PRICE, quantity, OrderType::Market, trader_id)
    }

    /// Submit a market sell: crosses every resting bid, any residual is
    /// discarded rather than resting.
    pub fn market_ask(&mut self, quantity: u64, trader_id: u64) -> i64 {
        if quantity == 0 {
            warn!("market_ask rejected: non-positive quantity");
            return REJECTED;
        }
        self.submit(Side::Ask, MARKET_ASK_PRICE, quantity, OrderType::Market, trader_id)
    }

    /// Cancel a resting order. No-op (silently) if `id` is unknown or
    /// `trader_id` does not own it.
    pub fn cancel(&mut self, id: u64, trader_id: u64) {
        let Some(loc) = self.orders_by_id.get(&id).copied() else {
            return;
        };
        let level = self
            .level_mut(loc.side, loc.price)
            .expect("indexed order must have a backing price level");
        let Some(order) = level.get(id) else {
            return;
        };
        if order.trader_id != trader_id {
            return;
        }
        level.remove(id).expect("order id confirmed present above");
        if level.is_empty() {
            self.remove_level(loc.side, loc.price);
        }
        self.orders_by_id.remove(&id);
        info!(id, trader_id, "order cancelled");
    }

    /// Update the resting quantity of an order. `new_quantity == 0` behaves
    /// like [`OrderBook::cancel`]. Shrinking preserves queue position;
    /// growing moves the order to the tail of its price level (it loses
    /// time priority against orders that were already resting alongside
    /// it). No-op if `id` is unknown or `trader_id` does not own it.
    pub fn update(&mut self, id: u64, new_quantity: u64, trader_id: u64) {
        if new_quantity == 0 {
            self.cancel(id, trader_id);
            return;
        }
        let Some(loc) = self.orders_by_id.get(&id).copied() else {
            return;
        };
        let level = self
            .level_mut(loc.side, loc.price)
            .expect("indexed order must have a backing price level");
        let Some(order) = level.get(id) else {
            return;
        };
        if order.trader_id != trader_id {
            return;
        }
        let old_quantity = order.quantity;
        if new_quantity <= old_quantity {
            let delta = old_quantity - new_quantity;
            level
                .get_mut(id)
                .expect("order id confirmed present above")
                .quantity = new_quantity;
            level.dec_aggregate(delta);
        } else {
            // Grow: remove then re-append, so only the append updates the
            // aggregate (a prior iteration of this engine double-counted
            // here by also subtracting the negative delta — see spec §9).
            let mut order = level.remove(id).expect("order id confirmed present above");
            order.quantity = new_quantity;
            level.append(order);
        }
        info!(id, trader_id, new_quantity, "order updated");
    }

    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.aggregate_quantity()))
    }

    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks
            .iter()
            .next()
            .map(|(price, level)| (*price, level.aggregate_quantity()))
    }

    /// Look up a resting order by id, regardless of owner. Used by the HTTP
    /// layer to tell "not found" apart from "wrong trader" before a
    /// cancel/update, since [`OrderBook::cancel`]/[`OrderBook::update`]
    /// themselves stay silent on both per spec.
    pub fn order(&self, id: u64) -> Option<&Order> {
        let loc = self.orders_by_id.get(&id)?;
        let level = match loc.side {
            Side::Bid => self.bids.get(&loc.price),
            Side::Ask => self.asks.get(&loc.price),
        }?;
        level.get(id)
    }

    pub fn executed_transactions(&self) -> &[Transaction] {
        &self.executed_transactions
    }

    pub fn clear_transactions(&mut self) {
        self.executed_transactions.clear();
    }

    /// Textual snapshot, one price level per line, each side ascending by
    /// price (per spec: "bids ascending by price, asks ascending by
    /// price" — note this is *not* best-first for bids).
    pub fn snapshot(&self) -> String {
        let mut out = String::from("BIDS\n");
        for (price, level) in self.bids.iter() {
            out.push_str(&format!("{price} {}\n", level.aggregate_quantity()));
        }
        out.push_str("ASKS\n");
        for (price, level) in self.asks.iter() {
            out.push_str(&format!("{price} {}\n", level.aggregate_quantity()));
        }
        out
    }

    /// `(price, aggregate_quantity)` pairs for each side, ascending by
    /// price, for JSON snapshots.
    pub fn bid_levels(&self) -> Vec<(u64, u64)> {
        self.bids
            .iter()
            .map(|(p, l)| (*p, l.aggregate_quantity()))
            .collect()
    }

    pub fn ask_levels(&self) -> Vec<(u64, u64)> {
        self.asks
            .iter()
            .map(|(p, l)| (*p, l.aggregate_quantity()))
            .collect()
    }

    // -- internal -----------------------------------------------------

    fn submit(
        &mut self,
        side: Side,
        price: u64,
        quantity: u64,
        order_type: OrderType,
        trader_id: u64,
    ) -> i64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        let mut order = Order::new(id, side, price, quantity, order_type, trader_id);
        info!(id, ?side, price, quantity, ?order_type, "order admitted");

        self.match_against(&mut order);

        if order.quantity > 0 && order.order_type.rests() {
            self.rest(order);
        } else if order.quantity > 0 {
            warn!(id, "residual discarded: order type never rests");
        }

        id as i64
    }

    /// Cross `taker` against resting liquidity on its opposite side,
    /// cascading into successive price levels until either the taker is
    /// fully filled or the book no longer crosses it.
    ///
    /// The opposite-side level is borrowed as a direct field projection
    /// (`self.bids`/`self.asks`) rather than through a helper that takes
    /// `&mut self`, so `self.executed_transactions` and `self.orders_by_id`
    /// stay independently borrowable for the duration of the inner loop.
    fn match_against(&mut self, taker: &mut Order) {
        loop {
            if taker.quantity == 0 {
                break;
            }
            let opposite_side = taker.side.opposite();
            let best_price = match opposite_side {
                Side::Bid => self.bids.keys().next_back().copied(),
                Side::Ask => self.asks.keys().next().copied(),
            };
            let Some(best_price) = best_price else {
                break;
            };
            if !crosses(taker.side, taker.price, best_price) {
                break;
            }

            let level_emptied = {
                let level = match opposite_side {
                    Side::Bid => self.bids.get_mut(&best_price),
                    Side::Ask => self.asks.get_mut(&best_price),
                }
                .expect("best_price names a level that exists");

                while taker.quantity > 0 && !level.is_empty() {
                    let maker_id = level.head_id().expect("non-empty level has a head");
                    let (maker_trader_id, maker_quantity) = {
                        let maker = level.head().expect("head id implies a head order");
                        (maker.trader_id, maker.quantity)
                    };
                    let fill = taker.quantity.min(maker_quantity);

                    self.executed_transactions.push(Transaction {
                        taker_trader_id: taker.trader_id,
                        maker_trader_id,
                        price: best_price,
                        quantity: fill,
                    });

                    taker.quantity -= fill;
                    let maker_remaining = {
                        let maker = level.get_mut(maker_id).expect("maker id still present");
                        maker.quantity -= fill;
                        maker.quantity
                    };
                    level.dec_aggregate(fill);

                    if maker_remaining == 0 {
                        level.pop_head();
                        self.orders_by_id.remove(&maker_id);
                    }
                }

                level.is_empty()
            };

            if !level_emptied {
                // Taker must be fully filled, or the inner loop would not
                // have stopped with liquidity still resting.
                break;
            }
            match opposite_side {
                Side::Bid => self.bids.remove(&best_price),
                Side::Ask => self.asks.remove(&best_price),
            };
            // The level that emptied is gone; loop back around to
            // re-derive the new best opposite price before matching again.
        }
    }

    fn rest(&mut self, order: Order) {
        let id = order.id;
        let side = order.side;
        let price = order.price;
        self.orders_by_id.insert(id, OrderLocation { side, price });
        let levels = self.levels_mut(side);
        levels
            .entry(price)
            .or_insert_with(|| PriceLevel::new(price))
            .append(order);
    }

    fn level_mut(&mut self, side: Side, price: u64) -> Option<&mut PriceLevel> {
        self.levels_mut(side).get_mut(&price)
    }

    fn levels_mut(&mut self, side: Side) -> &mut BTreeMap<u64, PriceLevel> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn remove_level(&mut self, side: Side, price: u64) {
        self.levels_mut(side).remove(&price);
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_price(price: i64) -> Option<u64> {
    u64::try_from(price).ok()
}

fn crosses(side: Side, order_price: u64, best_opposite_price: u64) -> bool {
    match side {
        Side::Bid => best_opposite_price <= order_price,
        Side::Ask => best_opposite_price >= order_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_bid(ob: &mut OrderBook, qty: u64, price: i64, trader: u64) -> i64 {
        ob.bid(qty, price, OrderType::Limit, trader)
    }
    fn limit_ask(ob: &mut OrderBook, qty: u64, price: i64, trader: u64) -> i64 {
        ob.ask(qty, price, OrderType::Limit, trader)
    }

    #[test]
    fn rejects_negative_price() {
        let mut ob = OrderBook::new();
        assert_eq!(ob.bid(10, -1, OrderType::Limit, 0), REJECTED);
        assert!(ob.best_bid().is_none());
        assert!(ob.executed_transactions().is_empty());
    }

    #[test]
    fn rejects_zero_quantity() {
        let mut ob = OrderBook::new();
        assert_eq!(ob.bid(0, 100, OrderType::Limit, 0), REJECTED);
        assert_eq!(ob.ask(0, 100, OrderType::Limit, 0), REJECTED);
    }

    // Scenario 1, spec §8.
    #[test]
    fn scenario_simple_cross_empties_book() {
        let mut ob = OrderBook::new();
        let bid_id = limit_bid(&mut ob, 10, 100, 0);
        assert_eq!(bid_id, 0);
        assert!(ob.executed_transactions().is_empty());

        let ask_id = limit_ask(&mut ob, 10, 100, 1);
        assert_eq!(ask_id, 1);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].taker_trader_id, 1);
        assert_eq!(txs[0].maker_trader_id, 0);
        assert_eq!(txs[0].price, 100);
        assert_eq!(txs[0].quantity, 10);

        assert!(ob.best_bid().is_none());
        assert!(ob.best_ask().is_none());
    }

    // Scenario 2, spec §8.
    #[test]
    fn scenario_time_priority_within_level() {
        let mut ob = OrderBook::new();
        limit_bid(&mut ob, 5, 100, 0);
        let second_bid = limit_bid(&mut ob, 5, 100, 1);
        limit_ask(&mut ob, 7, 100, 2);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(
            (txs[0].maker_trader_id, txs[0].taker_trader_id, txs[0].quantity),
            (0, 2, 5)
        );
        assert_eq!(
            (txs[1].maker_trader_id, txs[1].taker_trader_id, txs[1].quantity),
            (1, 2, 2)
        );

        assert_eq!(ob.best_bid(), Some((100, 3)));
        let level = ob.bids.get(&100).unwrap();
        assert_eq!(level.get(second_bid as u64).unwrap().quantity, 3);
    }

    // Scenario 3, spec §8: price priority across cascading levels.
    #[test]
    fn scenario_price_priority_cascades_levels() {
        let mut ob = OrderBook::new();
        limit_ask(&mut ob, 1, 101, 0);
        limit_ask(&mut ob, 1, 100, 1);
        limit_bid(&mut ob, 2, 101, 2);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(
            (txs[0].maker_trader_id, txs[0].taker_trader_id, txs[0].price, txs[0].quantity),
            (1, 2, 100, 1)
        );
        assert_eq!(
            (txs[1].maker_trader_id, txs[1].taker_trader_id, txs[1].price, txs[1].quantity),
            (0, 2, 101, 1)
        );

        assert!(ob.best_bid().is_none());
        assert!(ob.best_ask().is_none());
    }

    // Scenario 4, spec §8: update-grow loses priority.
    #[test]
    fn scenario_update_grow_loses_priority() {
        let mut ob = OrderBook::new();
        let first = limit_bid(&mut ob, 1, 100, 0);
        let second = limit_bid(&mut ob, 1, 100, 1);
        ob.update(first as u64, 5, 0);
        limit_ask(&mut ob, 2, 100, 2);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 2);
        // id=1 (second) was still at the head; fully consumed first.
        assert_eq!(txs[0].maker_trader_id, 1);
        assert_eq!(txs[0].quantity, 1);
        // id=0 (first) moved to the tail by the grow, partially filled next.
        assert_eq!(txs[1].maker_trader_id, 0);
        assert_eq!(txs[1].quantity, 1);

        let level = ob.bids.get(&100).unwrap();
        assert_eq!(level.get(first as u64).unwrap().quantity, 4);
        let _ = second;
    }

    // Scenario 5, spec §8: fill-and-kill discards residual.
    #[test]
    fn scenario_fill_and_kill_discards_residual() {
        let mut ob = OrderBook::new();
        limit_ask(&mut ob, 1, 100, 0);
        let fak_id = ob.bid(10, 100, OrderType::FillAndKill, 1);
        assert!(fak_id >= 0);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].quantity, 1);
        assert!(ob.best_bid().is_none());
        assert!(!ob.orders_by_id.contains_key(&(fak_id as u64)));
    }

    // Scenario 6, spec §8: cancel authorization.
    #[test]
    fn scenario_cancel_requires_matching_trader() {
        let mut ob = OrderBook::new();
        let id = limit_bid(&mut ob, 1, 100, 7);

        ob.cancel(id as u64, 8);
        assert!(ob.best_bid().is_some(), "wrong trader must not cancel");

        ob.cancel(id as u64, 7);
        assert!(ob.best_bid().is_none());
    }

    #[test]
    fn market_bid_never_rests_with_no_liquidity() {
        let mut ob = OrderBook::new();
        let id = ob.market_bid(10, 0);
        assert!(id >= 0);
        assert!(ob.executed_transactions().is_empty());
        assert!(!ob.orders_by_id.contains_key(&(id as u64)));
        assert!(ob.best_bid().is_none());
    }

    #[test]
    fn market_ask_never_rests_with_no_liquidity() {
        let mut ob = OrderBook::new();
        let id = ob.market_ask(10, 0);
        assert!(id >= 0);
        assert!(ob.executed_transactions().is_empty());
        assert!(!ob.orders_by_id.contains_key(&(id as u64)));
    }

    #[test]
    fn market_order_partially_fills_across_levels() {
        let mut ob = OrderBook::new();
        limit_ask(&mut ob, 5, 101, 0);
        limit_ask(&mut ob, 3, 102, 1);

        let id = ob.market_bid(6, 9);
        assert!(id >= 0);

        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].price, 101);
        assert_eq!(txs[0].quantity, 5);
        assert_eq!(txs[1].price, 102);
        assert_eq!(txs[1].quantity, 1);

        assert_eq!(ob.best_ask(), Some((102, 2)));
    }

    #[test]
    fn update_to_same_quantity_preserves_priority_and_aggregate() {
        let mut ob = OrderBook::new();
        let id = limit_bid(&mut ob, 5, 100, 0);
        ob.update(id as u64, 5, 0);
        assert_eq!(ob.best_bid(), Some((100, 5)));
        let level = ob.bids.get(&100).unwrap();
        assert_eq!(level.head_id(), Some(id as u64));
    }

    #[test]
    fn update_to_zero_quantity_cancels() {
        let mut ob = OrderBook::new();
        let id = limit_bid(&mut ob, 5, 100, 0);
        ob.update(id as u64, 0, 0);
        assert!(ob.best_bid().is_none());
        assert!(!ob.orders_by_id.contains_key(&(id as u64)));
    }

    #[test]
    fn cancel_unknown_id_is_a_silent_no_op() {
        let mut ob = OrderBook::new();
        ob.cancel(999, 0);
        assert!(ob.best_bid().is_none());
    }

    #[test]
    fn cancel_inverts_insert() {
        let mut ob = OrderBook::new();
        let id = limit_bid(&mut ob, 5, 100, 0);
        ob.cancel(id as u64, 0);
        assert!(ob.best_bid().is_none());
        assert!(ob.executed_transactions().is_empty());
        assert!(!ob.orders_by_id.contains_key(&(id as u64)));
    }

    #[test]
    fn self_trade_is_allowed_and_logged() {
        let mut ob = OrderBook::new();
        limit_bid(&mut ob, 5, 100, 42);
        limit_ask(&mut ob, 5, 100, 42);
        let txs = ob.executed_transactions();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].maker_trader_id, 42);
        assert_eq!(txs[0].taker_trader_id, 42);
    }

    #[test]
    fn no_crossing_invariant_holds_after_partial_fill() {
        let mut ob = OrderBook::new();
        limit_ask(&mut ob, 5, 100, 0);
        limit_bid(&mut ob, 3, 101, 1);

        if let (Some((bp, _)), Some((ap, _))) = (ob.best_bid(), ob.best_ask()) {
            assert!(bp < ap);
        }
    }

    #[test]
    fn equal_quantities_remove_both_orders() {
        let mut ob = OrderBook::new();
        limit_bid(&mut ob, 5, 100, 0);
        limit_ask(&mut ob, 5, 100, 1);
        assert!(ob.best_bid().is_none());
        assert!(ob.best_ask().is_none());
        assert!(ob.orders_by_id.is_empty());
    }
}
