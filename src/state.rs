use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use crate::order_book::OrderBook;
use crate::transaction::Transaction;

const BROADCAST_CAPACITY: usize = 1024;

/// Shared state handed to every axum handler: one order book behind an
/// `RwLock` (reads for snapshots/trades, writes for order submission), plus
/// broadcast channels the WS handler subscribes to so it doesn't have to
/// poll the book.
#[derive(Clone)]
pub struct AppState {
    pub order_book: Arc<RwLock<OrderBook>>,
    pub transaction_tx: broadcast::Sender<Transaction>,
    pub book_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new() -> Self {
        let (transaction_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (book_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            order_book: Arc::new(RwLock::new(OrderBook::new())),
            transaction_tx,
            book_tx,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        AppState::new()
    }
}
