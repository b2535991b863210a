use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State, WebSocketUpgrade, ws::{Message, WebSocket}},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};

use crate::{
    errors::EngineError,
    order::{OrderType, Side},
    order_book::REJECTED,
    state::AppState,
    transaction::Transaction,
};

type ApiErr = (StatusCode, Json<serde_json::Value>);
fn err(status: StatusCode, msg: &str) -> ApiErr {
    (status, Json(json!({ "error": msg })))
}

pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiErr;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| err(StatusCode::BAD_REQUEST, &e.to_string()))?;

        match serde_json::from_slice::<T>(&bytes) {
            Ok(val) => Ok(LoggedJson(val)),
            Err(e) => {
                let preview = String::from_utf8_lossy(&bytes);
                let preview = &preview[..preview.len().min(4096)];
                warn!(
                    error = %e,
                    %method,
                    uri = %uri,
                    body_preview = %preview,
                    "request body rejected: JSON deserialization failed"
                );
                Err(err(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()))
            }
        }
    }
}

/// Request payload for `POST /orders`.
///
/// `price` is required for `Limit`/`FillAndKill` orders and ignored for
/// `Market` orders.
#[derive(Deserialize)]
pub struct NewOrder {
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<i64>,
    pub quantity: u64,
    pub trader_id: u64,
}

/// Response for `POST /orders`: the assigned order id plus any
/// transactions this submission produced immediately.
#[derive(Serialize)]
pub struct OrderAck {
    pub order_id: u64,
    pub transactions: Vec<Transaction>,
}

/// Body for `PATCH /orders/{id}`.
#[derive(Deserialize)]
pub struct UpdateOrder {
    pub new_quantity: u64,
    pub trader_id: u64,
}

#[derive(Deserialize)]
pub struct TraderQuery {
    pub trader_id: u64,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    limit: Option<usize>,
}

/// A price level's aggregate resting quantity, for [`BookSnapshot`].
#[derive(Serialize, Deserialize)]
pub struct Level {
    pub price: u64,
    pub quantity: u64,
}

/// `GET /book` response: both sides, ascending by price.
#[derive(Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// A websocket message, either a book snapshot or a single transaction.
///
/// Serialized as an internally-tagged enum:
/// ```text
/// {"type": "BookSnapshot", "data": { ... }}
/// {"type": "Transaction", "data": { ... }}
/// ```
#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", content = "data")]
pub enum WsFrame {
    BookSnapshot(BookSnapshot),
    Transaction(Transaction),
}

fn levels(pairs: Vec<(u64, u64)>) -> Vec<Level> {
    pairs
        .into_iter()
        .map(|(price, quantity)| Level { price, quantity })
        .collect()
}

/// `GET /book`
/// Returns a JSON snapshot of the current order book.
pub async fn get_order_book(State(state): State<AppState>) -> impl IntoResponse {
    let book = state.order_book.read().await;
    Json(BookSnapshot {
        bids: levels(book.bid_levels()),
        asks: levels(book.ask_levels()),
    })
}

/// `GET /trades?limit=N`
/// Returns the most recent executed transactions, newest last.
pub async fn get_trades(
    State(state): State<AppState>,
    Query(q): Query<TradesQuery>,
) -> impl IntoResponse {
    let book = state.order_book.read().await;
    let all = book.executed_transactions();
    let limit = q.limit.unwrap_or(all.len()).min(all.len());
    let start = all.len() - limit;
    Json(all[start..].to_vec())
}

/// `POST /orders`
/// Admits a new order. *Success:* 200, [`OrderAck`]. *Rejected:* 400.
pub async fn create_order(
    State(state): State<AppState>,
    LoggedJson(payload): LoggedJson<NewOrder>,
) -> Result<Json<OrderAck>, EngineError> {
    if payload.quantity == 0 {
        return Err(EngineError::ZeroQuantity);
    }

    let (order_id, new_transactions) = {
        let mut book = state.order_book.write().await;
        let start = book.executed_transactions().len();

        let id = match (payload.side, payload.order_type) {
            (Side::Bid, OrderType::Market) => book.market_bid(payload.quantity, payload.trader_id),
            (Side::Ask, OrderType::Market) => book.market_ask(payload.quantity, payload.trader_id),
            (Side::Bid, _) => {
                let Some(price) = payload.price else {
                    return Err(EngineError::MissingPrice);
                };
                book.bid(payload.quantity, price, payload.order_type, payload.trader_id)
            }
            (Side::Ask, _) => {
                let Some(price) = payload.price else {
                    return Err(EngineError::MissingPrice);
                };
                book.ask(payload.quantity, price, payload.order_type, payload.trader_id)
            }
        };

        if id == REJECTED {
            return Err(EngineError::Rejected);
        }

        let new_transactions = book.executed_transactions()[start..].to_vec();
        (id as u64, new_transactions)
    };

    for tx in &new_transactions {
        let _ = state.transaction_tx.send(tx.clone());
    }
    let _ = state.book_tx.send(());

    info!(order_id, trades = new_transactions.len(), "order accepted");
    Ok(Json(OrderAck {
        order_id,
        transactions: new_transactions,
    }))
}

/// `DELETE /orders/{id}?trader_id=N`
/// *Success:* 200. *Not found:* 404. *Wrong trader:* 403.
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
    Query(q): Query<TraderQuery>,
) -> Result<impl IntoResponse, EngineError> {
    let mut book = state.order_book.write().await;
    match book.order(order_id) {
        None => return Err(EngineError::NotFound(order_id)),
        Some(order) if order.trader_id != q.trader_id => {
            return Err(EngineError::Unauthorized(q.trader_id));
        }
        Some(_) => {}
    }
    book.cancel(order_id, q.trader_id);
    drop(book);
    let _ = state.book_tx.send(());
    info!(order_id, "order cancelled");
    Ok((StatusCode::OK, Json(json!({"status": "cancelled"}))))
}

/// `PATCH /orders/{id}`
/// *Success:* 200. *Not found:* 404. *Wrong trader:* 403.
pub async fn update_order(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
    LoggedJson(payload): LoggedJson<UpdateOrder>,
) -> Result<impl IntoResponse, EngineError> {
    let mut book = state.order_book.write().await;
    match book.order(order_id) {
        None => return Err(EngineError::NotFound(order_id)),
        Some(order) if order.trader_id != payload.trader_id => {
            return Err(EngineError::Unauthorized(payload.trader_id));
        }
        Some(_) => {}
    }
    book.update(order_id, payload.new_quantity, payload.trader_id);
    drop(book);
    let _ = state.book_tx.send(());
    info!(order_id, payload.new_quantity, "order updated");
    Ok((StatusCode::OK, Json(json!({"status": "updated"}))))
}

/// `GET /ws`
/// Upgrades the connection and streams book snapshots + transactions.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut tx_rx = state.transaction_tx.subscribe();
    let mut book_rx = state.book_tx.subscribe();

    let initial = {
        let book = state.order_book.read().await;
        BookSnapshot {
            bids: levels(book.bid_levels()),
            asks: levels(book.ask_levels()),
        }
    };
    if let Err(e) = socket
        .send(Message::Text(
            serde_json::to_string(&WsFrame::BookSnapshot(initial))
                .unwrap()
                .into(),
        ))
        .await
    {
        error!("failed to send initial snapshot: {:?}", e);
        return;
    }

    loop {
        tokio::select! {
            Ok(tx) = tx_rx.recv() => {
                if let Err(e) = socket
                    .send(Message::Text(serde_json::to_string(&WsFrame::Transaction(tx)).unwrap().into()))
                    .await
                {
                    error!("websocket send transaction failed: {:?}", e);
                    break;
                }
            }
            Ok(()) = book_rx.recv() => {
                let snap = {
                    let book = state.order_book.read().await;
                    BookSnapshot {
                        bids: levels(book.bid_levels()),
                        asks: levels(book.ask_levels()),
                    }
                };
                if let Err(e) = socket
                    .send(Message::Text(serde_json::to_string(&WsFrame::BookSnapshot(snap)).unwrap().into()))
                    .await
                {
                    error!("websocket send snapshot failed: {:?}", e);
                    break;
                }
            }
            else => break,
        }
    }
}

/// Constructs the application's `Router` with all routes and shared state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/{id}", delete(cancel_order).patch(update_order))
        .route("/trades", get(get_trades))
        .route("/book", get(get_order_book))
        .route("/ws", get(ws_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(false)
                        .level(tracing::Level::TRACE),
                )
                .on_response(DefaultOnResponse::new().level(tracing::Level::TRACE)),
        )
        .with_state(state)
}
