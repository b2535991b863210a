use clap::{Parser, Subcommand, builder::PossibleValuesParser};

use crate::order::{OrderType, Side};
use crate::order_book::{OrderBook, REJECTED};

/// Simple REPL-style CLI to interact with the order book.
#[derive(Parser)]
#[command(name = "order-book-cli")]
#[command(version = "0.1", about = "A demo of a limit order book engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a resting or crossing order.
    Add {
        #[arg(value_parser = PossibleValuesParser::new(["buy", "sell"]))]
        side: String,

        #[arg(value_parser = PossibleValuesParser::new(["limit", "market", "fill-and-kill"]))]
        order_type: String,

        /// Price (ignored for market orders).
        price: Option<i64>,

        /// Quantity, must be > 0.
        quantity: u64,

        /// Trader id placing the order.
        trader_id: u64,
    },
    /// Cancel a resting order.
    Cancel { order_id: u64, trader_id: u64 },
    /// Change the resting quantity of an order.
    Update {
        order_id: u64,
        new_quantity: u64,
        trader_id: u64,
    },
    /// Display the current order book.
    Book,
}

fn parse_side(s: &str) -> Side {
    match s {
        "buy" => Side::Bid,
        "sell" => Side::Ask,
        _ => unreachable!("clap restricts this to buy/sell"),
    }
}

fn parse_order_type(s: &str) -> OrderType {
    match s {
        "limit" => OrderType::Limit,
        "market" => OrderType::Market,
        "fill-and-kill" => OrderType::FillAndKill,
        _ => unreachable!("clap restricts this to limit/market/fill-and-kill"),
    }
}

fn handle_add(
    order_book: &mut OrderBook,
    side: String,
    order_type: String,
    price: Option<i64>,
    quantity: u64,
    trader_id: u64,
) {
    let side = parse_side(&side);
    let order_type = parse_order_type(&order_type);
    let price = price.unwrap_or(0);

    let id = match side {
        Side::Bid if order_type == OrderType::Market => order_book.market_bid(quantity, trader_id),
        Side::Ask if order_type == OrderType::Market => order_book.market_ask(quantity, trader_id),
        Side::Bid => order_book.bid(quantity, price, order_type, trader_id),
        Side::Ask => order_book.ask(quantity, price, order_type, trader_id),
    };

    if id == REJECTED {
        println!("order rejected");
        return;
    }
    println!("order {id} admitted");
    for tx in order_book.executed_transactions() {
        println!("{tx:?}");
    }
}

fn print_order_book(order_book: &OrderBook) {
    println!("------ Order Book ------");
    println!("Bids (ascending by price):");
    for (price, qty) in order_book.bid_levels() {
        println!("Price: {price}, Total Qty: {qty}");
    }
    println!("Asks (ascending by price):");
    for (price, qty) in order_book.ask_levels() {
        println!("Price: {price}, Total Qty: {qty}");
    }
    println!("--------------------------");
}

pub fn run_cli() {
    let cli = Cli::parse();
    let mut order_book = OrderBook::new();
    match cli.command {
        Commands::Add {
            side,
            order_type,
            price,
            quantity,
            trader_id,
        } => handle_add(&mut order_book, side, order_type, price, quantity, trader_id),
        Commands::Cancel { order_id, trader_id } => order_book.cancel(order_id, trader_id),
        Commands::Update {
            order_id,
            new_quantity,
            trader_id,
        } => order_book.update(order_id, new_quantity, trader_id),
        Commands::Book => print_order_book(&order_book),
    }
}
