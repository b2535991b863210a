use axum::Router;
use clap::{Parser, Subcommand};
use order_book_engine::api;
use order_book_engine::cli;
use order_book_engine::state::AppState;
use order_book_engine::utils::shutdown_token;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "engine-cli")]
#[command(version = "0.1", about = "A limit-order-book matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server.
    Server { port: u16 },
    /// Run the interactive REPL against an in-process book.
    Repl,
}

async fn get_app_listener(port: u16, state: AppState) -> anyhow::Result<(tokio::net::TcpListener, Router)> {
    let app = api::router(state);
    let ep = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(ep).await?;
    Ok((listener, app))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Server { port } => {
            let token = shutdown_token();
            let state = AppState::new();
            let (listener, app) = get_app_listener(port, state).await?;
            tracing::info!("HTTP/WS server listening on 0.0.0.0:{}", port);
            axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await?;
        }
        Commands::Repl => cli::run_cli(),
    }
    Ok(())
}
