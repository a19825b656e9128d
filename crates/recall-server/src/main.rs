//! Binary entrypoint for the recall sync server.
//!
//! Reads configuration from environment variables:
//! - `RECALL_DB_DIR`: directory holding one SQLite file per account (default: "./recall-data")
//! - `RECALL_PORT`: Server listen port (default: "5002")

use recall_server::router::build_router;
use recall_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let db_dir = std::env::var("RECALL_DB_DIR").unwrap_or_else(|_| "./recall-data".to_string());
    let port = std::env::var("RECALL_PORT").unwrap_or_else(|_| "5002".to_string());

    let state = AppState::new(&db_dir)?;
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("recall server starting on {} (accounts in {})", addr, db_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
