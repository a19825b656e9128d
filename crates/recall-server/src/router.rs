//! Router assembly for the recall HTTP API.
//!
//! [`build_router`] wires all handler functions to their routes with
//! CORS and tracing middleware layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router with all API routes.
///
/// CORS is permissive (devices may be served from any origin).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync", post(handlers::sync::sync))
        .route("/api/reset", post(handlers::accounts::reset))
        .route("/health", get(handlers::accounts::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
