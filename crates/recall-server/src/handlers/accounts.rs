//! Account maintenance and health handlers.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::ApiError;
use crate::schema::{HealthResponse, ResetResponse};
use crate::state::{account_id, AppState};

/// Clears the account and seeds the sample decks.
///
/// `POST /api/reset`
pub async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, ApiError> {
    let account = account_id(&headers)?;
    let service = state.accounts.get_or_open(&account)?;
    let mut service = service.lock().await;
    Ok(Json(service.reset()?))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        accounts: state.accounts.len(),
    })
}
