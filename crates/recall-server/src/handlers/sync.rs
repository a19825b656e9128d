//! The sync endpoint.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use recall_core::{SyncRequest, SyncResponse};

use crate::error::ApiError;
use crate::state::{account_id, AppState};

/// Pushes the caller's batch and pulls everything newer than `last_sync`.
///
/// `POST /api/sync`
pub async fn sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, ApiError> {
    let account = account_id(&headers)?;
    let service = state.accounts.get_or_open(&account)?;
    let mut service = service.lock().await;
    let response = service.sync(req)?;
    Ok(Json(response))
}
