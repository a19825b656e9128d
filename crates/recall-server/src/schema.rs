//! Request/response types for the non-sync endpoints.
//!
//! The sync endpoint speaks [`recall_core::SyncRequest`] and
//! [`recall_core::SyncResponse`] directly.

use serde::{Deserialize, Serialize};

/// Response of `POST /api/reset`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    /// Number of sample decks seeded.
    pub decks: usize,
    /// Number of sample cards seeded.
    pub cards: usize,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub accounts: usize,
}
