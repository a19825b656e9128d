//! Storage error types for recall-storage.

use recall_core::CoreError;
use thiserror::Error;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema migration failed while opening the database.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored value could not be decoded back into the data model.
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },
}
