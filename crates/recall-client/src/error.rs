//! Client error types.

use std::rc::Rc;

use recall_core::{CoreError, RemoteDate, Table};
use recall_storage::StorageError;
use thiserror::Error;

use crate::transport::TransportError;

/// Failure of one sync round.
///
/// Transport failures that only mean "no connectivity" never surface here;
/// the round ends with [`SyncOutcome::Offline`](crate::SyncOutcome::Offline)
/// instead.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The authority returned an operation at or below the high-water mark
    /// the request carried.
    #[error(
        "protocol violation: {table} operation has remote_date {remote_date}, \
         not above high-water mark {high_water_mark}"
    )]
    ProtocolViolation {
        table: Table,
        remote_date: RemoteDate,
        high_water_mark: RemoteDate,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The authority sent an operation the client cannot decode.
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned by [`FlashcardDb`](crate::FlashcardDb) actions.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{table} row '{key}' not found")]
    NotFound { table: Table, key: String },

    /// Shared with every caller coalesced onto the same sync round.
    #[error("sync failed: {0}")]
    Sync(Rc<SyncError>),
}

impl From<Rc<SyncError>> for ClientError {
    fn from(err: Rc<SyncError>) -> Self {
        ClientError::Sync(err)
    }
}
