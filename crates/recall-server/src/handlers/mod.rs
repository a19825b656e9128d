//! HTTP handler modules for the recall API.
//!
//! Handlers resolve the account, acquire its service lock, delegate to
//! [`SyncService`](crate::service::SyncService), and return JSON responses.
//! No business logic lives in handlers.

pub mod accounts;
pub mod sync;
