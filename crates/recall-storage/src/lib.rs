//! Local storage for synchronized rows.
//!
//! Provides the [`SyncStore`] trait defining the storage contract, plus the
//! [`InMemoryStore`] and [`SqliteStore`] backends.
//!
//! # Architecture
//!
//! The storage layer has a two-layer API:
//! - **Low-level** reads by primary key, secondary index and sync-queue scan,
//!   and a single atomic write entry point, [`SyncStore::commit`], taking a
//!   [`WriteBatch`]. One batch is one transaction.
//! - **High-level convenience** methods (`unsynced_operations`,
//!   `operations_after`, `count_unsynced`) built on the low-level reads.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`batch`]: WriteBatch, Write and RemoteDateFilter
//! - [`traits`]: SyncStore trait definition
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup for the SQLite backend
//! - [`sqlite`]: SqliteStore implementation

pub mod batch;
pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;

// Re-export key types for ergonomic use.
pub use batch::{RemoteDateFilter, Write, WriteBatch};
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::SyncStore;
