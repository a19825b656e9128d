//! Offline-first flashcard client.
//!
//! [`FlashcardDb`] is the entry point: it records user actions in a local
//! [`SyncStore`](recall_storage::SyncStore), exposes live views as flows, and
//! reconciles the outgoing queue with a remote authority through a
//! [`Transport`]. Merges follow last-delete-wins: a deletion record beats any
//! insert or edit of the row or of rows that depend on it.

pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod locker;
pub mod merge;
pub mod review_queue;
pub mod transport;

pub use db::{FlashcardDb, SyncResult};
pub use engine::{SharedStore, SyncEngine, SyncOutcome, SyncReport, SyncState};
pub use error::{ClientError, SyncError};
pub use events::{ChangeEvent, ChangeKind, Changed, EventBus, Subscription};
pub use locker::Locker;
pub use merge::{plan_merge, MergePlan};
pub use review_queue::{ReviewQueue, ReviewQueueState};
pub use transport::{HttpTransport, Transport, TransportError};
