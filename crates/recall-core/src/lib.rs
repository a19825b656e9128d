//! Data model shared by every recall crate.
//!
//! Rows, mutation operations, the sync wire format and the spaced-repetition
//! learn-state rules live here. Nothing in this crate performs I/O.

pub mod error;
pub mod id;
pub mod learn;
pub mod operation;
pub mod row;
pub mod time;
pub mod wire;

// Re-export commonly used types
pub use error::CoreError;
pub use id::{CardId, DeckId, DeletionId, RangeDeletionId, ReviewId};
pub use learn::{LearnState, SchedulerConfig};
pub use operation::{merge_order, Operation};
pub use row::{
    compare_dates, Card, Deck, Deletion, RangeDeletion, RangeField, RemoteDate, Review,
    ReviewResponse, Row, RowKey, Table, Timestamp, UNSYNCED,
};
pub use time::now;
pub use wire::{SyncRequest, SyncResponse, WireOperation};
