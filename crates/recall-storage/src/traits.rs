//! The [`SyncStore`] trait defining the storage contract for synchronized rows.
//!
//! Two-layer API design:
//! - **Low-level** reads form the trait foundation, one per index of the
//!   schema: primary key, foreign key (`deck_id` on cards, `card_id` on
//!   reviews), and `(remote_date, date_created)` for sync-queue scans.
//!   Every mutation goes through [`SyncStore::commit`].
//! - **High-level convenience** methods assemble sync batches from those
//!   reads and have default implementations.
//!
//! All backends implement this trait, so the sync engine and the authority
//! run unchanged against memory or SQLite.

use recall_core::{
    merge_order, Card, CardId, Deck, DeckId, Deletion, LearnState, Operation, RangeDeletion,
    RemoteDate, Review, Row, RowKey, Table,
};

use crate::batch::{RemoteDateFilter, WriteBatch};
use crate::error::StorageError;

/// The storage contract for synchronized rows, deletion records and
/// locally derived learn state.
///
/// The trait is synchronous; callers run on a single thread and treat one
/// `commit` as one transaction.
pub trait SyncStore {
    // -------------------------------------------------------------------
    // Rows
    // -------------------------------------------------------------------

    fn get_row(&self, key: &RowKey) -> Result<Option<Row>, StorageError>;

    /// Rows of one table accepted by `filter`, ordered by
    /// `(remote_date, date_created)`.
    fn rows(&self, table: Table, filter: RemoteDateFilter) -> Result<Vec<Row>, StorageError>;

    /// Rows the range matches directly.
    fn rows_in_range(&self, range: &RangeDeletion) -> Result<Vec<Row>, StorageError>;

    /// All decks, oldest first.
    fn decks(&self) -> Result<Vec<Deck>, StorageError>;

    /// Cards of one deck, oldest first.
    fn cards_in_deck(&self, deck_id: &DeckId) -> Result<Vec<Card>, StorageError>;

    /// Reviews of one card, oldest first.
    fn reviews_for_card(&self, card_id: &CardId) -> Result<Vec<Review>, StorageError>;

    /// Largest `remote_date` over rows and deletion records; 0 when empty.
    fn largest_remote_date(&self) -> Result<RemoteDate, StorageError>;

    // -------------------------------------------------------------------
    // Deletion records
    // -------------------------------------------------------------------

    fn deletions(&self, filter: RemoteDateFilter) -> Result<Vec<Deletion>, StorageError>;

    fn range_deletions(&self, filter: RemoteDateFilter) -> Result<Vec<RangeDeletion>, StorageError>;

    // -------------------------------------------------------------------
    // Learn state
    // -------------------------------------------------------------------

    fn learn_state(&self, card_id: &CardId) -> Result<Option<LearnState>, StorageError>;

    fn learn_states_for_deck(&self, deck_id: &DeckId) -> Result<Vec<LearnState>, StorageError>;

    // -------------------------------------------------------------------
    // Sync metadata
    // -------------------------------------------------------------------

    /// Largest `remote_date` this store has fully incorporated.
    fn high_water_mark(&self) -> Result<RemoteDate, StorageError>;

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Applies every write in order, all or nothing.
    fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Drops every table, including learn state, and resets the high-water mark.
    fn clear(&mut self) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // High-level convenience methods
    // -------------------------------------------------------------------

    fn get_deck(&self, deck_id: &DeckId) -> Result<Option<Deck>, StorageError> {
        Ok(match self.get_row(&RowKey::deck(deck_id))? {
            Some(Row::Deck(deck)) => Some(deck),
            _ => None,
        })
    }

    fn get_card(&self, card_id: &CardId) -> Result<Option<Card>, StorageError> {
        Ok(match self.get_row(&RowKey::card(card_id))? {
            Some(Row::Card(card)) => Some(card),
            _ => None,
        })
    }

    /// Every operation selected by `filter` across rows and deletion
    /// records, in merge order.
    fn operations(&self, filter: RemoteDateFilter) -> Result<Vec<Operation>, StorageError> {
        let mut ops = Vec::new();
        for table in Table::ROWS {
            ops.extend(self.rows(table, filter)?.into_iter().map(Operation::Upsert));
        }
        ops.extend(self.deletions(filter)?.into_iter().map(Operation::Delete));
        ops.extend(
            self.range_deletions(filter)?
                .into_iter()
                .map(Operation::RangeDelete),
        );
        ops.sort_by(merge_order);
        Ok(ops)
    }

    /// The outgoing queue: everything not yet acknowledged.
    fn unsynced_operations(&self) -> Result<Vec<Operation>, StorageError> {
        self.operations(RemoteDateFilter::Unsynced)
    }

    /// Everything acknowledged after high-water mark `since`.
    fn operations_after(&self, since: RemoteDate) -> Result<Vec<Operation>, StorageError> {
        self.operations(RemoteDateFilter::After(since))
    }

    fn count_unsynced(&self) -> Result<usize, StorageError> {
        Ok(self.unsynced_operations()?.len())
    }
}
