//! Atomic write batches and sync-queue filters.

use recall_core::{
    CardId, Deletion, DeletionId, LearnState, RangeDeletion, RangeDeletionId, RemoteDate, Row,
    RowKey, UNSYNCED,
};

/// Selects rows or records by `remote_date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDateFilter {
    All,
    /// `remote_date == 0`: still queued for the authority.
    Unsynced,
    /// `remote_date > n`: acknowledged after high-water mark `n`.
    After(RemoteDate),
}

impl RemoteDateFilter {
    pub fn accepts(self, remote_date: RemoteDate) -> bool {
        match self {
            RemoteDateFilter::All => true,
            RemoteDateFilter::Unsynced => remote_date == UNSYNCED,
            RemoteDateFilter::After(n) => remote_date > n,
        }
    }
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert-or-replace by primary key.
    PutRow(Row),
    RemoveRow(RowKey),
    /// Remove every row the range matches directly.
    RemoveMatching(RangeDeletion),
    PutDeletion(Deletion),
    RemoveDeletion(DeletionId),
    PutRangeDeletion(RangeDeletion),
    RemoveRangeDeletion(RangeDeletionId),
    PutLearnState(LearnState),
    RemoveLearnState(CardId),
    SetHighWaterMark(RemoteDate),
}

/// An ordered list of writes applied atomically by [`SyncStore::commit`].
///
/// [`SyncStore::commit`]: crate::SyncStore::commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn put_row(&mut self, row: impl Into<Row>) -> &mut Self {
        self.push(Write::PutRow(row.into()))
    }

    pub fn remove_row(&mut self, key: RowKey) -> &mut Self {
        self.push(Write::RemoveRow(key))
    }

    pub fn put_learn_state(&mut self, state: LearnState) -> &mut Self {
        self.push(Write::PutLearnState(state))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.writes.extend(other.writes);
    }
}

impl IntoIterator for WriteBatch {
    type Item = Write;
    type IntoIter = std::vec::IntoIter<Write>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Write>>(iter: I) -> Self {
        WriteBatch {
            writes: iter.into_iter().collect(),
        }
    }
}
