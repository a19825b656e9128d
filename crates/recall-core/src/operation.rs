//! Mutation operations exchanged during a sync round.

use std::cmp::Ordering;

use crate::row::{compare_dates, Deletion, RangeDeletion, RemoteDate, Row, Table, Timestamp};

/// One entry of the mutation log.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert-or-modify by primary key.
    Upsert(Row),
    /// Point delete of one row.
    Delete(Deletion),
    /// Delete every row whose field lies in a key range.
    RangeDelete(RangeDeletion),
}

impl Operation {
    /// Table name used on the wire for this operation.
    pub fn wire_table(&self) -> Table {
        match self {
            Operation::Upsert(row) => row.table(),
            Operation::Delete(_) => Table::Deletions,
            Operation::RangeDelete(_) => Table::RangeDeletions,
        }
    }

    pub fn remote_date(&self) -> RemoteDate {
        match self {
            Operation::Upsert(row) => row.remote_date(),
            Operation::Delete(d) => d.remote_date,
            Operation::RangeDelete(r) => r.remote_date,
        }
    }

    pub fn set_remote_date(&mut self, remote_date: RemoteDate) {
        match self {
            Operation::Upsert(row) => row.set_remote_date(remote_date),
            Operation::Delete(d) => d.remote_date = remote_date,
            Operation::RangeDelete(r) => r.remote_date = remote_date,
        }
    }

    pub fn date_created(&self) -> Timestamp {
        match self {
            Operation::Upsert(row) => row.date_created(),
            Operation::Delete(d) => d.date_created,
            Operation::RangeDelete(r) => r.date_created,
        }
    }

    pub fn is_deletion(&self) -> bool {
        !matches!(self, Operation::Upsert(_))
    }
}

impl From<Row> for Operation {
    fn from(row: Row) -> Self {
        Operation::Upsert(row)
    }
}

/// The global merge order: `(remote_date, date_created)` ascending.
pub fn merge_order(a: &Operation, b: &Operation) -> Ordering {
    compare_dates(
        (a.remote_date(), a.date_created()),
        (b.remote_date(), b.date_created()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::DeckId;
    use crate::row::{Deck, RowKey};

    fn deck(remote_date: RemoteDate, date_created: Timestamp) -> Operation {
        Operation::Upsert(Row::Deck(Deck {
            deck_id: DeckId::new_random(),
            deck_name: "d".into(),
            date_created,
            remote_date,
        }))
    }

    #[test]
    fn merge_order_sorts_by_remote_then_created() {
        let mut ops = vec![deck(2, 1.0), deck(1, 5.0), deck(1, 3.0)];
        ops.sort_by(merge_order);
        let dates: Vec<_> = ops
            .iter()
            .map(|o| (o.remote_date(), o.date_created()))
            .collect();
        assert_eq!(dates, vec![(1, 3.0), (1, 5.0), (2, 1.0)]);
    }

    #[test]
    fn deletions_travel_under_their_own_tables() {
        let del = Operation::Delete(Deletion::new(RowKey::new(Table::Cards, "c"), 1.0));
        assert_eq!(del.wire_table(), Table::Deletions);
        assert!(del.is_deletion());
        assert_eq!(deck(0, 0.0).wire_table(), Table::Decks);
    }

    #[test]
    fn set_remote_date_reaches_every_variant() {
        let mut del = Operation::Delete(Deletion::new(RowKey::new(Table::Cards, "c"), 1.0));
        del.set_remote_date(7);
        assert_eq!(del.remote_date(), 7);
        let mut up = deck(0, 0.0);
        up.set_remote_date(8);
        assert_eq!(up.remote_date(), 8);
    }
}
