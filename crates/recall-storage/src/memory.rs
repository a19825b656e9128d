//! In-memory implementation of [`SyncStore`].
//!
//! [`InMemoryStore`] keeps each table in a `BTreeMap`. `commit` applies the
//! batch to a copy of the tables and swaps it in, so a batch is all or
//! nothing. Used in tests and by ephemeral devices.

use std::collections::BTreeMap;

use recall_core::{
    compare_dates, Card, CardId, Deck, DeckId, Deletion, DeletionId, LearnState, RangeDeletion,
    RangeDeletionId, RemoteDate, Review, ReviewId, Row, RowKey, Table,
};

use crate::batch::{RemoteDateFilter, Write, WriteBatch};
use crate::error::StorageError;
use crate::traits::SyncStore;

#[derive(Debug, Clone, Default)]
struct Tables {
    decks: BTreeMap<DeckId, Deck>,
    cards: BTreeMap<CardId, Card>,
    reviews: BTreeMap<ReviewId, Review>,
    deletions: BTreeMap<DeletionId, Deletion>,
    range_deletions: BTreeMap<RangeDeletionId, RangeDeletion>,
    learn_state: BTreeMap<CardId, LearnState>,
    high_water_mark: RemoteDate,
}

impl Tables {
    fn all_rows(&self, table: Table) -> Vec<Row> {
        match table {
            Table::Decks => self.decks.values().cloned().map(Row::Deck).collect(),
            Table::Cards => self.cards.values().cloned().map(Row::Card).collect(),
            Table::Reviews => self.reviews.values().cloned().map(Row::Review).collect(),
            _ => Vec::new(),
        }
    }

    fn put_row(&mut self, row: Row) {
        match row {
            Row::Deck(d) => {
                self.decks.insert(d.deck_id.clone(), d);
            }
            Row::Card(c) => {
                self.cards.insert(c.card_id.clone(), c);
            }
            Row::Review(r) => {
                self.reviews.insert(r.review_id.clone(), r);
            }
        }
    }

    fn remove_row(&mut self, key: &RowKey) {
        match key.table {
            Table::Decks => {
                self.decks.remove(&DeckId::from(key.key.as_str()));
            }
            Table::Cards => {
                self.cards.remove(&CardId::from(key.key.as_str()));
            }
            Table::Reviews => {
                self.reviews.remove(&ReviewId::from(key.key.as_str()));
            }
            _ => {}
        }
    }

    fn remove_matching(&mut self, range: &RangeDeletion) {
        match range.table {
            Table::Decks => self.decks.retain(|_, d| !range.matches(&Row::Deck(d.clone()))),
            Table::Cards => self.cards.retain(|_, c| !range.matches(&Row::Card(c.clone()))),
            Table::Reviews => self
                .reviews
                .retain(|_, r| !range.matches(&Row::Review(r.clone()))),
            _ => {}
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::PutRow(row) => self.put_row(row),
            Write::RemoveRow(key) => self.remove_row(&key),
            Write::RemoveMatching(range) => self.remove_matching(&range),
            Write::PutDeletion(d) => {
                self.deletions.insert(d.deletion_id.clone(), d);
            }
            Write::RemoveDeletion(id) => {
                self.deletions.remove(&id);
            }
            Write::PutRangeDeletion(r) => {
                self.range_deletions.insert(r.range_deletion_id.clone(), r);
            }
            Write::RemoveRangeDeletion(id) => {
                self.range_deletions.remove(&id);
            }
            Write::PutLearnState(state) => {
                self.learn_state.insert(state.card_id.clone(), state);
            }
            Write::RemoveLearnState(card_id) => {
                self.learn_state.remove(&card_id);
            }
            Write::SetHighWaterMark(mark) => self.high_water_mark = mark,
        }
    }
}

/// In-memory implementation of [`SyncStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Tables,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStore for InMemoryStore {
    fn get_row(&self, key: &RowKey) -> Result<Option<Row>, StorageError> {
        let t = &self.tables;
        Ok(match key.table {
            Table::Decks => t.decks.get(&DeckId::from(key.key.as_str())).cloned().map(Row::Deck),
            Table::Cards => t.cards.get(&CardId::from(key.key.as_str())).cloned().map(Row::Card),
            Table::Reviews => t
                .reviews
                .get(&ReviewId::from(key.key.as_str()))
                .cloned()
                .map(Row::Review),
            _ => None,
        })
    }

    fn rows(&self, table: Table, filter: RemoteDateFilter) -> Result<Vec<Row>, StorageError> {
        let mut rows: Vec<Row> = self
            .tables
            .all_rows(table)
            .into_iter()
            .filter(|r| filter.accepts(r.remote_date()))
            .collect();
        rows.sort_by(|a, b| {
            compare_dates(
                (a.remote_date(), a.date_created()),
                (b.remote_date(), b.date_created()),
            )
        });
        Ok(rows)
    }

    fn rows_in_range(&self, range: &RangeDeletion) -> Result<Vec<Row>, StorageError> {
        Ok(self
            .tables
            .all_rows(range.table)
            .into_iter()
            .filter(|r| range.matches(r))
            .collect())
    }

    fn decks(&self) -> Result<Vec<Deck>, StorageError> {
        let mut decks: Vec<Deck> = self.tables.decks.values().cloned().collect();
        decks.sort_by(|a, b| a.date_created.total_cmp(&b.date_created));
        Ok(decks)
    }

    fn cards_in_deck(&self, deck_id: &DeckId) -> Result<Vec<Card>, StorageError> {
        let mut cards: Vec<Card> = self
            .tables
            .cards
            .values()
            .filter(|c| &c.deck_id == deck_id)
            .cloned()
            .collect();
        cards.sort_by(|a, b| a.date_created.total_cmp(&b.date_created));
        Ok(cards)
    }

    fn reviews_for_card(&self, card_id: &CardId) -> Result<Vec<Review>, StorageError> {
        let mut reviews: Vec<Review> = self
            .tables
            .reviews
            .values()
            .filter(|r| &r.card_id == card_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| a.date_created.total_cmp(&b.date_created));
        Ok(reviews)
    }

    fn largest_remote_date(&self) -> Result<RemoteDate, StorageError> {
        let t = &self.tables;
        let rows = t
            .decks
            .values()
            .map(|d| d.remote_date)
            .chain(t.cards.values().map(|c| c.remote_date))
            .chain(t.reviews.values().map(|r| r.remote_date));
        let records = t
            .deletions
            .values()
            .map(|d| d.remote_date)
            .chain(t.range_deletions.values().map(|r| r.remote_date));
        Ok(rows.chain(records).max().unwrap_or(0))
    }

    fn deletions(&self, filter: RemoteDateFilter) -> Result<Vec<Deletion>, StorageError> {
        let mut out: Vec<Deletion> = self
            .tables
            .deletions
            .values()
            .filter(|d| filter.accepts(d.remote_date))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            compare_dates((a.remote_date, a.date_created), (b.remote_date, b.date_created))
        });
        Ok(out)
    }

    fn range_deletions(&self, filter: RemoteDateFilter) -> Result<Vec<RangeDeletion>, StorageError> {
        let mut out: Vec<RangeDeletion> = self
            .tables
            .range_deletions
            .values()
            .filter(|r| filter.accepts(r.remote_date))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            compare_dates((a.remote_date, a.date_created), (b.remote_date, b.date_created))
        });
        Ok(out)
    }

    fn learn_state(&self, card_id: &CardId) -> Result<Option<LearnState>, StorageError> {
        Ok(self.tables.learn_state.get(card_id).cloned())
    }

    fn learn_states_for_deck(&self, deck_id: &DeckId) -> Result<Vec<LearnState>, StorageError> {
        Ok(self
            .tables
            .learn_state
            .values()
            .filter(|s| &s.deck_id == deck_id)
            .cloned()
            .collect())
    }

    fn high_water_mark(&self) -> Result<RemoteDate, StorageError> {
        Ok(self.tables.high_water_mark)
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut next = self.tables.clone();
        for write in batch {
            next.apply(write);
        }
        self.tables = next;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.tables = Tables::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{RangeField, ReviewResponse, UNSYNCED};

    fn deck(id: &str, remote_date: RemoteDate) -> Deck {
        Deck {
            deck_id: DeckId::from(id),
            deck_name: format!("Deck {id}"),
            date_created: 1.0,
            remote_date,
        }
    }

    fn card(id: &str, deck: &str, date_created: f64) -> Card {
        Card {
            card_id: CardId::from(id),
            deck_id: DeckId::from(deck),
            front: "front".into(),
            back: "back".into(),
            date_created,
            remote_date: UNSYNCED,
        }
    }

    #[test]
    fn commit_and_query_by_foreign_key() {
        let mut store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put_row(deck("d1", 0))
            .put_row(card("c2", "d1", 2.0))
            .put_row(card("c1", "d1", 1.0))
            .put_row(card("c3", "d2", 3.0));
        store.commit(batch).unwrap();

        let cards = store.cards_in_deck(&DeckId::from("d1")).unwrap();
        let ids: Vec<_> = cards.iter().map(|c| c.card_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert!(store.get_deck(&DeckId::from("d1")).unwrap().is_some());
        assert!(store.get_card(&CardId::from("missing")).unwrap().is_none());
    }

    #[test]
    fn remote_date_filters() {
        let mut store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put_row(deck("a", 0))
            .put_row(deck("b", 3))
            .put_row(deck("c", 5));
        store.commit(batch).unwrap();

        assert_eq!(store.rows(Table::Decks, RemoteDateFilter::Unsynced).unwrap().len(), 1);
        assert_eq!(store.rows(Table::Decks, RemoteDateFilter::After(3)).unwrap().len(), 1);
        assert_eq!(store.rows(Table::Decks, RemoteDateFilter::All).unwrap().len(), 3);
        assert_eq!(store.largest_remote_date().unwrap(), 5);
        assert_eq!(store.count_unsynced().unwrap(), 1);
    }

    #[test]
    fn remove_matching_uses_inclusive_bounds() {
        let mut store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .put_row(card("c1", "a", 1.0))
            .put_row(card("c2", "b", 1.0))
            .put_row(card("c3", "c", 1.0));
        store.commit(batch).unwrap();

        let range = RangeDeletion::new(Table::Cards, RangeField::DeckId, "a", "b", 0.0);
        assert_eq!(store.rows_in_range(&range).unwrap().len(), 2);
        let mut batch = WriteBatch::new();
        batch.push(Write::RemoveMatching(range));
        store.commit(batch).unwrap();
        assert_eq!(store.rows(Table::Cards, RemoteDateFilter::All).unwrap().len(), 1);
    }

    #[test]
    fn unsynced_operations_include_deletion_records() {
        let mut store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put_row(Review {
            review_id: ReviewId::from("r1"),
            card_id: CardId::from("c1"),
            deck_id: DeckId::from("d1"),
            response: ReviewResponse::Perfect,
            date_created: 2.0,
            remote_date: UNSYNCED,
        });
        batch.push(Write::PutDeletion(Deletion::new(RowKey::new(Table::Cards, "c0"), 1.0)));
        store.commit(batch).unwrap();

        let ops = store.unsynced_operations().unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].is_deletion());
    }

    #[test]
    fn clear_resets_everything() {
        let mut store = InMemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put_row(deck("a", 4)).push(Write::SetHighWaterMark(4));
        store.commit(batch).unwrap();
        store.clear().unwrap();
        assert_eq!(store.high_water_mark().unwrap(), 0);
        assert!(store.decks().unwrap().is_empty());
    }
}
