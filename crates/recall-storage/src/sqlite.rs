//! SQLite implementation of [`SyncStore`].
//!
//! [`SqliteStore`] persists rows, deletion records and learn state in a
//! SQLite database with WAL mode and automatic schema migrations. Every
//! [`WriteBatch`] is applied inside one transaction. Columns are typed; the
//! only enum-valued columns (`response`, `target_table`, `field`) are decoded
//! through the data model's own conversions.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use recall_core::{
    Card, CardId, CoreError, Deck, DeckId, Deletion, DeletionId, LearnState, RangeDeletion,
    RangeDeletionId, RangeField, RemoteDate, Review, ReviewId, ReviewResponse, Row, RowKey, Table,
};

use crate::batch::{RemoteDateFilter, Write, WriteBatch};
use crate::error::StorageError;
use crate::traits::SyncStore;

const DECK_COLUMNS: &str = "deck_id, deck_name, date_created, remote_date";
const CARD_COLUMNS: &str = "card_id, deck_id, front, back, date_created, remote_date";
const REVIEW_COLUMNS: &str = "review_id, card_id, deck_id, response, date_created, remote_date";
const DELETION_COLUMNS: &str = "deletion_id, target_table, target_key, date_created, remote_date";
const RANGE_DELETION_COLUMNS: &str =
    "range_deletion_id, target_table, field, lower, upper, date_created, remote_date";
const LEARN_STATE_COLUMNS: &str =
    "card_id, deck_id, easiness_factor, review_interval, scheduled_time";

const HIGH_WATER_MARK: &str = "high_water_mark";

/// SQLite-backed implementation of [`SyncStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens an in-memory SQLite database.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Row mapping
    // -----------------------------------------------------------------------

    fn deck_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deck> {
        Ok(Deck {
            deck_id: DeckId(row.get(0)?),
            deck_name: row.get(1)?,
            date_created: row.get(2)?,
            remote_date: row.get(3)?,
        })
    }

    fn card_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Card> {
        Ok(Card {
            card_id: CardId(row.get(0)?),
            deck_id: DeckId(row.get(1)?),
            front: row.get(2)?,
            back: row.get(3)?,
            date_created: row.get(4)?,
            remote_date: row.get(5)?,
        })
    }

    fn review_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
        let raw: u8 = row.get(3)?;
        let response = ReviewResponse::try_from(raw).map_err(|e| conversion(3, Type::Integer, e))?;
        Ok(Review {
            review_id: ReviewId(row.get(0)?),
            card_id: CardId(row.get(1)?),
            deck_id: DeckId(row.get(2)?),
            response,
            date_created: row.get(4)?,
            remote_date: row.get(5)?,
        })
    }

    fn deletion_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deletion> {
        let table: String = row.get(1)?;
        Ok(Deletion {
            deletion_id: DeletionId(row.get(0)?),
            table: table.parse().map_err(|e| conversion(1, Type::Text, e))?,
            key: row.get(2)?,
            date_created: row.get(3)?,
            remote_date: row.get(4)?,
        })
    }

    fn range_deletion_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RangeDeletion> {
        let table: String = row.get(1)?;
        let field: String = row.get(2)?;
        Ok(RangeDeletion {
            range_deletion_id: RangeDeletionId(row.get(0)?),
            table: table.parse().map_err(|e| conversion(1, Type::Text, e))?,
            field: field
                .parse::<RangeField>()
                .map_err(|e| conversion(2, Type::Text, e))?,
            lower: row.get(3)?,
            upper: row.get(4)?,
            date_created: row.get(5)?,
            remote_date: row.get(6)?,
        })
    }

    fn learn_state_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LearnState> {
        Ok(LearnState {
            card_id: CardId(row.get(0)?),
            deck_id: DeckId(row.get(1)?),
            easiness_factor: row.get(2)?,
            review_interval: row.get(3)?,
            scheduled_time: row.get(4)?,
        })
    }

    /// Runs `sql` and maps every result row with `f`.
    fn query_all<T, P>(
        &self,
        sql: &str,
        params: P,
        f: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StorageError>
    where
        P: rusqlite::Params,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// `WHERE` clause selecting `filter`, binding its bound as `?1`.
    fn filter_clause(filter: RemoteDateFilter) -> (&'static str, RemoteDate) {
        match filter {
            RemoteDateFilter::All => ("?1 = ?1", 0),
            RemoteDateFilter::Unsynced => ("remote_date = ?1", recall_core::UNSYNCED),
            RemoteDateFilter::After(n) => ("remote_date > ?1", n),
        }
    }

    fn columns_of(table: Table) -> Option<&'static str> {
        match table {
            Table::Decks => Some(DECK_COLUMNS),
            Table::Cards => Some(CARD_COLUMNS),
            Table::Reviews => Some(REVIEW_COLUMNS),
            _ => None,
        }
    }

    fn rows_where(
        &self,
        table: Table,
        clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Row>, StorageError> {
        let Some(columns) = Self::columns_of(table) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "SELECT {columns} FROM {table} WHERE {clause} ORDER BY remote_date, date_created"
        );
        Ok(match table {
            Table::Decks => self
                .query_all(&sql, params, Self::deck_from_row)?
                .into_iter()
                .map(Row::Deck)
                .collect(),
            Table::Cards => self
                .query_all(&sql, params, Self::card_from_row)?
                .into_iter()
                .map(Row::Card)
                .collect(),
            _ => self
                .query_all(&sql, params, Self::review_from_row)?
                .into_iter()
                .map(Row::Review)
                .collect(),
        })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    fn apply(tx: &Transaction<'_>, write: &Write) -> Result<(), StorageError> {
        match write {
            Write::PutRow(Row::Deck(d)) => {
                tx.execute(
                    &format!("INSERT OR REPLACE INTO decks ({DECK_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                    params![d.deck_id.as_str(), d.deck_name, d.date_created, d.remote_date],
                )?;
            }
            Write::PutRow(Row::Card(c)) => {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO cards ({CARD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ),
                    params![
                        c.card_id.as_str(),
                        c.deck_id.as_str(),
                        c.front,
                        c.back,
                        c.date_created,
                        c.remote_date
                    ],
                )?;
            }
            Write::PutRow(Row::Review(r)) => {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO reviews ({REVIEW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                    ),
                    params![
                        r.review_id.as_str(),
                        r.card_id.as_str(),
                        r.deck_id.as_str(),
                        u8::from(r.response),
                        r.date_created,
                        r.remote_date
                    ],
                )?;
            }
            Write::RemoveRow(key) => {
                if key.table.is_row_table() {
                    tx.execute(
                        &format!("DELETE FROM {} WHERE {} = ?1", key.table, key.table.key_field()),
                        params![key.key],
                    )?;
                }
            }
            Write::RemoveMatching(range) => {
                if range.table.is_row_table() && range.field.applies_to(range.table) {
                    tx.execute(
                        &format!(
                            "DELETE FROM {} WHERE {} BETWEEN ?1 AND ?2",
                            range.table, range.field
                        ),
                        params![range.lower, range.upper],
                    )?;
                }
            }
            Write::PutDeletion(d) => {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO deletions ({DELETION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        d.deletion_id.as_str(),
                        d.table.as_str(),
                        d.key,
                        d.date_created,
                        d.remote_date
                    ],
                )?;
            }
            Write::RemoveDeletion(id) => {
                tx.execute(
                    "DELETE FROM deletions WHERE deletion_id = ?1",
                    params![id.as_str()],
                )?;
            }
            Write::PutRangeDeletion(r) => {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO range_deletions ({RANGE_DELETION_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    params![
                        r.range_deletion_id.as_str(),
                        r.table.as_str(),
                        r.field.as_str(),
                        r.lower,
                        r.upper,
                        r.date_created,
                        r.remote_date
                    ],
                )?;
            }
            Write::RemoveRangeDeletion(id) => {
                tx.execute(
                    "DELETE FROM range_deletions WHERE range_deletion_id = ?1",
                    params![id.as_str()],
                )?;
            }
            Write::PutLearnState(s) => {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO learn_state ({LEARN_STATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
                    ),
                    params![
                        s.card_id.as_str(),
                        s.deck_id.as_str(),
                        s.easiness_factor,
                        s.review_interval,
                        s.scheduled_time
                    ],
                )?;
            }
            Write::RemoveLearnState(card_id) => {
                tx.execute(
                    "DELETE FROM learn_state WHERE card_id = ?1",
                    params![card_id.as_str()],
                )?;
            }
            Write::SetHighWaterMark(mark) => {
                tx.execute(
                    "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
                    params![HIGH_WATER_MARK, mark],
                )?;
            }
        }
        Ok(())
    }
}

fn conversion(index: usize, ty: Type, err: CoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, ty, Box::new(err))
}

impl SyncStore for SqliteStore {
    fn get_row(&self, key: &RowKey) -> Result<Option<Row>, StorageError> {
        let Some(columns) = Self::columns_of(key.table) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT {columns} FROM {} WHERE {} = ?1",
            key.table,
            key.table.key_field()
        );
        let row = match key.table {
            Table::Decks => self
                .conn
                .query_row(&sql, params![key.key], Self::deck_from_row)
                .optional()?
                .map(Row::Deck),
            Table::Cards => self
                .conn
                .query_row(&sql, params![key.key], Self::card_from_row)
                .optional()?
                .map(Row::Card),
            _ => self
                .conn
                .query_row(&sql, params![key.key], Self::review_from_row)
                .optional()?
                .map(Row::Review),
        };
        Ok(row)
    }

    fn rows(&self, table: Table, filter: RemoteDateFilter) -> Result<Vec<Row>, StorageError> {
        let (clause, bound) = Self::filter_clause(filter);
        self.rows_where(table, clause, params![bound])
    }

    fn rows_in_range(&self, range: &RangeDeletion) -> Result<Vec<Row>, StorageError> {
        if !range.field.applies_to(range.table) {
            return Ok(Vec::new());
        }
        let clause = format!("{} BETWEEN ?1 AND ?2", range.field);
        self.rows_where(range.table, &clause, params![range.lower, range.upper])
    }

    fn decks(&self) -> Result<Vec<Deck>, StorageError> {
        self.query_all(
            &format!("SELECT {DECK_COLUMNS} FROM decks ORDER BY date_created"),
            [],
            Self::deck_from_row,
        )
    }

    fn cards_in_deck(&self, deck_id: &DeckId) -> Result<Vec<Card>, StorageError> {
        self.query_all(
            &format!("SELECT {CARD_COLUMNS} FROM cards WHERE deck_id = ?1 ORDER BY date_created"),
            params![deck_id.as_str()],
            Self::card_from_row,
        )
    }

    fn reviews_for_card(&self, card_id: &CardId) -> Result<Vec<Review>, StorageError> {
        self.query_all(
            &format!(
                "SELECT {REVIEW_COLUMNS} FROM reviews WHERE card_id = ?1 ORDER BY date_created"
            ),
            params![card_id.as_str()],
            Self::review_from_row,
        )
    }

    fn largest_remote_date(&self) -> Result<RemoteDate, StorageError> {
        let largest: Option<RemoteDate> = self.conn.query_row(
            "SELECT MAX(m) FROM (
                SELECT MAX(remote_date) AS m FROM decks
                UNION ALL SELECT MAX(remote_date) FROM cards
                UNION ALL SELECT MAX(remote_date) FROM reviews
                UNION ALL SELECT MAX(remote_date) FROM deletions
                UNION ALL SELECT MAX(remote_date) FROM range_deletions
            )",
            [],
            |row| row.get(0),
        )?;
        Ok(largest.unwrap_or(0))
    }

    fn deletions(&self, filter: RemoteDateFilter) -> Result<Vec<Deletion>, StorageError> {
        let (clause, bound) = Self::filter_clause(filter);
        self.query_all(
            &format!(
                "SELECT {DELETION_COLUMNS} FROM deletions WHERE {clause} \
                 ORDER BY remote_date, date_created"
            ),
            params![bound],
            Self::deletion_from_row,
        )
    }

    fn range_deletions(&self, filter: RemoteDateFilter) -> Result<Vec<RangeDeletion>, StorageError> {
        let (clause, bound) = Self::filter_clause(filter);
        self.query_all(
            &format!(
                "SELECT {RANGE_DELETION_COLUMNS} FROM range_deletions WHERE {clause} \
                 ORDER BY remote_date, date_created"
            ),
            params![bound],
            Self::range_deletion_from_row,
        )
    }

    fn learn_state(&self, card_id: &CardId) -> Result<Option<LearnState>, StorageError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {LEARN_STATE_COLUMNS} FROM learn_state WHERE card_id = ?1"),
                params![card_id.as_str()],
                Self::learn_state_from_row,
            )
            .optional()?)
    }

    fn learn_states_for_deck(&self, deck_id: &DeckId) -> Result<Vec<LearnState>, StorageError> {
        self.query_all(
            &format!(
                "SELECT {LEARN_STATE_COLUMNS} FROM learn_state WHERE deck_id = ?1 \
                 ORDER BY scheduled_time"
            ),
            params![deck_id.as_str()],
            Self::learn_state_from_row,
        )
    }

    fn high_water_mark(&self) -> Result<RemoteDate, StorageError> {
        let mark: Option<RemoteDate> = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![HIGH_WATER_MARK],
                |row| row.get(0),
            )
            .optional()?;
        Ok(mark.unwrap_or(0))
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        for write in batch.writes() {
            Self::apply(&tx, write)?;
        }
        tx.commit()?;
        tracing::trace!(writes = batch.len(), "committed write batch");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for table in [
            "decks",
            "cards",
            "reviews",
            "deletions",
            "range_deletions",
            "learn_state",
            "sync_meta",
        ] {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::UNSYNCED;

    fn card(id: &str, deck: &str, date_created: f64, remote_date: RemoteDate) -> Card {
        Card {
            card_id: CardId::from(id),
            deck_id: DeckId::from(deck),
            front: format!("front {id}"),
            back: format!("back {id}"),
            date_created,
            remote_date,
        }
    }

    fn review(id: &str, card: &str, response: ReviewResponse, date_created: f64) -> Review {
        Review {
            review_id: ReviewId::from(id),
            card_id: CardId::from(card),
            deck_id: DeckId::from("d"),
            response,
            date_created,
            remote_date: UNSYNCED,
        }
    }

    #[test]
    fn put_and_get_every_row_kind() {
        let mut store = SqliteStore::in_memory().unwrap();
        let deck = Deck {
            deck_id: DeckId::from("d"),
            deck_name: "Spanish".into(),
            date_created: 1.5,
            remote_date: 2,
        };
        let mut batch = WriteBatch::new();
        batch
            .put_row(deck.clone())
            .put_row(card("c", "d", 2.0, 0))
            .put_row(review("r", "c", ReviewResponse::CorrectButDifficult, 3.0));
        store.commit(batch).unwrap();

        assert_eq!(store.get_deck(&DeckId::from("d")).unwrap(), Some(deck));
        assert_eq!(
            store.get_card(&CardId::from("c")).unwrap(),
            Some(card("c", "d", 2.0, 0))
        );
        let reviews = store.reviews_for_card(&CardId::from("c")).unwrap();
        assert_eq!(reviews[0].response, ReviewResponse::CorrectButDifficult);
    }

    #[test]
    fn rows_are_ordered_by_remote_date_then_creation() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .put_row(card("a", "d", 5.0, 2))
            .put_row(card("b", "d", 9.0, 1))
            .put_row(card("c", "d", 1.0, 2));
        store.commit(batch).unwrap();

        let ids: Vec<String> = store
            .rows(Table::Cards, RemoteDateFilter::All)
            .unwrap()
            .iter()
            .map(|r| r.key().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(store.rows(Table::Cards, RemoteDateFilter::After(1)).unwrap().len(), 2);
        assert_eq!(store.largest_remote_date().unwrap(), 2);
    }

    #[test]
    fn remove_matching_deletes_by_foreign_key() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut batch = WriteBatch::new();
        batch
            .put_row(card("a", "d1", 1.0, 0))
            .put_row(card("b", "d1", 2.0, 0))
            .put_row(card("c", "d2", 3.0, 0));
        store.commit(batch).unwrap();

        let range = RangeDeletion::exact(Table::Cards, RangeField::DeckId, "d1", 4.0);
        assert_eq!(store.rows_in_range(&range).unwrap().len(), 2);
        let mut batch = WriteBatch::new();
        batch
            .push(Write::RemoveMatching(range.clone()))
            .push(Write::PutRangeDeletion(range.clone()));
        store.commit(batch).unwrap();

        assert_eq!(store.cards_in_deck(&DeckId::from("d1")).unwrap().len(), 0);
        assert_eq!(store.cards_in_deck(&DeckId::from("d2")).unwrap().len(), 1);
        assert_eq!(
            store.range_deletions(RemoteDateFilter::Unsynced).unwrap(),
            vec![range]
        );
    }

    #[test]
    fn deletion_records_round_trip_through_columns() {
        let mut store = SqliteStore::in_memory().unwrap();
        let deletion = Deletion::new(RowKey::new(Table::Reviews, "r1"), 7.25);
        let mut batch = WriteBatch::new();
        batch.push(Write::PutDeletion(deletion.clone()));
        store.commit(batch).unwrap();
        assert_eq!(store.deletions(RemoteDateFilter::All).unwrap(), vec![deletion.clone()]);

        let mut batch = WriteBatch::new();
        batch.push(Write::RemoveDeletion(deletion.deletion_id));
        store.commit(batch).unwrap();
        assert!(store.deletions(RemoteDateFilter::All).unwrap().is_empty());
    }

    #[test]
    fn learn_state_and_high_water_mark() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.high_water_mark().unwrap(), 0);
        let state = LearnState {
            card_id: CardId::from("c"),
            deck_id: DeckId::from("d"),
            easiness_factor: 2.5,
            review_interval: 86400.0,
            scheduled_time: 10.0,
        };
        let mut batch = WriteBatch::new();
        batch
            .put_learn_state(state.clone())
            .push(Write::SetHighWaterMark(12));
        store.commit(batch).unwrap();

        assert_eq!(store.learn_state(&CardId::from("c")).unwrap(), Some(state));
        assert_eq!(store.learn_states_for_deck(&DeckId::from("d")).unwrap().len(), 1);
        assert_eq!(store.high_water_mark().unwrap(), 12);

        store.clear().unwrap();
        assert_eq!(store.high_water_mark().unwrap(), 0);
        assert!(store.learn_state(&CardId::from("c")).unwrap().is_none());
    }

    #[test]
    fn out_of_range_response_is_a_decode_error() {
        let mut store = SqliteStore::in_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO reviews (review_id, card_id, deck_id, response, date_created, remote_date) \
                 VALUES ('r', 'c', 'd', 9, 1.0, 0)",
                [],
            )
            .unwrap();
        assert!(store.reviews_for_card(&CardId::from("c")).is_err());
        let mut batch = WriteBatch::new();
        batch.put_row(review("r", "c", ReviewResponse::Perfect, 1.0));
        store.commit(batch).unwrap();
        assert_eq!(store.reviews_for_card(&CardId::from("c")).unwrap().len(), 1);
    }
}
