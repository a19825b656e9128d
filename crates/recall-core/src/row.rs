//! Synchronized rows and deletion records.
//!
//! Every synchronized row carries two timestamps: `date_created`, assigned by
//! the device that created it, and `remote_date`, a logical clock value the
//! authority stamps on first acknowledgment. A `remote_date` of [`UNSYNCED`]
//! marks a row that still sits in the device's outgoing queue.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{CardId, DeckId, DeletionId, RangeDeletionId, ReviewId};

/// Fractional seconds since the Unix epoch.
pub type Timestamp = f64;

/// Logical clock value assigned by the authority.
pub type RemoteDate = i64;

/// `remote_date` of a row the authority has not acknowledged yet.
pub const UNSYNCED: RemoteDate = 0;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Logical tables of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Decks,
    Cards,
    Reviews,
    Deletions,
    RangeDeletions,
    LearnState,
}

impl Table {
    /// The synchronized row tables, in foreign-key order.
    pub const ROWS: [Table; 3] = [Table::Decks, Table::Cards, Table::Reviews];

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Decks => "decks",
            Table::Cards => "cards",
            Table::Reviews => "reviews",
            Table::Deletions => "deletions",
            Table::RangeDeletions => "range_deletions",
            Table::LearnState => "learn_state",
        }
    }

    /// Whether this table holds [`Row`] values.
    pub fn is_row_table(self) -> bool {
        matches!(self, Table::Decks | Table::Cards | Table::Reviews)
    }

    /// Primary key of a row table, as a rangeable field.
    pub fn primary_range_field(self) -> Option<RangeField> {
        match self {
            Table::Decks => Some(RangeField::DeckId),
            Table::Cards => Some(RangeField::CardId),
            Table::Reviews => Some(RangeField::ReviewId),
            _ => None,
        }
    }

    /// Name of the primary key column.
    pub fn key_field(self) -> &'static str {
        match self {
            Table::Decks => "deck_id",
            Table::Cards | Table::LearnState => "card_id",
            Table::Reviews => "review_id",
            Table::Deletions => "deletion_id",
            Table::RangeDeletions => "range_deletion_id",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decks" => Ok(Table::Decks),
            "cards" => Ok(Table::Cards),
            "reviews" => Ok(Table::Reviews),
            "deletions" => Ok(Table::Deletions),
            "range_deletions" => Ok(Table::RangeDeletions),
            "learn_state" => Ok(Table::LearnState),
            other => Err(CoreError::UnknownTable {
                name: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Review grading
// ---------------------------------------------------------------------------

/// How well the user recalled a card, worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReviewResponse {
    CompleteBlackout = 0,
    Incorrect = 1,
    CorrectButDifficult = 2,
    Perfect = 3,
}

impl ReviewResponse {
    /// Failing grades reset the learning curve.
    pub fn is_failing(self) -> bool {
        self <= ReviewResponse::Incorrect
    }

    pub fn grade(self) -> f64 {
        f64::from(u8::from(self))
    }
}

impl TryFrom<u8> for ReviewResponse {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReviewResponse::CompleteBlackout),
            1 => Ok(ReviewResponse::Incorrect),
            2 => Ok(ReviewResponse::CorrectButDifficult),
            3 => Ok(ReviewResponse::Perfect),
            other => Err(CoreError::InvalidResponse { value: other }),
        }
    }
}

impl From<ReviewResponse> for u8 {
    fn from(r: ReviewResponse) -> u8 {
        r as u8
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deck {
    pub deck_id: DeckId,
    pub deck_name: String,
    pub date_created: Timestamp,
    pub remote_date: RemoteDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub card_id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    pub date_created: Timestamp,
    pub remote_date: RemoteDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: ReviewId,
    pub card_id: CardId,
    pub deck_id: DeckId,
    pub response: ReviewResponse,
    pub date_created: Timestamp,
    pub remote_date: RemoteDate,
}

/// A row of one of the synchronized tables.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Deck(Deck),
    Card(Card),
    Review(Review),
}

/// Table plus primary key; identifies one synchronized row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub table: Table,
    pub key: String,
}

impl RowKey {
    pub fn new(table: Table, key: impl Into<String>) -> Self {
        RowKey {
            table,
            key: key.into(),
        }
    }

    pub fn deck(id: &DeckId) -> Self {
        RowKey::new(Table::Decks, id.as_str())
    }

    pub fn card(id: &CardId) -> Self {
        RowKey::new(Table::Cards, id.as_str())
    }

    pub fn review(id: &ReviewId) -> Self {
        RowKey::new(Table::Reviews, id.as_str())
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.key)
    }
}

impl Row {
    pub fn table(&self) -> Table {
        match self {
            Row::Deck(_) => Table::Decks,
            Row::Card(_) => Table::Cards,
            Row::Review(_) => Table::Reviews,
        }
    }

    /// Primary key value.
    pub fn key(&self) -> &str {
        match self {
            Row::Deck(d) => d.deck_id.as_str(),
            Row::Card(c) => c.card_id.as_str(),
            Row::Review(r) => r.review_id.as_str(),
        }
    }

    pub fn row_key(&self) -> RowKey {
        RowKey::new(self.table(), self.key())
    }

    pub fn date_created(&self) -> Timestamp {
        match self {
            Row::Deck(d) => d.date_created,
            Row::Card(c) => c.date_created,
            Row::Review(r) => r.date_created,
        }
    }

    pub fn remote_date(&self) -> RemoteDate {
        match self {
            Row::Deck(d) => d.remote_date,
            Row::Card(c) => c.remote_date,
            Row::Review(r) => r.remote_date,
        }
    }

    pub fn set_remote_date(&mut self, remote_date: RemoteDate) {
        match self {
            Row::Deck(d) => d.remote_date = remote_date,
            Row::Card(c) => c.remote_date = remote_date,
            Row::Review(r) => r.remote_date = remote_date,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.remote_date() != UNSYNCED
    }

    /// Value of a rangeable field, if this row's table carries it.
    pub fn field(&self, field: RangeField) -> Option<&str> {
        match (self, field) {
            (Row::Deck(d), RangeField::DeckId) => Some(d.deck_id.as_str()),
            (Row::Card(c), RangeField::DeckId) => Some(c.deck_id.as_str()),
            (Row::Card(c), RangeField::CardId) => Some(c.card_id.as_str()),
            (Row::Review(r), RangeField::DeckId) => Some(r.deck_id.as_str()),
            (Row::Review(r), RangeField::CardId) => Some(r.card_id.as_str()),
            (Row::Review(r), RangeField::ReviewId) => Some(r.review_id.as_str()),
            _ => None,
        }
    }

    /// `(table, field, value)` triples describing this row and the rows it
    /// depends on. A deletion aimed at any of them takes this row down too.
    pub fn lineage(&self) -> Vec<(Table, RangeField, &str)> {
        match self {
            Row::Deck(d) => vec![(Table::Decks, RangeField::DeckId, d.deck_id.as_str())],
            Row::Card(c) => vec![
                (Table::Cards, RangeField::CardId, c.card_id.as_str()),
                (Table::Cards, RangeField::DeckId, c.deck_id.as_str()),
                (Table::Decks, RangeField::DeckId, c.deck_id.as_str()),
            ],
            Row::Review(r) => vec![
                (Table::Reviews, RangeField::ReviewId, r.review_id.as_str()),
                (Table::Reviews, RangeField::CardId, r.card_id.as_str()),
                (Table::Reviews, RangeField::DeckId, r.deck_id.as_str()),
                (Table::Cards, RangeField::CardId, r.card_id.as_str()),
                (Table::Cards, RangeField::DeckId, r.deck_id.as_str()),
                (Table::Decks, RangeField::DeckId, r.deck_id.as_str()),
            ],
        }
    }

    /// Card whose learn state this row can affect.
    pub fn implicated_card(&self) -> Option<(&CardId, &DeckId)> {
        match self {
            Row::Deck(_) => None,
            Row::Card(c) => Some((&c.card_id, &c.deck_id)),
            Row::Review(r) => Some((&r.card_id, &r.deck_id)),
        }
    }

    /// Equality ignoring `remote_date`; tells a real edit from an acknowledgment.
    pub fn same_content(&self, other: &Row) -> bool {
        match (self, other) {
            (Row::Deck(a), Row::Deck(b)) => {
                a.deck_id == b.deck_id
                    && a.deck_name == b.deck_name
                    && a.date_created == b.date_created
            }
            (Row::Card(a), Row::Card(b)) => {
                a.card_id == b.card_id
                    && a.deck_id == b.deck_id
                    && a.front == b.front
                    && a.back == b.back
                    && a.date_created == b.date_created
            }
            (Row::Review(a), Row::Review(b)) => {
                a.review_id == b.review_id
                    && a.card_id == b.card_id
                    && a.deck_id == b.deck_id
                    && a.response == b.response
                    && a.date_created == b.date_created
            }
            _ => false,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Row::Deck(d) => serde_json::to_value(d),
            Row::Card(c) => serde_json::to_value(c),
            Row::Review(r) => serde_json::to_value(r),
        }
    }

    /// Decodes a row payload for one of the row tables.
    pub fn from_json(table: Table, value: serde_json::Value) -> Result<Row, CoreError> {
        let malformed = |e: serde_json::Error| CoreError::MalformedRow {
            table: table.to_string(),
            reason: e.to_string(),
        };
        match table {
            Table::Decks => serde_json::from_value(value).map(Row::Deck).map_err(malformed),
            Table::Cards => serde_json::from_value(value).map(Row::Card).map_err(malformed),
            Table::Reviews => serde_json::from_value(value)
                .map(Row::Review)
                .map_err(malformed),
            other => Err(CoreError::WrongTable {
                table: other.to_string(),
                context: "row payloads",
            }),
        }
    }
}

impl From<Deck> for Row {
    fn from(d: Deck) -> Self {
        Row::Deck(d)
    }
}

impl From<Card> for Row {
    fn from(c: Card) -> Self {
        Row::Card(c)
    }
}

impl From<Review> for Row {
    fn from(r: Review) -> Self {
        Row::Review(r)
    }
}

// ---------------------------------------------------------------------------
// Deletion records
// ---------------------------------------------------------------------------

/// Fields a range deletion may bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeField {
    DeckId,
    CardId,
    ReviewId,
}

impl RangeField {
    pub fn as_str(self) -> &'static str {
        match self {
            RangeField::DeckId => "deck_id",
            RangeField::CardId => "card_id",
            RangeField::ReviewId => "review_id",
        }
    }

    /// Whether rows of `table` carry this field.
    pub fn applies_to(self, table: Table) -> bool {
        matches!(
            (table, self),
            (Table::Decks, RangeField::DeckId)
                | (Table::Cards, RangeField::DeckId | RangeField::CardId)
                | (Table::Reviews, _)
        )
    }
}

impl fmt::Display for RangeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangeField {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deck_id" => Ok(RangeField::DeckId),
            "card_id" => Ok(RangeField::CardId),
            "review_id" => Ok(RangeField::ReviewId),
            other => Err(CoreError::UnknownField {
                name: other.to_string(),
            }),
        }
    }
}

/// Durable marker that one row was deleted.
///
/// Kept on the device until the authority acknowledges it, so the delete
/// survives the device going offline before its next sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub deletion_id: DeletionId,
    pub table: Table,
    pub key: String,
    pub date_created: Timestamp,
    pub remote_date: RemoteDate,
}

impl Deletion {
    pub fn new(target: RowKey, date_created: Timestamp) -> Self {
        Deletion {
            deletion_id: DeletionId::new_random(),
            table: target.table,
            key: target.key,
            date_created,
            remote_date: UNSYNCED,
        }
    }

    pub fn target(&self) -> RowKey {
        RowKey::new(self.table, self.key.clone())
    }

    /// Whether this deletion removes `row` or a row it depends on.
    pub fn covers(&self, row: &Row) -> bool {
        let Some(key_field) = self.table.primary_range_field() else {
            return false;
        };
        row.lineage()
            .iter()
            .any(|&(table, field, value)| table == self.table && field == key_field && value == self.key)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.table.is_row_table() {
            return Err(CoreError::WrongTable {
                table: self.table.to_string(),
                context: "deletions",
            });
        }
        Ok(())
    }
}

/// Durable marker that every row of `table` whose `field` lies in
/// `[lower, upper]` was deleted. Bounds compare as byte strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDeletion {
    pub range_deletion_id: RangeDeletionId,
    pub table: Table,
    pub field: RangeField,
    pub lower: String,
    pub upper: String,
    pub date_created: Timestamp,
    pub remote_date: RemoteDate,
}

impl RangeDeletion {
    pub fn new(
        table: Table,
        field: RangeField,
        lower: impl Into<String>,
        upper: impl Into<String>,
        date_created: Timestamp,
    ) -> Self {
        RangeDeletion {
            range_deletion_id: RangeDeletionId::new_random(),
            table,
            field,
            lower: lower.into(),
            upper: upper.into(),
            date_created,
            remote_date: UNSYNCED,
        }
    }

    /// Range covering exactly one field value.
    pub fn exact(table: Table, field: RangeField, value: &str, date_created: Timestamp) -> Self {
        RangeDeletion::new(table, field, value, value, date_created)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.lower.as_str() <= value && value <= self.upper.as_str()
    }

    /// Whether this range removes `row` or a row it depends on.
    pub fn covers(&self, row: &Row) -> bool {
        row.lineage().iter().any(|&(table, field, value)| {
            table == self.table && field == self.field && self.contains(value)
        })
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.table() == self.table && row.field(self.field).is_some_and(|v| self.contains(v))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.table.is_row_table() {
            return Err(CoreError::WrongTable {
                table: self.table.to_string(),
                context: "range deletions",
            });
        }
        if !self.field.applies_to(self.table) {
            return Err(CoreError::InvalidRangeField {
                table: self.table.to_string(),
                field: self.field.to_string(),
            });
        }
        Ok(())
    }
}

/// Orders two `(remote_date, date_created)` pairs ascending.
pub fn compare_dates(a: (RemoteDate, Timestamp), b: (RemoteDate, Timestamp)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, deck: &str) -> Row {
        Row::Card(Card {
            card_id: CardId::from(id),
            deck_id: DeckId::from(deck),
            front: "f".into(),
            back: "b".into(),
            date_created: 1.0,
            remote_date: UNSYNCED,
        })
    }

    #[test]
    fn table_names_roundtrip() {
        for t in [
            Table::Decks,
            Table::Cards,
            Table::Reviews,
            Table::Deletions,
            Table::RangeDeletions,
            Table::LearnState,
        ] {
            assert_eq!(t.as_str().parse::<Table>().unwrap(), t);
        }
        assert!(matches!(
            "notes".parse::<Table>(),
            Err(CoreError::UnknownTable { .. })
        ));
    }

    #[test]
    fn failing_grades() {
        assert!(ReviewResponse::CompleteBlackout.is_failing());
        assert!(ReviewResponse::Incorrect.is_failing());
        assert!(!ReviewResponse::CorrectButDifficult.is_failing());
        assert!(!ReviewResponse::Perfect.is_failing());
    }

    #[test]
    fn response_rejects_out_of_scale_values() {
        let err = serde_json::from_str::<ReviewResponse>("4").unwrap_err();
        assert!(err.to_string().contains("invalid review response"));
        assert_eq!(
            serde_json::from_str::<ReviewResponse>("2").unwrap(),
            ReviewResponse::CorrectButDifficult
        );
    }

    #[test]
    fn range_matches_inclusive_bounds() {
        let range = RangeDeletion::new(Table::Cards, RangeField::DeckId, "b", "d", 0.0);
        assert!(range.matches(&card("c1", "b")));
        assert!(range.matches(&card("c1", "d")));
        assert!(!range.matches(&card("c1", "e")));
        assert!(!range.matches(&card("c1", "a")));
    }

    #[test]
    fn range_ignores_other_tables() {
        let range = RangeDeletion::exact(Table::Reviews, RangeField::DeckId, "d1", 0.0);
        assert!(!range.matches(&card("c1", "d1")));
    }

    #[test]
    fn range_field_must_exist_on_table() {
        let bad = RangeDeletion::exact(Table::Decks, RangeField::CardId, "x", 0.0);
        assert!(matches!(
            bad.validate(),
            Err(CoreError::InvalidRangeField { .. })
        ));
        let good = RangeDeletion::exact(Table::Reviews, RangeField::CardId, "x", 0.0);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn deck_deletion_covers_its_cards_and_reviews() {
        let deletion = Deletion::new(RowKey::new(Table::Decks, "d1"), 0.0);
        assert!(deletion.covers(&card("c1", "d1")));
        assert!(!deletion.covers(&card("c1", "d2")));
        let review = Row::Review(Review {
            review_id: ReviewId::from("r"),
            card_id: CardId::from("c9"),
            deck_id: DeckId::from("d1"),
            response: ReviewResponse::Perfect,
            date_created: 0.0,
            remote_date: 0,
        });
        assert!(deletion.covers(&review));
    }

    #[test]
    fn card_range_covers_reviews_of_those_cards() {
        let range = RangeDeletion::exact(Table::Cards, RangeField::DeckId, "d1", 0.0);
        let review = Row::Review(Review {
            review_id: ReviewId::from("r"),
            card_id: CardId::from("c"),
            deck_id: DeckId::from("d1"),
            response: ReviewResponse::Incorrect,
            date_created: 0.0,
            remote_date: 0,
        });
        assert!(range.covers(&review));
        assert!(!range.matches(&review));
    }

    #[test]
    fn same_content_ignores_remote_date() {
        let a = card("c1", "d1");
        let mut b = a.clone();
        b.set_remote_date(9);
        assert!(a.same_content(&b));
        assert_ne!(a, b);
    }
}
