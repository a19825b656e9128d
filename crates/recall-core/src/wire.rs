//! JSON wire format of the sync endpoint.
//!
//! On the wire every operation is `{"table": <name>, "row": {...}}`. Rows of
//! the synchronized tables are upserts; rows under `deletions` and
//! `range_deletions` are deletion records. Decoding into [`Operation`]
//! happens exactly once, at the sync boundary.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::operation::Operation;
use crate::row::{Deletion, RangeDeletion, RemoteDate, Row, Table};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireOperation {
    pub table: String,
    pub row: serde_json::Value,
}

/// Body of `POST /api/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operations: Vec<WireOperation>,
    pub last_sync: RemoteDate,
}

/// Response of `POST /api/sync`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Other devices' changes since `last_sync`.
    pub remote: Vec<WireOperation>,
    /// The caller's own batch, stamped with the assigned `remote_date`.
    pub local: Vec<WireOperation>,
}

impl Operation {
    pub fn decode(wire: &WireOperation) -> Result<Operation, CoreError> {
        let table: Table = wire.table.parse()?;
        let malformed = |e: serde_json::Error| CoreError::MalformedRow {
            table: wire.table.clone(),
            reason: e.to_string(),
        };
        match table {
            Table::Decks | Table::Cards | Table::Reviews => {
                Row::from_json(table, wire.row.clone()).map(Operation::Upsert)
            }
            Table::Deletions => {
                let deletion: Deletion =
                    serde_json::from_value(wire.row.clone()).map_err(malformed)?;
                deletion.validate()?;
                Ok(Operation::Delete(deletion))
            }
            Table::RangeDeletions => {
                let range: RangeDeletion =
                    serde_json::from_value(wire.row.clone()).map_err(malformed)?;
                range.validate()?;
                Ok(Operation::RangeDelete(range))
            }
            Table::LearnState => Err(CoreError::WrongTable {
                table: table.to_string(),
                context: "sync operations",
            }),
        }
    }

    pub fn encode(&self) -> Result<WireOperation, CoreError> {
        let table = self.wire_table();
        let row = match self {
            Operation::Upsert(row) => row.to_json(),
            Operation::Delete(d) => serde_json::to_value(d),
            Operation::RangeDelete(r) => serde_json::to_value(r),
        }
        .map_err(|e| CoreError::MalformedRow {
            table: table.to_string(),
            reason: e.to_string(),
        })?;
        Ok(WireOperation {
            table: table.to_string(),
            row,
        })
    }
}

/// Decodes a whole list, failing on the first bad entry.
pub fn decode_all(wire: &[WireOperation]) -> Result<Vec<Operation>, CoreError> {
    wire.iter().map(Operation::decode).collect()
}

pub fn encode_all(ops: &[Operation]) -> Result<Vec<WireOperation>, CoreError> {
    ops.iter().map(Operation::encode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_card_upsert() {
        let wire = WireOperation {
            table: "cards".into(),
            row: json!({
                "card_id": "c1", "deck_id": "d1", "front": "F", "back": "B",
                "date_created": 10.5, "remote_date": 0
            }),
        };
        let op = Operation::decode(&wire).unwrap();
        match &op {
            Operation::Upsert(Row::Card(card)) => {
                assert_eq!(card.front, "F");
                assert_eq!(card.date_created, 10.5);
            }
            other => panic!("expected card upsert, got {other:?}"),
        }
        assert_eq!(op.encode().unwrap(), wire);
    }

    #[test]
    fn rejects_learn_state_operations() {
        let wire = WireOperation {
            table: "learn_state".into(),
            row: json!({}),
        };
        assert!(matches!(
            Operation::decode(&wire),
            Err(CoreError::WrongTable { .. })
        ));
    }

    #[test]
    fn rejects_row_missing_fields() {
        let wire = WireOperation {
            table: "decks".into(),
            row: json!({ "deck_id": "d1" }),
        };
        assert!(matches!(
            Operation::decode(&wire),
            Err(CoreError::MalformedRow { .. })
        ));
    }

    #[test]
    fn rejects_range_over_missing_field() {
        let wire = WireOperation {
            table: "range_deletions".into(),
            row: json!({
                "range_deletion_id": "x", "table": "decks", "field": "review_id",
                "lower": "a", "upper": "b", "date_created": 1.0, "remote_date": 0
            }),
        };
        assert!(matches!(
            Operation::decode(&wire),
            Err(CoreError::InvalidRangeField { .. })
        ));
    }

    #[test]
    fn deletion_wire_shape() {
        let wire = WireOperation {
            table: "deletions".into(),
            row: json!({
                "deletion_id": "del-1", "table": "cards", "key": "c1",
                "date_created": 3.5, "remote_date": 4
            }),
        };
        let op = Operation::decode(&wire).unwrap();
        let Operation::Delete(deletion) = &op else {
            panic!("expected deletion, got {op:?}");
        };
        insta::assert_json_snapshot!(deletion, @r###"
        {
          "deletion_id": "del-1",
          "table": "cards",
          "key": "c1",
          "date_created": 3.5,
          "remote_date": 4
        }
        "###);
        assert_eq!(op.encode().unwrap(), wire);
    }
}
