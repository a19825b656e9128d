//! Merge planning for one sync round.
//!
//! [`plan_merge`] turns the authority's answer into a single [`WriteBatch`]
//! plus the change events it will cause, without touching the store. The
//! rules:
//!
//! - Both lists are put in merge order. Upserts from `remote` are staged
//!   first, then upserts from `local`, so the device's own echo wins ties.
//! - An upsert is dropped when any deletion record of the round, or any
//!   deletion still waiting in the outgoing queue, covers the row or a row
//!   it depends on. Deletes always win.
//! - A remote upsert does not overwrite a row with unsynced local edits;
//!   those edits go out with the next round.
//! - A local echo is an acknowledgment. It is dropped when the row has been
//!   deleted locally since, or edited again while the round was in flight.
//! - Deletion records from both lists are applied after all upserts. Echoed
//!   local records are retired; remote ones are not stored.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};

use recall_core::{
    merge_order, CardId, Deletion, DeletionId, Operation, RangeDeletion, RangeDeletionId,
    RemoteDate, Row, RowKey, Table,
};
use recall_storage::{RemoteDateFilter, SyncStore, Write, WriteBatch};

use crate::error::SyncError;
use crate::events::{ChangeEvent, ChangeKind};

/// Everything one round will do to the local store.
#[derive(Debug, Default)]
pub struct MergePlan {
    pub batch: WriteBatch,
    pub events: Vec<ChangeEvent>,
    /// Cards whose learn state must be recomputed.
    pub implicated_cards: IndexSet<CardId>,
    pub high_water_mark: RemoteDate,
    /// Upserts staged, acknowledgments included.
    pub rows_applied: usize,
    /// Rows removed by deletion records.
    pub rows_removed: usize,
}

/// Fails if any returned operation is not newer than `high_water_mark`.
pub fn validate(
    ops: &[Operation],
    high_water_mark: RemoteDate,
) -> Result<(), SyncError> {
    match ops.iter().find(|op| op.remote_date() <= high_water_mark) {
        Some(op) => Err(SyncError::ProtocolViolation {
            table: op.wire_table(),
            remote_date: op.remote_date(),
            high_water_mark,
        }),
        None => Ok(()),
    }
}

/// Plans the merge of one sync response.
pub fn plan_merge(
    store: &dyn SyncStore,
    mut remote: Vec<Operation>,
    mut local: Vec<Operation>,
    high_water_mark: RemoteDate,
) -> Result<MergePlan, SyncError> {
    validate(&remote, high_water_mark)?;
    validate(&local, high_water_mark)?;
    remote.sort_by(merge_order);
    local.sort_by(merge_order);

    let mut plan = MergePlan {
        high_water_mark: next_high_water_mark(&remote, &local, high_water_mark),
        ..MergePlan::default()
    };

    // Every deletion that must win over upserts this round.
    let mut deletions: Vec<&Deletion> = Vec::new();
    let mut ranges: Vec<&RangeDeletion> = Vec::new();
    for op in remote.iter().chain(&local) {
        match op {
            Operation::Delete(d) => deletions.push(d),
            Operation::RangeDelete(r) => ranges.push(r),
            Operation::Upsert(_) => {}
        }
    }
    let pending_deletions = store.deletions(RemoteDateFilter::Unsynced)?;
    let pending_ranges = store.range_deletions(RemoteDateFilter::Unsynced)?;
    deletions.extend(&pending_deletions);
    ranges.extend(&pending_ranges);
    let is_deleted = |row: &Row| {
        deletions.iter().any(|d| d.covers(row)) || ranges.iter().any(|r| r.covers(row))
    };

    // Upserts: remote first, then the local echo.
    let mut staged: IndexMap<RowKey, Row> = IndexMap::new();
    for (op, is_local) in remote
        .iter()
        .map(|op| (op, false))
        .chain(local.iter().map(|op| (op, true)))
    {
        let Operation::Upsert(row) = op else {
            continue;
        };
        if is_deleted(row) {
            tracing::debug!(key = %row.row_key(), "dropping upsert of a deleted row");
            continue;
        }
        let key = row.row_key();
        let stored = store.get_row(&key)?;
        let keep = match (&stored, is_local) {
            (None, true) => false,
            (Some(current), true) => current.is_synced() || current.same_content(row),
            (Some(current), false) => current.is_synced(),
            (None, false) => true,
        };
        if keep {
            staged.insert(key, row.clone());
        } else {
            tracing::debug!(key = %key, local = is_local, "keeping local version over synced copy");
        }
    }

    let mut row_events: IndexMap<(Table, ChangeKind), Vec<Row>> = IndexMap::new();
    for (key, row) in &staged {
        let kind = match store.get_row(key)? {
            None => Some(ChangeKind::Add),
            Some(current) if !current.same_content(row) => Some(ChangeKind::Modify),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            row_events
                .entry((row.table(), kind))
                .or_default()
                .push(row.clone());
            implicate(&mut plan.implicated_cards, row);
        }
        plan.batch.put_row(row.clone());
    }
    plan.rows_applied = staged.len();

    // Deletion records, in merge order across both lists.
    let local_deletions: HashSet<&DeletionId> = local
        .iter()
        .filter_map(|op| match op {
            Operation::Delete(d) => Some(&d.deletion_id),
            _ => None,
        })
        .collect();
    let local_ranges: HashSet<&RangeDeletionId> = local
        .iter()
        .filter_map(|op| match op {
            Operation::RangeDelete(r) => Some(&r.range_deletion_id),
            _ => None,
        })
        .collect();

    let mut records: Vec<&Operation> = remote
        .iter()
        .chain(&local)
        .filter(|op| op.is_deletion())
        .collect();
    records.sort_by(|a, b| merge_order(a, b));

    let mut removed: HashSet<RowKey> = HashSet::new();
    for op in records {
        match op {
            Operation::Delete(d) => {
                let key = d.target();
                if removed.insert(key.clone()) {
                    if let Some(row) = store.get_row(&key)? {
                        implicate(&mut plan.implicated_cards, &row);
                        row_events
                            .entry((key.table, ChangeKind::Delete))
                            .or_default()
                            .push(row);
                    }
                }
                plan.batch.push(Write::RemoveRow(key));
                if local_deletions.contains(&d.deletion_id) {
                    plan.batch.push(Write::RemoveDeletion(d.deletion_id.clone()));
                }
            }
            Operation::RangeDelete(r) => {
                let rows: Vec<Row> = store
                    .rows_in_range(r)?
                    .into_iter()
                    .filter(|row| removed.insert(row.row_key()))
                    .collect();
                for row in &rows {
                    implicate(&mut plan.implicated_cards, row);
                }
                if !rows.is_empty() {
                    row_events
                        .entry((r.table, ChangeKind::RangeDelete))
                        .or_default()
                        .extend(rows);
                }
                plan.batch.push(Write::RemoveMatching(r.clone()));
                if local_ranges.contains(&r.range_deletion_id) {
                    plan.batch
                        .push(Write::RemoveRangeDeletion(r.range_deletion_id.clone()));
                }
            }
            Operation::Upsert(_) => {}
        }
    }
    plan.rows_removed = removed.len();

    plan.events = row_events
        .into_iter()
        .map(|((table, kind), rows)| ChangeEvent::rows(kind, table, rows))
        .collect();
    plan.batch
        .push(Write::SetHighWaterMark(plan.high_water_mark));
    Ok(plan)
}

/// The local echo is stamped with one clock value, so its maximum is
/// authoritative; otherwise fall back to the remote list.
fn next_high_water_mark(remote: &[Operation], local: &[Operation], current: RemoteDate) -> RemoteDate {
    local
        .iter()
        .map(Operation::remote_date)
        .max()
        .or_else(|| remote.iter().map(Operation::remote_date).max())
        .unwrap_or(current)
}

fn implicate(cards: &mut IndexSet<CardId>, row: &Row) {
    if let Some((card_id, _)) = row.implicated_card() {
        cards.insert(card_id.clone());
    }
}
