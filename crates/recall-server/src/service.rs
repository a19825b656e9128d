//! The sync authority for one account.
//!
//! [`SyncService`] owns the account's store and implements the server half
//! of a sync round: it replays everything stamped after the caller's
//! high-water mark, assigns one logical clock value to the caller's batch,
//! and applies that batch under last-delete-wins.

use std::collections::HashSet;

use recall_core::wire::{decode_all, encode_all};
use recall_core::{
    now, Card, CardId, Deck, DeckId, Deletion, Operation, RangeDeletion, RemoteDate, Row, RowKey,
    SyncRequest, SyncResponse,
};
use recall_storage::{RemoteDateFilter, SqliteStore, SyncStore, Write, WriteBatch};

use crate::error::ApiError;
use crate::schema::ResetResponse;

/// Sample decks written by [`SyncService::reset`]: `(name, card count)`.
const SEED_DECKS: [(&str, usize); 2] = [("Deck 0", 10), ("Deck 1", 3)];

/// Server-side state for one account.
pub struct SyncService {
    store: Box<dyn SyncStore + Send>,
}

impl SyncService {
    pub fn new(store: Box<dyn SyncStore + Send>) -> Self {
        SyncService { store }
    }

    /// Opens (or creates) the account database at `path`.
    pub fn open(path: &str) -> Result<Self, ApiError> {
        Ok(SyncService::new(Box::new(SqliteStore::new(path)?)))
    }

    pub fn in_memory() -> Result<Self, ApiError> {
        Ok(SyncService::new(Box::new(SqliteStore::in_memory()?)))
    }

    /// One sync round.
    ///
    /// `remote` holds every operation stamped after `last_sync`, read before
    /// the incoming batch is applied, plus a fresh deletion for each
    /// incoming upsert that targets an already deleted row. `local` echoes
    /// the incoming batch with the assigned clock.
    pub fn sync(&mut self, request: SyncRequest) -> Result<SyncResponse, ApiError> {
        let incoming = decode_all(&request.operations).map_err(|e| {
            let index = request
                .operations
                .iter()
                .position(|op| Operation::decode(op).is_err())
                .unwrap_or(0);
            ApiError::InvalidOperation {
                index,
                reason: e.to_string(),
            }
        })?;

        let mut remote = self.store.operations_after(request.last_sync)?;
        let clock = self.store.largest_remote_date()?.max(request.last_sync) + 1;

        let mut local = incoming;
        for op in &mut local {
            op.set_remote_date(clock);
        }

        let (batch, resurrections) = self.plan_writes(&local, clock)?;
        self.store.commit(batch)?;

        if !resurrections.is_empty() {
            tracing::info!(
                count = resurrections.len(),
                "refused upserts of deleted rows"
            );
        }
        remote.extend(resurrections.into_iter().map(Operation::Delete));

        tracing::info!(
            last_sync = request.last_sync,
            clock,
            remote = remote.len(),
            local = local.len(),
            "sync round"
        );

        Ok(SyncResponse {
            remote: encode_all(&remote)?,
            local: encode_all(&local)?,
        })
    }

    /// Writes for a stamped batch. Upserts are written first so that
    /// deletions in the same batch take them down again.
    fn plan_writes(
        &self,
        local: &[Operation],
        clock: RemoteDate,
    ) -> Result<(WriteBatch, Vec<Deletion>), ApiError> {
        let mut deletions = self.store.deletions(RemoteDateFilter::All)?;
        let mut ranges = self.store.range_deletions(RemoteDateFilter::All)?;
        for op in local {
            match op {
                Operation::Delete(d) => deletions.push(d.clone()),
                Operation::RangeDelete(r) => ranges.push(r.clone()),
                Operation::Upsert(_) => {}
            }
        }
        let is_deleted = |row: &Row| is_covered(row, &deletions, &ranges);

        let mut upserts = WriteBatch::new();
        let mut removals = WriteBatch::new();
        let mut resurrections = Vec::new();
        let mut refused: HashSet<RowKey> = HashSet::new();

        for op in local {
            match op {
                Operation::Upsert(row) if is_deleted(row) => {
                    let key = row.row_key();
                    if refused.insert(key.clone()) {
                        let mut deletion = Deletion::new(key, row.date_created());
                        deletion.remote_date = clock;
                        removals.push(Write::PutDeletion(deletion.clone()));
                        resurrections.push(deletion);
                    }
                }
                Operation::Upsert(row) => {
                    upserts.put_row(row.clone());
                }
                Operation::Delete(d) => {
                    removals
                        .push(Write::RemoveRow(d.target()))
                        .push(Write::PutDeletion(d.clone()));
                }
                Operation::RangeDelete(r) => {
                    removals
                        .push(Write::RemoveMatching(r.clone()))
                        .push(Write::PutRangeDeletion(r.clone()));
                }
            }
        }
        upserts.extend(removals);
        Ok((upserts, resurrections))
    }

    /// Drops every row and record of the account and seeds the sample decks.
    pub fn reset(&mut self) -> Result<ResetResponse, ApiError> {
        self.store.clear()?;
        let t = now();
        let mut batch = WriteBatch::new();
        let mut cards = 0;
        for (name, count) in SEED_DECKS {
            let deck_id = DeckId::new_random();
            batch.put_row(Deck {
                deck_id: deck_id.clone(),
                deck_name: name.to_string(),
                date_created: t,
                remote_date: 1,
            });
            for j in 0..count {
                batch.put_row(Card {
                    card_id: CardId::new_random(),
                    deck_id: deck_id.clone(),
                    front: format!("Front {}", j + 1),
                    back: format!("Back {}", j + 1),
                    date_created: t,
                    remote_date: 1,
                });
                cards += 1;
            }
        }
        self.store.commit(batch)?;
        tracing::info!(decks = SEED_DECKS.len(), cards, "account reset");
        Ok(ResetResponse {
            success: true,
            decks: SEED_DECKS.len(),
            cards,
        })
    }

    pub fn store(&self) -> &dyn SyncStore {
        self.store.as_ref()
    }
}

/// Whether any of the deletion records takes `row` down.
pub fn is_covered(row: &Row, deletions: &[Deletion], ranges: &[RangeDeletion]) -> bool {
    deletions.iter().any(|d| d.covers(row)) || ranges.iter().any(|r| r.covers(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{RangeField, Review, ReviewResponse, Table, UNSYNCED};

    fn card(id: &str, deck: &str, date_created: f64) -> Operation {
        Operation::Upsert(Row::Card(Card {
            card_id: CardId::from(id),
            deck_id: DeckId::from(deck),
            front: "f".into(),
            back: "b".into(),
            date_created,
            remote_date: UNSYNCED,
        }))
    }

    fn request(ops: &[Operation], last_sync: RemoteDate) -> SyncRequest {
        SyncRequest {
            operations: encode_all(ops).unwrap(),
            last_sync,
        }
    }

    fn decoded(wire: &[recall_core::WireOperation]) -> Vec<Operation> {
        decode_all(wire).unwrap()
    }

    #[test]
    fn clock_advances_past_last_sync_and_store() {
        let mut service = SyncService::in_memory().unwrap();
        let first = service.sync(request(&[card("a", "d", 1.0)], 0)).unwrap();
        let local = decoded(&first.local);
        assert_eq!(local[0].remote_date(), 1);
        assert!(first.remote.is_empty());

        let second = service.sync(request(&[card("b", "d", 2.0)], 7)).unwrap();
        assert_eq!(decoded(&second.local)[0].remote_date(), 8);
    }

    #[test]
    fn remote_contains_only_newer_operations() {
        let mut service = SyncService::in_memory().unwrap();
        service.sync(request(&[card("a", "d", 1.0)], 0)).unwrap();
        service.sync(request(&[card("b", "d", 2.0)], 1)).unwrap();

        let response = service.sync(request(&[], 1)).unwrap();
        let remote = decoded(&response.remote);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].remote_date(), 2);
    }

    #[test]
    fn deletions_are_kept_and_rows_removed() {
        let mut service = SyncService::in_memory().unwrap();
        service.sync(request(&[card("a", "d", 1.0)], 0)).unwrap();
        let delete = Operation::Delete(Deletion::new(RowKey::new(Table::Cards, "a"), 2.0));
        service.sync(request(&[delete], 1)).unwrap();

        assert!(service.store().get_card(&CardId::from("a")).unwrap().is_none());
        let replay = decoded(&service.sync(request(&[], 0)).unwrap().remote);
        assert_eq!(replay.len(), 1);
        assert!(matches!(replay[0], Operation::Delete(_)));
    }

    #[test]
    fn upsert_of_deleted_row_is_refused_with_a_fresh_deletion() {
        let mut service = SyncService::in_memory().unwrap();
        let range = RangeDeletion::exact(Table::Cards, RangeField::DeckId, "d", 1.0);
        service
            .sync(request(&[Operation::RangeDelete(range)], 0))
            .unwrap();

        let review = Operation::Upsert(Row::Review(Review {
            review_id: recall_core::ReviewId::from("r"),
            card_id: CardId::from("a"),
            deck_id: DeckId::from("d"),
            response: ReviewResponse::Perfect,
            date_created: 2.0,
            remote_date: UNSYNCED,
        }));
        let response = service.sync(request(&[card("a", "d", 2.0), review], 1)).unwrap();

        assert!(service.store().cards_in_deck(&DeckId::from("d")).unwrap().is_empty());
        let remote = decoded(&response.remote);
        let refused: Vec<_> = remote
            .iter()
            .filter_map(|op| match op {
                Operation::Delete(d) => Some(d.target()),
                _ => None,
            })
            .collect();
        assert_eq!(refused.len(), 2);
        assert!(refused.contains(&RowKey::new(Table::Cards, "a")));
        assert!(remote.iter().all(|op| op.remote_date() == 2));
    }

    #[test]
    fn delete_in_same_batch_wins_over_upsert() {
        let mut service = SyncService::in_memory().unwrap();
        let delete = Operation::Delete(Deletion::new(RowKey::new(Table::Cards, "a"), 1.0));
        service
            .sync(request(&[delete, card("a", "d", 2.0)], 0))
            .unwrap();
        assert!(service.store().get_card(&CardId::from("a")).unwrap().is_none());
    }

    #[test]
    fn reset_seeds_sample_decks() {
        let mut service = SyncService::in_memory().unwrap();
        service.sync(request(&[card("a", "x", 1.0)], 0)).unwrap();
        let summary = service.reset().unwrap();
        assert_eq!((summary.decks, summary.cards), (2, 13));

        let decks = service.store().decks().unwrap();
        let names: Vec<_> = decks.iter().map(|d| d.deck_name.as_str()).collect();
        assert!(names.contains(&"Deck 0") && names.contains(&"Deck 1"));
        assert!(service.store().get_card(&CardId::from("a")).unwrap().is_none());
        assert_eq!(service.store().largest_remote_date().unwrap(), 1);
    }
}
