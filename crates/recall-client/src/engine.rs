//! The device side of a sync round.
//!
//! [`SyncEngine::sync`] pushes the outgoing queue, then commits the
//! authority's answer together with the rebuilt learn state of every card
//! the round touched in one local transaction, and republishes the changes
//! on the [`EventBus`].
//! Callers normally go through [`FlashcardDb::sync`](crate::FlashcardDb::sync),
//! which adds single-flight coalescing on top.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use recall_core::wire::{decode_all, encode_all};
use recall_core::{Card, CardId, RemoteDate, Review, ReviewId, Row, SchedulerConfig, SyncRequest, Table};
use recall_flow::{Context, Flow, StateFlow};
use recall_storage::{StorageError, SyncStore, Write, WriteBatch};

use crate::error::SyncError;
use crate::events::{ChangeEvent, ChangeKind, EventBus};
use crate::merge::{plan_merge, MergePlan};
use crate::transport::Transport;

/// Local store shared between the engine, the database facade and live
/// queries. Borrows never span an await point.
pub type SharedStore = Rc<RefCell<dyn SyncStore>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    MergeApplied,
    Failed,
}

/// Summary of a merged round.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Operations sent.
    pub pushed: usize,
    /// Operations received from other devices.
    pub pulled: usize,
    pub high_water_mark: RemoteDate,
    /// Rows added, modified or removed locally.
    pub changed_rows: usize,
    /// Learn states recomputed or dropped.
    pub recomputed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Merged(SyncReport),
    /// The authority was unreachable; nothing changed locally.
    Offline,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: SharedStore,
    transport: Rc<dyn Transport>,
    ctx: Context,
    bus: EventBus,
    config: SchedulerConfig,
    state: StateFlow<SyncState>,
    is_offline: StateFlow<bool>,
    num_changes: StateFlow<usize>,
}

impl SyncEngine {
    pub fn new(
        store: SharedStore,
        transport: Rc<dyn Transport>,
        ctx: Context,
        bus: EventBus,
        config: SchedulerConfig,
    ) -> Self {
        let pending = match store.borrow().count_unsynced() {
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "could not count pending changes");
                0
            }
        };
        SyncEngine {
            state: ctx.create_state_flow(SyncState::Idle),
            is_offline: ctx.create_state_flow(false),
            num_changes: ctx.create_state_flow(pending),
            store,
            transport,
            ctx,
            bus,
            config,
        }
    }

    pub fn state(&self) -> Flow<SyncState> {
        self.state.flow()
    }

    pub fn is_offline(&self) -> Flow<bool> {
        self.is_offline.flow()
    }

    pub fn num_changes(&self) -> Flow<usize> {
        self.num_changes.flow()
    }

    /// Re-reads the size of the outgoing queue. Takes effect at the next flush.
    pub fn refresh_pending_count(&self) -> Result<usize, StorageError> {
        let pending = self.store.borrow().count_unsynced()?;
        self.num_changes.set(pending);
        Ok(pending)
    }

    /// Runs one round. Unreachable authorities end in [`SyncOutcome::Offline`];
    /// every other failure is returned after the local store has been left
    /// untouched by the round.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        self.enter(SyncState::Syncing);
        let result = self.round().await;
        match &result {
            Ok(SyncOutcome::Merged(report)) => {
                tracing::info!(
                    pushed = report.pushed,
                    pulled = report.pulled,
                    high_water_mark = report.high_water_mark,
                    changed = report.changed_rows,
                    "sync round merged"
                );
                self.enter(SyncState::MergeApplied);
            }
            Ok(SyncOutcome::Offline) => self.enter(SyncState::Failed),
            Err(err) => {
                tracing::error!(error = %err, "sync round failed");
                self.enter(SyncState::Failed);
            }
        }
        self.enter(SyncState::Idle);
        result
    }

    fn enter(&self, state: SyncState) {
        self.state.set(state);
        self.ctx.flush();
    }

    async fn round(&self) -> Result<SyncOutcome, SyncError> {
        let (outgoing, last_sync) = {
            let store = self.store.borrow();
            (store.unsynced_operations()?, store.high_water_mark()?)
        };
        let request = SyncRequest {
            operations: encode_all(&outgoing)?,
            last_sync,
        };

        let response = match self.transport.sync(&request).await {
            Ok(response) => response,
            Err(err) if err.is_unreachable() => {
                tracing::info!(error = %err, "authority unreachable, working offline");
                self.is_offline.set(true);
                self.ctx.flush();
                return Ok(SyncOutcome::Offline);
            }
            Err(err) => return Err(err.into()),
        };
        self.is_offline.set(false);

        let remote = decode_all(&response.remote)?;
        let local = decode_all(&response.local)?;
        let pulled = remote.len();

        let plan = {
            let store = self.store.borrow();
            plan_merge(&*store, remote, local, last_sync)?
        };
        let MergePlan {
            mut batch,
            events,
            implicated_cards,
            high_water_mark,
            ..
        } = plan;
        let learn_events = {
            let store = self.store.borrow();
            let (learn_batch, learn_events) =
                self.plan_learn_states(&*store, &batch, &implicated_cards)?;
            batch.extend(learn_batch);
            learn_events
        };
        self.store.borrow_mut().commit(batch)?;

        self.bus.publish_all(&events);
        self.bus.publish_all(&learn_events);
        self.refresh_pending_count()?;
        self.ctx.flush();

        Ok(SyncOutcome::Merged(SyncReport {
            pushed: outgoing.len(),
            pulled,
            high_water_mark,
            changed_rows: events.iter().map(ChangeEvent::len).sum(),
            recomputed: learn_events.iter().map(ChangeEvent::len).sum(),
        }))
    }

    /// Rebuilds the learn state of each card from its full review history as
    /// it will stand once `merge` is committed. Cards that no longer exist
    /// lose their learn state. The writes go into the same commit as the
    /// merge.
    fn plan_learn_states(
        &self,
        store: &dyn SyncStore,
        merge: &WriteBatch,
        cards: &IndexSet<CardId>,
    ) -> Result<(WriteBatch, Vec<ChangeEvent>), SyncError> {
        let mut batch = WriteBatch::new();
        if cards.is_empty() {
            return Ok((batch, Vec::new()));
        }
        let now = recall_core::now();
        let (mut added, mut modified, mut removed) = (Vec::new(), Vec::new(), Vec::new());
        for card_id in cards {
            let previous = store.learn_state(card_id)?;
            let (card, reviews) = merged_history(store, merge, card_id)?;
            let Some(card) = card else {
                if let Some(previous) = previous {
                    batch.push(Write::RemoveLearnState(card_id.clone()));
                    removed.push(previous);
                }
                continue;
            };
            let state = self
                .config
                .from_history(card_id, &card.deck_id, &reviews, now);
            batch.put_learn_state(state.clone());
            match previous {
                None => added.push(state),
                Some(previous) if previous != state => modified.push(state),
                Some(_) => {}
            }
        }
        tracing::debug!(
            cards = cards.len(),
            added = added.len(),
            modified = modified.len(),
            removed = removed.len(),
            "recomputed learn states"
        );

        let events = [
            (ChangeKind::Add, added),
            (ChangeKind::Modify, modified),
            (ChangeKind::Delete, removed),
        ]
        .into_iter()
        .filter(|(_, states)| !states.is_empty())
        .map(|(kind, states)| ChangeEvent::learn_states(kind, states))
        .collect();
        Ok((batch, events))
    }
}

/// A card and its reviews as they will be after `batch` is committed.
fn merged_history(
    store: &dyn SyncStore,
    batch: &WriteBatch,
    card_id: &CardId,
) -> Result<(Option<Card>, Vec<Review>), StorageError> {
    let mut card = store.get_card(card_id)?;
    let mut reviews: IndexMap<ReviewId, Review> = store
        .reviews_for_card(card_id)?
        .into_iter()
        .map(|review| (review.review_id.clone(), review))
        .collect();

    for write in batch.writes() {
        match write {
            Write::PutRow(Row::Card(c)) if &c.card_id == card_id => card = Some(c.clone()),
            Write::PutRow(Row::Review(r)) if &r.card_id == card_id => {
                reviews.insert(r.review_id.clone(), r.clone());
            }
            Write::RemoveRow(key) => match key.table {
                Table::Cards if key.key == card_id.as_str() => card = None,
                Table::Reviews => {
                    reviews.shift_remove(&ReviewId::from(key.key.as_str()));
                }
                _ => {}
            },
            Write::RemoveMatching(range) => {
                if card
                    .as_ref()
                    .is_some_and(|c| range.matches(&Row::Card(c.clone())))
                {
                    card = None;
                }
                reviews.retain(|_, r| !range.matches(&Row::Review(r.clone())));
            }
            _ => {}
        }
    }
    Ok((card, reviews.into_values().collect()))
}
