//! The flashcard database facade.
//!
//! [`FlashcardDb`] owns the local store, the event bus and the sync engine.
//! Actions commit one [`WriteBatch`], announce what changed on the bus and
//! flush the flow graph. Live views are monitors over store queries: a
//! monitor subscribes to the tables it reads while it is hot and refreshes
//! itself from their change events. Per-deck and per-card monitors are
//! shared through [`FlowCache`]s.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use futures::future::FutureExt;
use recall_core::{
    Card, CardId, Deck, DeckId, Deletion, LearnState, RangeDeletion, RangeField, RemoteDate,
    Review, ReviewId, ReviewResponse, Row, RowKey, SchedulerConfig, Table, Timestamp, UNSYNCED,
};
use recall_flow::{CacheLease, Context, Flow, FlowCache, MonitorHandle, StateFlow};
use recall_storage::{StorageError, SyncStore, Write, WriteBatch};

use crate::engine::{SharedStore, SyncEngine, SyncOutcome, SyncState};
use crate::error::{ClientError, SyncError};
use crate::events::{ChangeEvent, ChangeKind, Changed, EventBus, Subscription};
use crate::locker::Locker;
use crate::transport::Transport;

/// Result shared by every caller coalesced onto one sync round.
pub type SyncResult = Result<SyncOutcome, Rc<SyncError>>;

/// How a live query reacts to a change event.
enum Reaction<T> {
    Ignore,
    Requery,
    Replace(T),
}

fn requery_if<T>(relevant: bool) -> Reaction<T> {
    if relevant {
        Reaction::Requery
    } else {
        Reaction::Ignore
    }
}

pub struct FlashcardDb {
    ctx: Context,
    store: SharedStore,
    bus: EventBus,
    config: SchedulerConfig,
    engine: SyncEngine,
    locker: Locker<SyncResult>,
    clock: StateFlow<Timestamp>,
    decks: Flow<Vec<Deck>>,
    deck_cards: FlowCache<DeckId, Vec<Card>>,
    deck_learn_states: FlowCache<DeckId, Vec<LearnState>>,
    cards: FlowCache<CardId, Option<Card>>,
    card_reviews: FlowCache<CardId, Vec<Review>>,
    card_learn_states: FlowCache<CardId, Option<LearnState>>,
}

impl FlashcardDb {
    pub fn new(
        ctx: Context,
        store: impl SyncStore + 'static,
        transport: impl Transport + 'static,
        config: SchedulerConfig,
    ) -> Self {
        let store: SharedStore = Rc::new(RefCell::new(store));
        let bus = EventBus::new();
        let engine = SyncEngine::new(
            store.clone(),
            Rc::new(transport),
            ctx.clone(),
            bus.clone(),
            config,
        );
        let runner = engine.clone();
        let locker = Locker::new(move || {
            let engine = runner.clone();
            async move { engine.sync().await.map_err(Rc::new) }.boxed_local()
        });

        let decks = live_query(
            &ctx,
            &store,
            &bus,
            &[Table::Decks],
            |store| store.decks(),
            |_, _| Reaction::Requery,
        );

        FlashcardDb {
            clock: ctx.create_state_flow(recall_core::now()),
            decks,
            ctx,
            store,
            bus,
            config,
            engine,
            locker,
            deck_cards: FlowCache::new(),
            deck_learn_states: FlowCache::new(),
            cards: FlowCache::new(),
            card_reviews: FlowCache::new(),
            card_learn_states: FlowCache::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Moves the clock that overdue counts are computed against to the
    /// current time.
    pub fn tick(&self) {
        self.set_clock(recall_core::now());
    }

    pub fn set_clock(&self, now: Timestamp) {
        self.clock.set(now);
        self.ctx.flush();
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    pub fn add_deck(&self, name: &str) -> Result<Deck, ClientError> {
        let deck = Deck {
            deck_id: DeckId::new_random(),
            deck_name: name.to_string(),
            date_created: recall_core::now(),
            remote_date: UNSYNCED,
        };
        let mut batch = WriteBatch::new();
        batch.put_row(deck.clone());
        self.apply(
            batch,
            vec![ChangeEvent::rows(ChangeKind::Add, Table::Decks, vec![deck.clone().into()])],
        )?;
        tracing::debug!(deck = %deck.deck_id, "added deck");
        Ok(deck)
    }

    pub fn rename_deck(&self, deck_id: &DeckId, name: &str) -> Result<Deck, ClientError> {
        let mut deck = self.require_deck(deck_id)?;
        deck.deck_name = name.to_string();
        deck.remote_date = UNSYNCED;
        let mut batch = WriteBatch::new();
        batch.put_row(deck.clone());
        self.apply(
            batch,
            vec![ChangeEvent::rows(ChangeKind::Modify, Table::Decks, vec![deck.clone().into()])],
        )?;
        Ok(deck)
    }

    /// Deletes a deck with its cards, reviews and learn states.
    pub fn delete_deck(&self, deck_id: &DeckId) -> Result<(), ClientError> {
        let deck = self.require_deck(deck_id)?;
        let now = recall_core::now();
        let card_range = RangeDeletion::exact(Table::Cards, RangeField::DeckId, deck_id.as_str(), now);
        let review_range =
            RangeDeletion::exact(Table::Reviews, RangeField::DeckId, deck_id.as_str(), now);

        let (cards, reviews, states) = {
            let store = self.store.borrow();
            (
                store.rows_in_range(&card_range)?,
                store.rows_in_range(&review_range)?,
                store.learn_states_for_deck(deck_id)?,
            )
        };

        let mut batch = WriteBatch::new();
        batch
            .remove_row(RowKey::deck(deck_id))
            .push(Write::PutDeletion(Deletion::new(RowKey::deck(deck_id), now)))
            .push(Write::RemoveMatching(card_range.clone()))
            .push(Write::PutRangeDeletion(card_range))
            .push(Write::RemoveMatching(review_range.clone()))
            .push(Write::PutRangeDeletion(review_range));
        for state in &states {
            batch.push(Write::RemoveLearnState(state.card_id.clone()));
        }

        let mut events = vec![ChangeEvent::rows(ChangeKind::Delete, Table::Decks, vec![deck.into()])];
        if !cards.is_empty() {
            events.push(ChangeEvent::rows(ChangeKind::RangeDelete, Table::Cards, cards));
        }
        if !reviews.is_empty() {
            events.push(ChangeEvent::rows(ChangeKind::RangeDelete, Table::Reviews, reviews));
        }
        if !states.is_empty() {
            events.push(ChangeEvent::learn_states(ChangeKind::Delete, states));
        }
        self.apply(batch, events)?;
        tracing::debug!(deck = %deck_id, "deleted deck");
        Ok(())
    }

    /// Adds a card to an existing deck. The card starts due at its creation
    /// time.
    pub fn add_card(&self, deck_id: &DeckId, front: &str, back: &str) -> Result<Card, ClientError> {
        self.require_deck(deck_id)?;
        let card = Card {
            card_id: CardId::new_random(),
            deck_id: deck_id.clone(),
            front: front.to_string(),
            back: back.to_string(),
            date_created: recall_core::now(),
            remote_date: UNSYNCED,
        };
        let state = self.config.initial_state(&card);

        let mut batch = WriteBatch::new();
        batch.put_row(card.clone()).put_learn_state(state.clone());
        self.apply(
            batch,
            vec![
                ChangeEvent::rows(ChangeKind::Add, Table::Cards, vec![card.clone().into()]),
                ChangeEvent::learn_states(ChangeKind::Add, vec![state]),
            ],
        )?;
        tracing::debug!(card = %card.card_id, deck = %deck_id, "added card");
        Ok(card)
    }

    pub fn update_card(&self, card_id: &CardId, front: &str, back: &str) -> Result<Card, ClientError> {
        let mut card = self.require_card(card_id)?;
        card.front = front.to_string();
        card.back = back.to_string();
        card.remote_date = UNSYNCED;
        let mut batch = WriteBatch::new();
        batch.put_row(card.clone());
        self.apply(
            batch,
            vec![ChangeEvent::rows(ChangeKind::Modify, Table::Cards, vec![card.clone().into()])],
        )?;
        Ok(card)
    }

    /// Deletes a card with its reviews and learn state.
    pub fn delete_card(&self, card_id: &CardId) -> Result<(), ClientError> {
        let card = self.require_card(card_id)?;
        let now = recall_core::now();
        let review_range =
            RangeDeletion::exact(Table::Reviews, RangeField::CardId, card_id.as_str(), now);
        let (reviews, state) = {
            let store = self.store.borrow();
            (store.rows_in_range(&review_range)?, store.learn_state(card_id)?)
        };

        let mut batch = WriteBatch::new();
        batch
            .remove_row(RowKey::card(card_id))
            .push(Write::PutDeletion(Deletion::new(RowKey::card(card_id), now)))
            .push(Write::RemoveMatching(review_range.clone()))
            .push(Write::PutRangeDeletion(review_range))
            .push(Write::RemoveLearnState(card_id.clone()));

        let mut events = vec![ChangeEvent::rows(ChangeKind::Delete, Table::Cards, vec![card.into()])];
        if !reviews.is_empty() {
            events.push(ChangeEvent::rows(ChangeKind::RangeDelete, Table::Reviews, reviews));
        }
        if let Some(state) = state {
            events.push(ChangeEvent::learn_states(ChangeKind::Delete, vec![state]));
        }
        self.apply(batch, events)?;
        tracing::debug!(card = %card_id, "deleted card");
        Ok(())
    }

    /// Records a review and advances the card's learn state by one step.
    pub fn add_review_and_update_learn_state(
        &self,
        card_id: &CardId,
        response: ReviewResponse,
    ) -> Result<LearnState, ClientError> {
        let card = self.require_card(card_id)?;
        let now = recall_core::now();
        let current = self.store.borrow().learn_state(card_id)?;
        let current = current.unwrap_or_else(|| self.config.initial_state(&card));
        let next = self.config.after_review(&current, response, now);
        let review = Review {
            review_id: ReviewId::new_random(),
            card_id: card_id.clone(),
            deck_id: card.deck_id.clone(),
            response,
            date_created: now,
            remote_date: UNSYNCED,
        };

        let mut batch = WriteBatch::new();
        batch.put_row(review.clone()).put_learn_state(next.clone());
        self.apply(
            batch,
            vec![
                ChangeEvent::rows(ChangeKind::Add, Table::Reviews, vec![review.into()]),
                ChangeEvent::learn_states(ChangeKind::Modify, vec![next.clone()]),
            ],
        )?;
        tracing::debug!(
            card = %card_id,
            response = u8::from(response),
            interval = next.review_interval,
            "recorded review"
        );
        Ok(next)
    }

    /// Requests a sync round. Requests made while one is in flight share a
    /// single follow-up round.
    pub async fn sync(&self) -> Result<SyncOutcome, ClientError> {
        Ok(self.locker.run().await?)
    }

    /// Drops every local row and pulls the account again from scratch.
    /// Views see only the final state.
    pub async fn reset(&self) -> Result<SyncOutcome, ClientError> {
        let _frozen = Frozen::new(&self.ctx);
        self.store.borrow_mut().clear()?;
        for table in [
            Table::Decks,
            Table::Cards,
            Table::Reviews,
            Table::Deletions,
            Table::RangeDeletions,
            Table::LearnState,
        ] {
            self.bus.publish(&ChangeEvent::dropped(table));
        }
        self.engine.refresh_pending_count()?;
        tracing::info!("local store cleared, resyncing");
        self.sync().await
    }

    fn apply(&self, batch: WriteBatch, events: Vec<ChangeEvent>) -> Result<(), ClientError> {
        self.store.borrow_mut().commit(batch)?;
        self.bus.publish_all(&events);
        self.engine.refresh_pending_count()?;
        self.ctx.flush();
        Ok(())
    }

    fn require_deck(&self, deck_id: &DeckId) -> Result<Deck, ClientError> {
        self.store
            .borrow()
            .get_deck(deck_id)?
            .ok_or_else(|| ClientError::NotFound {
                table: Table::Decks,
                key: deck_id.to_string(),
            })
    }

    fn require_card(&self, card_id: &CardId) -> Result<Card, ClientError> {
        self.store
            .borrow()
            .get_card(card_id)?
            .ok_or_else(|| ClientError::NotFound {
                table: Table::Cards,
                key: card_id.to_string(),
            })
    }

    // -----------------------------------------------------------------------
    // Point-in-time queries
    // -----------------------------------------------------------------------

    pub fn get_deck(&self, deck_id: &DeckId) -> Result<Option<Deck>, ClientError> {
        Ok(self.store.borrow().get_deck(deck_id)?)
    }

    pub fn get_decks(&self) -> Result<Vec<Deck>, ClientError> {
        Ok(self.store.borrow().decks()?)
    }

    pub fn get_card(&self, card_id: &CardId) -> Result<Option<Card>, ClientError> {
        Ok(self.store.borrow().get_card(card_id)?)
    }

    pub fn cards_in_deck_now(&self, deck_id: &DeckId) -> Result<Vec<Card>, ClientError> {
        let mut cards = self.store.borrow().cards_in_deck(deck_id)?;
        sort_cards(&mut cards);
        Ok(cards)
    }

    pub fn reviews_for_card_now(&self, card_id: &CardId) -> Result<Vec<Review>, ClientError> {
        Ok(self.store.borrow().reviews_for_card(card_id)?)
    }

    pub fn learn_state(&self, card_id: &CardId) -> Result<Option<LearnState>, ClientError> {
        Ok(self.store.borrow().learn_state(card_id)?)
    }

    /// Learn states of a deck, soonest due first.
    pub fn learn_states_for_deck(&self, deck_id: &DeckId) -> Result<Vec<LearnState>, ClientError> {
        let mut states = self.store.borrow().learn_states_for_deck(deck_id)?;
        states.sort_by(|a, b| a.scheduled_time.total_cmp(&b.scheduled_time));
        Ok(states)
    }

    /// Learn states of the deck's overdue cards at `now`, most overdue first.
    pub fn overdue_cards(&self, deck_id: &DeckId, now: Timestamp) -> Result<Vec<LearnState>, ClientError> {
        let mut states = self.learn_states_for_deck(deck_id)?;
        states.retain(|state| state.is_overdue(now));
        Ok(states)
    }

    pub fn count_unsynced(&self) -> Result<usize, ClientError> {
        Ok(self.store.borrow().count_unsynced()?)
    }

    pub fn high_water_mark(&self) -> Result<RemoteDate, ClientError> {
        Ok(self.store.borrow().high_water_mark()?)
    }

    // -----------------------------------------------------------------------
    // Live flows
    // -----------------------------------------------------------------------

    pub fn decks(&self) -> Flow<Vec<Deck>> {
        self.decks.clone()
    }

    /// Cards of a deck in creation order. Card add and delete events are
    /// applied to the cached list without requerying.
    pub fn cards_in_deck(&self, deck_id: &DeckId) -> Flow<Vec<Card>> {
        let lease = self.deck_cards.retain_or_insert_with(deck_id, || {
            let deck_id = deck_id.clone();
            let query_id = deck_id.clone();
            self.live_query(
                &[Table::Cards],
                move |store| {
                    let mut cards = store.cards_in_deck(&query_id)?;
                    sort_cards(&mut cards);
                    Ok(cards)
                },
                move |event, current| match (&event.changed, current) {
                    _ if !event.touches_deck(&deck_id) => Reaction::Ignore,
                    (Changed::Rows(rows), Some(mut cards)) if event.kind != ChangeKind::Drop => {
                        apply_card_event(&deck_id, &mut cards, event.kind, rows);
                        Reaction::Replace(cards)
                    }
                    _ => Reaction::Requery,
                },
            )
        });
        leased(lease)
    }

    pub fn num_cards_in_deck(&self, deck_id: &DeckId) -> Flow<usize> {
        self.cards_in_deck(deck_id).map(|cards: &Vec<Card>| cards.len())
    }

    /// Number of the deck's cards that are overdue at the database clock.
    pub fn num_cards_overdue_in_deck(&self, deck_id: &DeckId) -> Flow<usize> {
        let lease = self.deck_learn_states.retain_or_insert_with(deck_id, || {
            let deck_id = deck_id.clone();
            let query_id = deck_id.clone();
            self.live_query(
                &[Table::LearnState],
                move |store| store.learn_states_for_deck(&query_id),
                move |event, _| requery_if(event.touches_deck(&deck_id)),
            )
        });
        leased(lease)
            .concat(&self.clock.flow())
            .map(|(states, now): &(Vec<LearnState>, Timestamp)| {
                states.iter().filter(|state| state.is_overdue(*now)).count()
            })
    }

    pub fn reviews_for_card(&self, card_id: &CardId) -> Flow<Vec<Review>> {
        let lease = self.card_reviews.retain_or_insert_with(card_id, || {
            let card_id = card_id.clone();
            let query_id = card_id.clone();
            self.live_query(
                &[Table::Reviews],
                move |store| store.reviews_for_card(&query_id),
                move |event, _| requery_if(event.touches_card(&card_id)),
            )
        });
        leased(lease)
    }

    pub fn card(&self, card_id: &CardId) -> Flow<Option<Card>> {
        let lease = self.cards.retain_or_insert_with(card_id, || {
            let card_id = card_id.clone();
            let query_id = card_id.clone();
            self.live_query(
                &[Table::Cards],
                move |store| store.get_card(&query_id),
                move |event, _| requery_if(event.touches_card(&card_id)),
            )
        });
        leased(lease)
    }

    pub fn learn_state_for_card(&self, card_id: &CardId) -> Flow<Option<LearnState>> {
        let lease = self.card_learn_states.retain_or_insert_with(card_id, || {
            let card_id = card_id.clone();
            let query_id = card_id.clone();
            self.live_query(
                &[Table::LearnState],
                move |store| store.learn_state(&query_id),
                move |event, _| requery_if(event.touches_card(&card_id)),
            )
        });
        leased(lease)
    }

    pub fn num_changes_since_last_sync(&self) -> Flow<usize> {
        self.engine.num_changes()
    }

    pub fn is_offline(&self) -> Flow<bool> {
        self.engine.is_offline()
    }

    pub fn sync_state(&self) -> Flow<SyncState> {
        self.engine.state()
    }

    fn live_query<T, Q, R>(&self, tables: &[Table], query: Q, react: R) -> Flow<T>
    where
        T: Clone + Default + 'static,
        Q: Fn(&dyn SyncStore) -> Result<T, StorageError> + 'static,
        R: Fn(&ChangeEvent, Option<T>) -> Reaction<T> + 'static,
    {
        live_query(&self.ctx, &self.store, &self.bus, tables, query, react)
    }
}

/// Builds a monitor holding the result of `query`. While hot it listens to
/// `tables` and lets `react` decide what each event does to the value. A
/// failing query logs and yields the default value.
fn live_query<T, Q, R>(
    ctx: &Context,
    store: &SharedStore,
    bus: &EventBus,
    tables: &[Table],
    query: Q,
    react: R,
) -> Flow<T>
where
    T: Clone + Default + 'static,
    Q: Fn(&dyn SyncStore) -> Result<T, StorageError> + 'static,
    R: Fn(&ChangeEvent, Option<T>) -> Reaction<T> + 'static,
{
    let store = store.clone();
    let run: Rc<dyn Fn() -> T> = Rc::new(move || match query(&*store.borrow()) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "live query failed");
            T::default()
        }
    });
    let react = Rc::new(react);
    let bus = bus.clone();
    let tables = tables.to_vec();
    let subscriptions: Rc<RefCell<Vec<Subscription>>> = Rc::default();
    let active = subscriptions.clone();

    ctx.monitor(
        move |handle: MonitorHandle<T>| {
            let mut active = active.borrow_mut();
            active.clear();
            for &table in &tables {
                let (run, react, handle) = (run.clone(), react.clone(), handle.clone());
                active.push(bus.subscribe(table, move |event| {
                    match react(event, handle.latest()) {
                        Reaction::Ignore => {}
                        Reaction::Requery => handle.set(run()),
                        Reaction::Replace(value) => handle.set(value),
                    }
                }));
            }
            run()
        },
        move || subscriptions.borrow_mut().clear(),
    )
}

/// Keeps a cache entry alive for as long as the returned flow is.
fn leased<K, T>(lease: CacheLease<K, T>) -> Flow<T>
where
    K: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    let flow = Flow::clone(&lease);
    flow.map(move |value: &T| {
        let _lease = &lease;
        value.clone()
    })
}

fn sort_cards(cards: &mut [Card]) {
    cards.sort_by(|a, b| {
        a.date_created
            .total_cmp(&b.date_created)
            .then_with(|| a.card_id.cmp(&b.card_id))
    });
}

/// Applies a card event to a deck's card list. Every added or deleted card
/// must move the count by exactly one; returns false and warns otherwise.
fn apply_card_event(deck_id: &DeckId, cards: &mut Vec<Card>, kind: ChangeKind, rows: &[Row]) -> bool {
    let touched: Vec<&Card> = rows
        .iter()
        .filter_map(|row| match row {
            Row::Card(card) if &card.deck_id == deck_id => Some(card),
            _ => None,
        })
        .collect();
    let before = cards.len() as i64;
    let expected = match kind {
        ChangeKind::Add => touched.len() as i64,
        ChangeKind::Delete | ChangeKind::RangeDelete => -(touched.len() as i64),
        ChangeKind::Modify | ChangeKind::Drop => 0,
    };

    for card in touched {
        let position = cards.iter().position(|c| c.card_id == card.card_id);
        match (kind, position) {
            (ChangeKind::Delete | ChangeKind::RangeDelete, Some(i)) => {
                cards.remove(i);
            }
            (ChangeKind::Delete | ChangeKind::RangeDelete, None) => {}
            (_, Some(i)) => cards[i] = card.clone(),
            (_, None) => cards.push(card.clone()),
        }
    }
    sort_cards(cards);

    let actual = cards.len() as i64 - before;
    if actual != expected {
        tracing::warn!(
            deck = %deck_id,
            kind = ?kind,
            expected,
            actual,
            "card count changed by an unexpected amount"
        );
        return false;
    }
    true
}

/// Freezes the flow graph until dropped.
struct Frozen<'a>(&'a Context);

impl<'a> Frozen<'a> {
    fn new(ctx: &'a Context) -> Self {
        ctx.freeze();
        Frozen(ctx)
    }
}

impl Drop for Frozen<'_> {
    fn drop(&mut self) {
        self.0.thaw();
    }
}
