//! Shared fixtures: devices connected to an in-process authority.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use recall_client::{FlashcardDb, Transport, TransportError};
use recall_core::{
    Card, CardId, Deck, DeckId, Deletion, LearnState, RangeDeletion, RemoteDate, Review, Row,
    RowKey, SchedulerConfig, SyncRequest, SyncResponse, Table,
};
use recall_flow::Context;
use recall_server::service::SyncService;
use recall_storage::{
    InMemoryStore, RemoteDateFilter, StorageError, SyncStore, Write, WriteBatch,
};

/// One account on an in-process authority.
#[derive(Clone)]
pub struct Authority {
    service: Rc<RefCell<SyncService>>,
}

impl Authority {
    pub fn new() -> Self {
        Authority {
            service: Rc::new(RefCell::new(SyncService::in_memory().unwrap())),
        }
    }

    pub fn reset(&self) {
        self.service.borrow_mut().reset().unwrap();
    }

    /// A fresh device with its own store and network switch.
    pub fn device(&self) -> Device {
        self.device_on(InMemoryStore::new())
    }

    pub fn device_on(&self, store: impl SyncStore + 'static) -> Device {
        let online = Rc::new(Cell::new(true));
        let transport = Loopback {
            service: self.service.clone(),
            online: online.clone(),
        };
        let db = FlashcardDb::new(
            Context::new(),
            store,
            transport,
            SchedulerConfig::default(),
        );
        Device { db, online }
    }
}

pub struct Device {
    pub db: FlashcardDb,
    online: Rc<Cell<bool>>,
}

impl Device {
    pub fn go_offline(&self) {
        self.online.set(false);
    }

    pub fn go_online(&self) {
        self.online.set(true);
    }
}

/// Calls the authority directly, or fails as unreachable while offline.
struct Loopback {
    service: Rc<RefCell<SyncService>>,
    online: Rc<Cell<bool>>,
}

#[async_trait(?Send)]
impl Transport for Loopback {
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        if !self.online.get() {
            return Err(TransportError::Unreachable("device is offline".into()));
        }
        self.service
            .borrow_mut()
            .sync(request.clone())
            .map_err(|err| TransportError::Status {
                status: 500,
                body: err.to_string(),
            })
    }
}

/// Answers every request with the same response.
pub struct Canned(pub SyncResponse);

#[async_trait(?Send)]
impl Transport for Canned {
    async fn sync(&self, _request: &SyncRequest) -> Result<SyncResponse, TransportError> {
        Ok(self.0.clone())
    }
}

/// In-memory store that can be told to reject the next commit that writes
/// learn state.
pub struct FailingStore {
    inner: InMemoryStore,
    fail_learn_state_commit: Rc<Cell<bool>>,
}

impl FailingStore {
    pub fn new() -> (Self, Rc<Cell<bool>>) {
        let switch = Rc::new(Cell::new(false));
        let store = FailingStore {
            inner: InMemoryStore::new(),
            fail_learn_state_commit: switch.clone(),
        };
        (store, switch)
    }
}

impl SyncStore for FailingStore {
    fn get_row(&self, key: &RowKey) -> Result<Option<Row>, StorageError> {
        self.inner.get_row(key)
    }

    fn rows(&self, table: Table, filter: RemoteDateFilter) -> Result<Vec<Row>, StorageError> {
        self.inner.rows(table, filter)
    }

    fn rows_in_range(&self, range: &RangeDeletion) -> Result<Vec<Row>, StorageError> {
        self.inner.rows_in_range(range)
    }

    fn decks(&self) -> Result<Vec<Deck>, StorageError> {
        self.inner.decks()
    }

    fn cards_in_deck(&self, deck_id: &DeckId) -> Result<Vec<Card>, StorageError> {
        self.inner.cards_in_deck(deck_id)
    }

    fn reviews_for_card(&self, card_id: &CardId) -> Result<Vec<Review>, StorageError> {
        self.inner.reviews_for_card(card_id)
    }

    fn largest_remote_date(&self) -> Result<RemoteDate, StorageError> {
        self.inner.largest_remote_date()
    }

    fn deletions(&self, filter: RemoteDateFilter) -> Result<Vec<Deletion>, StorageError> {
        self.inner.deletions(filter)
    }

    fn range_deletions(&self, filter: RemoteDateFilter) -> Result<Vec<RangeDeletion>, StorageError> {
        self.inner.range_deletions(filter)
    }

    fn learn_state(&self, card_id: &CardId) -> Result<Option<LearnState>, StorageError> {
        self.inner.learn_state(card_id)
    }

    fn learn_states_for_deck(&self, deck_id: &DeckId) -> Result<Vec<LearnState>, StorageError> {
        self.inner.learn_states_for_deck(deck_id)
    }

    fn high_water_mark(&self) -> Result<RemoteDate, StorageError> {
        self.inner.high_water_mark()
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
        let writes_learn_state = batch
            .writes()
            .iter()
            .any(|w| matches!(w, Write::PutLearnState(_)));
        if writes_learn_state && self.fail_learn_state_commit.replace(false) {
            return Err(StorageError::IntegrityError {
                reason: "disk full".into(),
            });
        }
        self.inner.commit(batch)
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.inner.clear()
    }
}
