//! Typed change notifications for local storage.
//!
//! Every committed change to a table is announced on the [`EventBus`] as a
//! [`ChangeEvent`]. Live queries subscribe per table and refresh their flows
//! from those events.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use recall_core::{CardId, DeckId, LearnState, RangeField, Row, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
    RangeDelete,
    /// The whole table was cleared.
    Drop,
}

/// Payload of a [`ChangeEvent`]: the rows as they are after an add or
/// modify, or as they were before a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Changed {
    Rows(Vec<Row>),
    LearnStates(Vec<LearnState>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: Table,
    pub changed: Changed,
}

impl ChangeEvent {
    pub fn rows(kind: ChangeKind, table: Table, rows: Vec<Row>) -> Self {
        ChangeEvent {
            kind,
            table,
            changed: Changed::Rows(rows),
        }
    }

    pub fn learn_states(kind: ChangeKind, states: Vec<LearnState>) -> Self {
        ChangeEvent {
            kind,
            table: Table::LearnState,
            changed: Changed::LearnStates(states),
        }
    }

    pub fn dropped(table: Table) -> Self {
        let changed = match table {
            Table::LearnState => Changed::LearnStates(Vec::new()),
            _ => Changed::Rows(Vec::new()),
        };
        ChangeEvent {
            kind: ChangeKind::Drop,
            table,
            changed,
        }
    }

    pub fn len(&self) -> usize {
        match &self.changed {
            Changed::Rows(rows) => rows.len(),
            Changed::LearnStates(states) => states.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the event can change anything belonging to `deck_id`.
    pub fn touches_deck(&self, deck_id: &DeckId) -> bool {
        if self.kind == ChangeKind::Drop {
            return true;
        }
        match &self.changed {
            Changed::Rows(rows) => rows
                .iter()
                .any(|row| row.field(RangeField::DeckId) == Some(deck_id.as_str())),
            Changed::LearnStates(states) => states.iter().any(|s| &s.deck_id == deck_id),
        }
    }

    /// Whether the event can change anything belonging to `card_id`.
    pub fn touches_card(&self, card_id: &CardId) -> bool {
        if self.kind == ChangeKind::Drop {
            return true;
        }
        match &self.changed {
            Changed::Rows(rows) => rows
                .iter()
                .any(|row| row.field(RangeField::CardId) == Some(card_id.as_str())),
            Changed::LearnStates(states) => states.iter().any(|s| &s.card_id == card_id),
        }
    }
}

type Callback = Rc<dyn Fn(&ChangeEvent)>;

#[derive(Default)]
struct Registry {
    next_id: Cell<u64>,
    listeners: RefCell<HashMap<Table, Vec<(u64, Callback)>>>,
}

/// Per-table registry of change listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Rc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events on `table` until the returned
    /// guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(&self, table: Table, callback: impl Fn(&ChangeEvent) + 'static) -> Subscription {
        let id = self.registry.next_id.get();
        self.registry.next_id.set(id + 1);
        self.registry
            .listeners
            .borrow_mut()
            .entry(table)
            .or_default()
            .push((id, Rc::new(callback)));
        Subscription {
            registry: Rc::downgrade(&self.registry),
            table,
            id,
        }
    }

    /// Delivers `event` to the listeners of its table. Listeners may
    /// subscribe or unsubscribe while being called.
    pub fn publish(&self, event: &ChangeEvent) {
        let listeners: Vec<Callback> = match self.registry.listeners.borrow().get(&event.table) {
            Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        };
        tracing::trace!(
            table = %event.table,
            kind = ?event.kind,
            rows = event.len(),
            listeners = listeners.len(),
            "publishing change"
        );
        for callback in listeners {
            callback(event);
        }
    }

    pub fn publish_all(&self, events: &[ChangeEvent]) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn listener_count(&self, table: Table) -> usize {
        self.registry
            .listeners
            .borrow()
            .get(&table)
            .map_or(0, Vec::len)
    }
}

/// Unsubscribes its listener when dropped.
pub struct Subscription {
    registry: Weak<Registry>,
    table: Table,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(list) = registry.listeners.borrow_mut().get_mut(&self.table) {
            list.retain(|(id, _)| *id != self.id);
        };
    }
}
