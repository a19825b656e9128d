//! Review session over one deck.

use std::cell::RefCell;
use std::collections::VecDeque;

use recall_core::{Card, CardId, DeckId, LearnState, ReviewResponse, Timestamp};
use recall_flow::{Flow, StateFlow};

use crate::db::FlashcardDb;
use crate::error::ClientError;

/// Cards taken per load when nothing is overdue.
pub const UPCOMING_BATCH: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewQueueState {
    Loading,
    HasCard {
        card: Card,
        next_card_id: Option<CardId>,
        /// Cards left including the current one.
        remaining: usize,
    },
    Exhausted,
}

/// Queue of cards to review, current card first.
///
/// Loads the deck's overdue cards, most overdue first. If none are overdue
/// it loads the next [`UPCOMING_BATCH`] cards by due time instead.
pub struct ReviewQueue<'db> {
    db: &'db FlashcardDb,
    deck_id: DeckId,
    queue: RefCell<VecDeque<Card>>,
    state: StateFlow<ReviewQueueState>,
}

impl<'db> ReviewQueue<'db> {
    pub fn new(db: &'db FlashcardDb, deck_id: DeckId) -> Result<Self, ClientError> {
        let queue = ReviewQueue {
            state: db.context().create_state_flow(ReviewQueueState::Loading),
            db,
            deck_id,
            queue: RefCell::new(VecDeque::new()),
        };
        queue.load_more(recall_core::now())?;
        Ok(queue)
    }

    pub fn state(&self) -> Flow<ReviewQueueState> {
        self.state.flow()
    }

    pub fn current(&self) -> Option<Card> {
        match self.state.value() {
            ReviewQueueState::HasCard { card, .. } => Some(card),
            _ => None,
        }
    }

    /// Appends the cards due for review at `now` and advances to the next
    /// card.
    pub fn load_more(&self, now: Timestamp) -> Result<(), ClientError> {
        let states = self.db.learn_states_for_deck(&self.deck_id)?;
        let mut loaded = 0;
        for state in upcoming(states, now) {
            match self.db.get_card(&state.card_id)? {
                Some(card) => {
                    self.queue.borrow_mut().push_back(card);
                    loaded += 1;
                }
                None => tracing::warn!(card = %state.card_id, "learn state without a card"),
            }
        }
        tracing::debug!(deck = %self.deck_id, loaded, "loaded review queue");
        self.next();
        Ok(())
    }

    /// Moves to the next queued card.
    pub fn next(&self) {
        let next = {
            let mut queue = self.queue.borrow_mut();
            match queue.pop_front() {
                Some(card) => ReviewQueueState::HasCard {
                    card,
                    next_card_id: queue.front().map(|c| c.card_id.clone()),
                    remaining: queue.len() + 1,
                },
                None => ReviewQueueState::Exhausted,
            }
        };
        self.state.set(next);
        self.db.context().flush();
    }

    /// Grades the current card and moves on. Returns the card's new learn
    /// state, or `None` when there is no current card.
    pub fn answer(&self, response: ReviewResponse) -> Result<Option<LearnState>, ClientError> {
        let Some(card) = self.current() else {
            return Ok(None);
        };
        let state = self
            .db
            .add_review_and_update_learn_state(&card.card_id, response)?;
        self.next();
        Ok(Some(state))
    }
}

/// Overdue states by due time, or the first few upcoming ones.
fn upcoming(mut states: Vec<LearnState>, now: Timestamp) -> Vec<LearnState> {
    states.sort_by(|a, b| a.scheduled_time.total_cmp(&b.scheduled_time));
    let overdue = states.iter().take_while(|s| s.is_overdue(now)).count();
    if overdue > 0 {
        states.truncate(overdue);
    } else {
        states.truncate(UPCOMING_BATCH);
    }
    states
}
