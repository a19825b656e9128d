//! SM2-family learn-state scheduling.
//!
//! A learn state is derived entirely from a card's review history and is
//! never synchronized. Two paths compute it:
//!
//! - [`SchedulerConfig::after_review`] applies one review to the stored state
//!   (used when the user grades a card on this device).
//! - [`SchedulerConfig::from_history`] replays the history from the initial
//!   state (used after a sync round touched the card's reviews). History older
//!   than the most recent failing review is discarded first, since a failure
//!   resets the learning curve.

use serde::{Deserialize, Serialize};

use crate::id::{CardId, DeckId};
use crate::row::{Card, Review, ReviewResponse, Timestamp};

pub const SECONDS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

/// Coefficients and bounds of the easiness-factor update.
///
/// `EF' = max(min_easiness_factor, EF + a*r^2 + b*r + c)` where `r` is the
/// response grade. The defaults leave EF unchanged for
/// [`ReviewResponse::CorrectButDifficult`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub min_easiness_factor: f64,
    pub initial_easiness_factor: f64,
    /// Seconds.
    pub initial_interval: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            a: -0.1 / 3.0,
            b: 0.8 / 3.0,
            c: -0.4,
            min_easiness_factor: 1.3,
            initial_easiness_factor: 2.5,
            initial_interval: SECONDS_PER_DAY,
        }
    }
}

/// Per-card scheduling record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnState {
    pub card_id: CardId,
    pub deck_id: DeckId,
    pub easiness_factor: f64,
    /// Seconds.
    pub review_interval: f64,
    /// Seconds since the epoch.
    pub scheduled_time: Timestamp,
}

impl LearnState {
    /// A card is overdue once `now` has passed its scheduled time.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        now > self.scheduled_time
    }
}

impl SchedulerConfig {
    /// State of a freshly created card: due at its creation time.
    pub fn initial_state(&self, card: &Card) -> LearnState {
        LearnState {
            card_id: card.card_id.clone(),
            deck_id: card.deck_id.clone(),
            easiness_factor: self.initial_easiness_factor,
            review_interval: self.initial_interval,
            scheduled_time: card.date_created,
        }
    }

    /// One step of the update rule. Returns `(easiness_factor, review_interval)`.
    pub fn step(&self, easiness_factor: f64, interval: f64, response: ReviewResponse) -> (f64, f64) {
        let r = response.grade();
        let ef = (easiness_factor + self.a * r * r + self.b * r + self.c)
            .max(self.min_easiness_factor);
        let interval = if response.is_failing() {
            self.initial_interval
        } else {
            interval * ef
        };
        (ef, interval)
    }

    /// Incremental path: apply one review to `state`.
    ///
    /// Failing grades make the card due immediately (`now - 1`).
    pub fn after_review(
        &self,
        state: &LearnState,
        response: ReviewResponse,
        now: Timestamp,
    ) -> LearnState {
        let (easiness_factor, review_interval) =
            self.step(state.easiness_factor, state.review_interval, response);
        LearnState {
            card_id: state.card_id.clone(),
            deck_id: state.deck_id.clone(),
            easiness_factor,
            review_interval,
            scheduled_time: due_time(response, review_interval, now),
        }
    }

    /// From-scratch path over the card's full review history, in any order.
    pub fn from_history(
        &self,
        card_id: &CardId,
        deck_id: &DeckId,
        reviews: &[Review],
        now: Timestamp,
    ) -> LearnState {
        let relevant = trim_history(reviews);
        let (mut ef, mut interval) = (self.initial_easiness_factor, self.initial_interval);
        for review in &relevant {
            (ef, interval) = self.step(ef, interval, review.response);
        }
        let scheduled_time = match relevant.last() {
            Some(newest) if !newest.response.is_failing() => now + interval,
            _ => now - 1.0,
        };
        LearnState {
            card_id: card_id.clone(),
            deck_id: deck_id.clone(),
            easiness_factor: ef,
            review_interval: interval,
            scheduled_time,
        }
    }
}

fn due_time(response: ReviewResponse, interval: f64, now: Timestamp) -> Timestamp {
    if response.is_failing() {
        now - 1.0
    } else {
        now + interval
    }
}

/// Reviews from the most recent failing one on, oldest first. Reviews with
/// equal timestamps replay in `review_id` order.
pub fn trim_history(reviews: &[Review]) -> Vec<&Review> {
    let mut sorted: Vec<&Review> = reviews.iter().collect();
    sorted.sort_by(|a, b| {
        a.date_created
            .total_cmp(&b.date_created)
            .then_with(|| a.review_id.cmp(&b.review_id))
    });
    let start = sorted
        .iter()
        .rposition(|r| r.response.is_failing())
        .unwrap_or(0);
    sorted.split_off(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ReviewId;
    use crate::row::UNSYNCED;
    use proptest::prelude::*;

    const NOW: f64 = 1_700_000_000.0;

    fn card() -> Card {
        Card {
            card_id: CardId::from("c"),
            deck_id: DeckId::from("d"),
            front: "q".into(),
            back: "a".into(),
            date_created: 100.0,
            remote_date: UNSYNCED,
        }
    }

    fn review(date_created: f64, response: ReviewResponse) -> Review {
        Review {
            review_id: ReviewId::new_random(),
            card_id: CardId::from("c"),
            deck_id: DeckId::from("d"),
            response,
            date_created,
            remote_date: UNSYNCED,
        }
    }

    fn response_strategy() -> impl Strategy<Value = ReviewResponse> {
        prop_oneof![
            Just(ReviewResponse::CompleteBlackout),
            Just(ReviewResponse::Incorrect),
            Just(ReviewResponse::CorrectButDifficult),
            Just(ReviewResponse::Perfect),
        ]
    }

    #[test]
    fn initial_state_is_due_at_creation() {
        let state = SchedulerConfig::default().initial_state(&card());
        assert_eq!(state.easiness_factor, 2.5);
        assert_eq!(state.review_interval, 86400.0);
        assert_eq!(state.scheduled_time, 100.0);
        assert!(state.is_overdue(100.5));
        assert!(!state.is_overdue(100.0));
    }

    #[test]
    fn mid_scale_response_keeps_easiness() {
        let cfg = SchedulerConfig::default();
        let (ef, interval) = cfg.step(2.5, 86400.0, ReviewResponse::CorrectButDifficult);
        assert!((ef - 2.5).abs() < 1e-9);
        assert!((interval - 86400.0 * 2.5).abs() < 1e-6);
    }

    #[test]
    fn easiness_is_bounded_below() {
        let cfg = SchedulerConfig::default();
        let mut ef = 1.4;
        for _ in 0..10 {
            (ef, _) = cfg.step(ef, 86400.0, ReviewResponse::CompleteBlackout);
        }
        assert_eq!(ef, 1.3);
    }

    #[test]
    fn failing_review_resets_interval_and_makes_card_due() {
        let cfg = SchedulerConfig::default();
        let mut state = cfg.initial_state(&card());
        state.review_interval = 10.0 * 86400.0;
        let next = cfg.after_review(&state, ReviewResponse::Incorrect, NOW);
        assert_eq!(next.review_interval, 86400.0);
        assert_eq!(next.scheduled_time, NOW - 1.0);
        assert!(next.easiness_factor < 2.5);
    }

    #[test]
    fn fail_then_pass_scenario() {
        let cfg = SchedulerConfig::default();
        let state = cfg.initial_state(&card());
        let failed = cfg.after_review(&state, ReviewResponse::Incorrect, NOW);
        assert_eq!(failed.review_interval, 86400.0);
        let passed = cfg.after_review(&failed, ReviewResponse::CorrectButDifficult, NOW);
        assert!(passed.easiness_factor < 2.5);
        assert!((passed.review_interval - 86400.0 * passed.easiness_factor).abs() < 1e-6);
        assert!((passed.scheduled_time - (NOW + passed.review_interval)).abs() < 1e-6);
    }

    #[test]
    fn empty_history_is_due_now() {
        let cfg = SchedulerConfig::default();
        let state = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &[], NOW);
        assert_eq!(state.easiness_factor, 2.5);
        assert_eq!(state.review_interval, 86400.0);
        assert_eq!(state.scheduled_time, NOW - 1.0);
    }

    #[test]
    fn history_before_last_failure_is_ignored() {
        let reviews = vec![
            review(1.0, ReviewResponse::Perfect),
            review(2.0, ReviewResponse::Perfect),
            review(3.0, ReviewResponse::CompleteBlackout),
            review(4.0, ReviewResponse::Perfect),
        ];
        let trimmed = trim_history(&reviews);
        let dates: Vec<_> = trimmed.iter().map(|r| r.date_created).collect();
        assert_eq!(dates, vec![3.0, 4.0]);
    }

    #[test]
    fn equal_timestamps_replay_in_review_id_order() {
        let mut failed = review(5.0, ReviewResponse::Incorrect);
        failed.review_id = ReviewId::from("b");
        let mut passed = review(5.0, ReviewResponse::Perfect);
        passed.review_id = ReviewId::from("a");

        let forward = vec![passed.clone(), failed.clone()];
        let backward = vec![failed, passed];
        let ids = |reviews: &[Review]| -> Vec<String> {
            trim_history(reviews)
                .iter()
                .map(|r| r.review_id.to_string())
                .collect()
        };
        assert_eq!(ids(&forward), vec!["b".to_string()]);
        assert_eq!(ids(&backward), vec!["b".to_string()]);

        let cfg = SchedulerConfig::default();
        let a = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &forward, NOW);
        let b = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &backward, NOW);
        assert_eq!(a, b);
        assert_eq!(a.scheduled_time, NOW - 1.0);
    }

    #[test]
    fn history_order_does_not_matter() {
        let cfg = SchedulerConfig::default();
        let mut reviews = vec![
            review(1.0, ReviewResponse::Perfect),
            review(2.0, ReviewResponse::CorrectButDifficult),
            review(3.0, ReviewResponse::Perfect),
        ];
        let a = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &reviews, NOW);
        reviews.reverse();
        let b = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &reviews, NOW);
        assert_eq!(a, b);
        assert!((a.scheduled_time - (NOW + a.review_interval)).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn from_scratch_matches_incremental_after_last_failure(
            responses in proptest::collection::vec(response_strategy(), 0..12)
        ) {
            let cfg = SchedulerConfig::default();
            let reviews: Vec<Review> = responses
                .iter()
                .enumerate()
                .map(|(i, r)| review(i as f64, *r))
                .collect();

            let scratch = cfg.from_history(&CardId::from("c"), &DeckId::from("d"), &reviews, NOW);

            // Replay incrementally, restarting from the initial state at the last failure.
            let start = responses.iter().rposition(|r| r.is_failing()).unwrap_or(0);
            let mut state = cfg.initial_state(&card());
            for r in &responses[start..] {
                state = cfg.after_review(&state, *r, NOW);
            }

            prop_assert!((scratch.easiness_factor - state.easiness_factor).abs() < 1e-9);
            prop_assert!(
                (scratch.review_interval - state.review_interval).abs()
                    <= 1e-9 * state.review_interval.max(1.0)
            );
            if !responses.is_empty() {
                prop_assert!((scratch.scheduled_time - state.scheduled_time).abs() < 1e-3);
            }
        }
    }
}
