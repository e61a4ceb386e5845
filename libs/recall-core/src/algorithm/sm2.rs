//! SM-2 spaced repetition algorithm.
//!
//! Based on SuperMemo 2 with configurable parameters.

use super::{SchedulingResult, SpacedRepetitionAlgorithm};
use crate::types::{CardState, CardStatus, Rating};
use chrono::{DateTime, Duration, Utc};

/// SM-2 algorithm with configurable parameters.
#[derive(Debug, Clone)]
pub struct Sm2 {
    pub initial_ease: f64,
    pub minimum_ease: f64,
    pub easy_bonus: f64,
    pub hard_multiplier: f64,
    pub graduating_interval: f64,
    pub easy_interval: f64,
    /// Grow the interval by the ease factor on Good instead of keeping it.
    pub ease_scaled_good: bool,
}

impl Default for Sm2 {
    fn default() -> Self {
        Self {
            initial_ease: 2.5,
            minimum_ease: 1.3,
            easy_bonus: 1.3,
            hard_multiplier: 1.2,
            graduating_interval: 1.0,
            easy_interval: 4.0,
            ease_scaled_good: false,
        }
    }
}

impl SpacedRepetitionAlgorithm for Sm2 {
    fn name(&self) -> &'static str {
        "sm2"
    }

    fn initial_state(&self) -> CardState {
        CardState {
            status: CardStatus::New,
            interval_days: 0.0,
            ease_factor: self.initial_ease,
            stability: None,
            difficulty: None,
            lapses: 0,
            reviews_count: 0,
            due_date: None,
        }
    }

    fn schedule(&self, state: &CardState, rating: Rating, now: DateTime<Utc>) -> SchedulingResult {
        let (new_status, new_interval, new_ease, new_lapses) = match state.status {
            CardStatus::New | CardStatus::Learning => self.schedule_learning(state, rating),
            CardStatus::Review | CardStatus::Relearning => self.schedule_review(state, rating),
        };

        let next_due = now + Duration::days(new_interval.ceil() as i64);

        SchedulingResult {
            new_state: CardState {
                status: new_status,
                interval_days: new_interval,
                ease_factor: new_ease,
                stability: None,
                difficulty: None,
                lapses: new_lapses,
                reviews_count: state.reviews_count.saturating_add(1),
                due_date: Some(next_due),
            },
            next_due,
        }
    }
}

impl Sm2 {
    /// New and learning cards never record a lapse.
    fn schedule_learning(&self, state: &CardState, rating: Rating) -> (CardStatus, f64, f64, u32) {
        match rating {
            Rating::Easy => (CardStatus::Review, self.easy_interval, state.ease_factor, state.lapses),
            Rating::Good => (
                CardStatus::Review,
                self.graduating_interval,
                state.ease_factor,
                state.lapses,
            ),
            Rating::Again | Rating::Hard => {
                (CardStatus::Learning, 0.0, state.ease_factor, state.lapses)
            }
        }
    }

    fn schedule_review(&self, state: &CardState, rating: Rating) -> (CardStatus, f64, f64, u32) {
        if rating == Rating::Again {
            return (
                CardStatus::Relearning,
                1.0,
                (state.ease_factor - 0.2).max(self.minimum_ease),
                state.lapses.saturating_add(1),
            );
        }

        let (multiplier, ease_adj) = match rating {
            Rating::Hard => (self.hard_multiplier, -0.15),
            Rating::Easy => (state.ease_factor * self.easy_bonus, 0.15),
            _ if self.ease_scaled_good => (state.ease_factor, 0.0),
            _ => (1.0, 0.0),
        };
        let new_interval = (state.interval_days * multiplier).max(1.0);
        let new_ease = (state.ease_factor + ease_adj).max(self.minimum_ease);
        (CardStatus::Review, new_interval, new_ease, state.lapses)
    }
}
