//! FSRS (Free Spaced Repetition Scheduler) algorithm.
//!
//! Memory model with three components:
//! - Difficulty (D): Card difficulty 1-10
//! - Stability (S): Days until retention drops to target
//! - Retrievability (R): Probability of recall

use super::{SchedulingResult, SpacedRepetitionAlgorithm};
use crate::types::{CardState, CardStatus, Rating};
use chrono::{DateTime, Duration, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// FSRS algorithm with configurable parameters.
#[derive(Debug, Clone)]
pub struct Fsrs {
    pub request_retention: f64,
    pub maximum_interval: f64,
    /// FSRS-4.5 parameters (17 weights).
    pub w: [f64; 17],
}

impl Default for Fsrs {
    fn default() -> Self {
        Self {
            request_retention: 0.9,
            maximum_interval: 36500.0,
            w: [
                0.4, 0.6, 2.4, 5.8, // w[0-3]: initial stability for Again, Hard, Good, Easy
                4.93, // w[4]: initial difficulty base
                0.94, // w[5]: initial difficulty modifier
                0.86, // w[6]: difficulty decay
                0.01, // w[7]: mean reversion weight
                1.49, // w[8]: stability exp base
                0.14, // w[9]: stability decay
                0.94, // w[10]: retrievability effect
                2.18, // w[11]: forget stability base
                0.05, // w[12]: difficulty on forget
                0.34, // w[13]: stability on forget
                1.26, // w[14]: retrievability on forget
                0.29, // w[15]: hard penalty
                2.61, // w[16]: easy bonus
            ],
        }
    }
}

impl SpacedRepetitionAlgorithm for Fsrs {
    fn name(&self) -> &'static str {
        "fsrs"
    }

    fn initial_state(&self) -> CardState {
        CardState::default()
    }

    fn schedule(&self, state: &CardState, rating: Rating, now: DateTime<Utc>) -> SchedulingResult {
        let memory = match (state.stability, state.difficulty) {
            (Some(s), Some(d)) if state.reviews_count > 0 => Some((s, d)),
            _ => None,
        };

        let (new_stability, new_difficulty, new_lapses) = match memory {
            None => (
                self.initial_stability(rating),
                self.initial_difficulty(rating),
                state.lapses,
            ),
            Some((stability, difficulty)) => {
                self.schedule_subsequent_review(state, stability, difficulty, rating, now)
            }
        };

        let new_interval = if rating == Rating::Again {
            self.short_term_interval(new_stability)
        } else {
            self.interval_from_stability(new_stability)
        };

        let next_due = now + Duration::seconds((new_interval * SECONDS_PER_DAY).round() as i64);

        SchedulingResult {
            new_state: CardState {
                status: determine_status(state.status, rating),
                interval_days: new_interval,
                ease_factor: state.ease_factor,
                stability: Some(new_stability),
                difficulty: Some(new_difficulty),
                lapses: new_lapses,
                reviews_count: state.reviews_count.saturating_add(1),
                due_date: Some(next_due),
            },
            next_due,
        }
    }
}

fn grade(rating: Rating) -> f64 {
    f64::from(rating.to_value())
}

/// Status transition table.
fn determine_status(current: CardStatus, rating: Rating) -> CardStatus {
    match (current, rating) {
        (CardStatus::New | CardStatus::Learning, Rating::Again) => CardStatus::Learning,
        (CardStatus::Review | CardStatus::Relearning, Rating::Again) => CardStatus::Relearning,
        (_, _) => CardStatus::Review,
    }
}

impl Fsrs {
    /// S0(G) = w[G-1]
    fn initial_stability(&self, rating: Rating) -> f64 {
        let index = usize::from(rating.to_value() - 1);
        self.w[index].max(0.1)
    }

    /// D0(G) = w[4] - w[5] * (G - 3)
    fn initial_difficulty(&self, rating: Rating) -> f64 {
        let d0 = self.w[4] - self.w[5] * (grade(rating) - 3.0);
        d0.clamp(1.0, 10.0)
    }

    /// Mean reversion towards D0, then decay by rating:
    /// D' = w[7] * D0(G) + (1 - w[7]) * D - w[6] * (G - 3)
    fn next_difficulty(&self, current_d: f64, rating: Rating) -> f64 {
        let d0 = self.initial_difficulty(rating);
        let d_new = self.w[7] * d0 + (1.0 - self.w[7]) * current_d;
        let d_decayed = d_new - self.w[6] * (grade(rating) - 3.0);
        d_decayed.clamp(1.0, 10.0)
    }

    /// R = (1 + t / (9 * S))^(-1)
    pub fn retrievability(&self, elapsed_days: f64, stability: f64) -> f64 {
        if stability <= 0.0 {
            return 0.0;
        }
        let factor = 1.0 + elapsed_days / (9.0 * stability);
        factor.powf(-1.0)
    }

    /// S' = S * (e^(w[8]) * (11 - D) * S^(-w[9]) * (e^(w[10]*(1-R)) - 1) + 1) * modifier
    fn next_stability_recall(
        &self,
        stability: f64,
        difficulty: f64,
        retrievability: f64,
        rating: Rating,
    ) -> f64 {
        let exp_w8 = self.w[8].exp();
        let d_factor = (11.0 - difficulty).max(0.1);
        let s_decay = stability.powf(-self.w[9]);
        let r_factor = (self.w[10] * (1.0 - retrievability)).exp() - 1.0;

        let growth = exp_w8 * d_factor * s_decay * r_factor + 1.0;

        let modifier = match rating {
            Rating::Hard => self.w[15],
            Rating::Easy => self.w[16],
            _ => 1.0,
        };

        (stability * growth * modifier).clamp(0.1, self.maximum_interval)
    }

    /// S' = w[11] * D^(-w[12]) * ((S+1)^w[13] - 1) * e^(w[14]*(1-R)), never
    /// above the previous stability.
    fn next_stability_forget(&self, stability: f64, difficulty: f64, retrievability: f64) -> f64 {
        let d_factor = difficulty.max(1.0).powf(-self.w[12]);
        let s_factor = (stability + 1.0).powf(self.w[13]) - 1.0;
        let r_factor = (self.w[14] * (1.0 - retrievability)).exp();

        let new_s = self.w[11] * d_factor * s_factor * r_factor;
        new_s.max(0.1).min(stability)
    }

    /// Interval at which predicted retrievability equals the requested
    /// retention: I = 9 * S * (1/R - 1).
    pub fn interval_from_stability(&self, stability: f64) -> f64 {
        if self.request_retention <= 0.0 || self.request_retention >= 1.0 {
            return stability.min(self.maximum_interval);
        }
        let interval = 9.0 * stability * (1.0 / self.request_retention - 1.0);
        interval.clamp(1.0, self.maximum_interval)
    }

    /// Learning step after a failed recall: 10 minutes to 1 day.
    fn short_term_interval(&self, stability: f64) -> f64 {
        let minutes = (stability * 60.0).clamp(10.0, 1440.0);
        minutes / 1440.0
    }

    /// Days since the previous review, recovered as due - interval.
    fn elapsed_days(state: &CardState, now: DateTime<Utc>) -> f64 {
        match state.due_date {
            Some(due) => {
                let interval_secs = (state.interval_days * SECONDS_PER_DAY) as i64;
                let last_review = due - Duration::seconds(interval_secs);
                let elapsed = now.signed_duration_since(last_review);
                (elapsed.num_seconds() as f64 / SECONDS_PER_DAY).max(0.0)
            }
            None => state.interval_days.max(0.0),
        }
    }

    fn schedule_subsequent_review(
        &self,
        state: &CardState,
        stability: f64,
        difficulty: f64,
        rating: Rating,
        now: DateTime<Utc>,
    ) -> (f64, f64, u32) {
        let elapsed = Self::elapsed_days(state, now);
        let r = self.retrievability(elapsed, stability);
        let new_d = self.next_difficulty(difficulty, rating);

        if rating == Rating::Again {
            let s = self.next_stability_forget(stability, difficulty, r);
            (s, new_d, state.lapses.saturating_add(1))
        } else {
            let s = self.next_stability_recall(stability, difficulty, r, rating);
            (s, new_d, state.lapses)
        }
    }
}
