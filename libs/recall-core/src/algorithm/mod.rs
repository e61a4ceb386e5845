//! Spaced repetition algorithm implementations.

pub mod fsrs;
pub mod sm2;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::types::{Algorithm, CardState, Rating};

pub use fsrs::Fsrs;
pub use sm2::Sm2;

/// Result of scheduling a card after review.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingResult {
    pub new_state: CardState,
    pub next_due: DateTime<Utc>,
}

/// Trait for spaced repetition algorithms.
///
/// `schedule` never mutates its input: it reads a snapshot and returns the
/// next state, so concurrent calls are safe.
pub trait SpacedRepetitionAlgorithm: Send + Sync {
    /// Algorithm identifier.
    fn name(&self) -> &'static str;

    /// Calculate next review state after a review.
    fn schedule(&self, state: &CardState, rating: Rating, now: DateTime<Utc>) -> SchedulingResult;

    /// Initial state for a new card.
    fn initial_state(&self) -> CardState;
}

/// The closed set of schedulers, one variant per [`Algorithm`].
#[derive(Debug, Clone)]
pub enum Scheduler {
    Sm2(Sm2),
    Fsrs(Fsrs),
}

impl Scheduler {
    /// Scheduler with default parameters for the given algorithm.
    pub fn for_algorithm(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sm2 => Self::Sm2(Sm2::default()),
            Algorithm::Fsrs => Self::Fsrs(Fsrs::default()),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Sm2(_) => Algorithm::Sm2,
            Self::Fsrs(_) => Algorithm::Fsrs,
        }
    }
}

impl SpacedRepetitionAlgorithm for Scheduler {
    fn name(&self) -> &'static str {
        match self {
            Self::Sm2(inner) => inner.name(),
            Self::Fsrs(inner) => inner.name(),
        }
    }

    fn schedule(&self, state: &CardState, rating: Rating, now: DateTime<Utc>) -> SchedulingResult {
        match self {
            Self::Sm2(inner) => inner.schedule(state, rating, now),
            Self::Fsrs(inner) => inner.schedule(state, rating, now),
        }
    }

    fn initial_state(&self) -> CardState {
        match self {
            Self::Sm2(inner) => inner.initial_state(),
            Self::Fsrs(inner) => inner.initial_state(),
        }
    }
}

/// Get algorithm by name.
pub fn get_algorithm(name: &str) -> Result<Scheduler, ValidationError> {
    name.parse().map(Scheduler::for_algorithm)
}

/// Initial state of a new card under `algorithm`.
pub fn initial_state(algorithm: Algorithm) -> CardState {
    Scheduler::for_algorithm(algorithm).initial_state()
}

/// Apply one review to `state` under `algorithm`.
pub fn schedule(
    algorithm: Algorithm,
    state: &CardState,
    rating: Rating,
    now: DateTime<Utc>,
) -> SchedulingResult {
    Scheduler::for_algorithm(algorithm).schedule(state, rating, now)
}
