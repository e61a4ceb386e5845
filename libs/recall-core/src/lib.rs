//! Core flashcard engine shared by the sync library and the authority server.
//!
//! Provides:
//! - Markdown parser for flashcard files
//! - Spaced repetition algorithm implementations (SM-2, FSRS)
//! - Answer matching for typed mode (Levenshtein distance, token diff)
//! - Review grading
//! - Shared types (Card, CardState, Rating, etc.)

pub mod algorithm;
pub mod error;
pub mod matching;
pub mod parser;
pub mod study;
pub mod types;

pub use algorithm::{
    get_algorithm, initial_state, schedule, Scheduler, SchedulingResult, SpacedRepetitionAlgorithm,
};
pub use error::{ParseWarning, ValidationError};
pub use matching::{
    compare, diff, levenshtein_distance, normalized_similarity, DiffSegment, DiffType, MatchResult,
};
pub use parser::{inject_ids, parse, parse_all, ParsedFile, Records};
pub use study::{grade, Answer, Graded};
pub use types::{
    deck_path_for, Algorithm, AnswerMode, Card, CardRecord, CardState, CardStatus, DeckSettings,
    DeviceId, EffectiveSettings, GlobalSettings, MatchingMode, Rating, RatingScale, Review,
};
