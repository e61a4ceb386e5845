//! Error types for recall-core.

use thiserror::Error;

/// Input rejected at the call boundary. Nothing is applied when one of these
/// is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid rating value {0} (expected 1-4)")]
    InvalidRating(u8),

    #[error("rating value {value} is not valid on the {scale} scale")]
    RatingOutOfScale { value: u8, scale: &'static str },

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown rating scale: {0}")]
    UnknownRatingScale(String),

    #[error("unknown matching mode: {0}")]
    UnknownMatchingMode(String),

    #[error("unknown answer mode: {0}")]
    UnknownAnswerMode(String),

    #[error("unknown card status: {0}")]
    UnknownStatus(String),

    #[error("fuzzy threshold {0} is outside [0, 1]")]
    InvalidThreshold(f64),
}

/// Per-record problem found while parsing markdown. A warning excludes the
/// affected record only; parsing continues with the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseWarning {
    #[error("missing question in record starting at line {line}")]
    MissingQuestion { line: usize },

    #[error("missing answer in record starting at line {line}")]
    MissingAnswer { line: usize },

    #[error("invalid ID format at line {line}: {value}")]
    InvalidId { line: usize, value: String },

    #[error("duplicate ID {id} at line {line}")]
    DuplicateId { id: i64, line: usize },
}

impl ParseWarning {
    /// Line where the offending record starts (1-based).
    pub fn line(&self) -> usize {
        match self {
            Self::MissingQuestion { line }
            | Self::MissingAnswer { line }
            | Self::InvalidId { line, .. }
            | Self::DuplicateId { line, .. } => *line,
        }
    }
}
