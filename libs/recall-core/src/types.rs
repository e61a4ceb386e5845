//! Core types for the recall engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Card learning status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    #[default]
    New,
    Learning,
    Review,
    Relearning,
}

impl CardStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Relearning => "relearning",
        }
    }
}

impl FromStr for CardStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "learning" => Ok(Self::Learning),
            "review" => Ok(Self::Review),
            "relearning" => Ok(Self::Relearning),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

/// Rating for a review, on the algorithm-internal 4-point scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    /// Convert to 4-point numeric value (1-4).
    pub fn to_value(self) -> u8 {
        match self {
            Self::Again => 1,
            Self::Hard => 2,
            Self::Good => 3,
            Self::Easy => 4,
        }
    }

    /// Create from 4-point numeric value.
    pub fn from_value(value: u8) -> Result<Self, ValidationError> {
        match value {
            1 => Ok(Self::Again),
            2 => Ok(Self::Hard),
            3 => Ok(Self::Good),
            4 => Ok(Self::Easy),
            other => Err(ValidationError::InvalidRating(other)),
        }
    }

    /// Map 2-point rating to 4-point.
    /// Wrong -> Again, Correct -> Good
    pub fn from_2point(correct: bool) -> Self {
        if correct {
            Self::Good
        } else {
            Self::Again
        }
    }
}

/// Rating scale the user answered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RatingScale {
    #[default]
    #[serde(rename = "4point")]
    FourPoint,
    #[serde(rename = "2point")]
    TwoPoint,
}

impl RatingScale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FourPoint => "4point",
            Self::TwoPoint => "2point",
        }
    }

    /// Map a raw button value on this scale onto the internal rating.
    ///
    /// 4-point values map one to one; on the 2-point scale 1 is "wrong"
    /// (Again) and 2 is "correct" (Good).
    pub fn rating(self, value: u8) -> Result<Rating, ValidationError> {
        match self {
            Self::FourPoint => Rating::from_value(value),
            Self::TwoPoint => match value {
                1 => Ok(Rating::from_2point(false)),
                2 => Ok(Rating::from_2point(true)),
                other => Err(ValidationError::RatingOutOfScale {
                    value: other,
                    scale: self.as_str(),
                }),
            },
        }
    }
}

impl FromStr for RatingScale {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4point" => Ok(Self::FourPoint),
            "2point" => Ok(Self::TwoPoint),
            other => Err(ValidationError::UnknownRatingScale(other.to_string())),
        }
    }
}

/// How the answer was given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    #[default]
    Flip,
    Typed,
}

impl AnswerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flip => "flip",
            Self::Typed => "typed",
        }
    }
}

impl FromStr for AnswerMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flip" => Ok(Self::Flip),
            "typed" => Ok(Self::Typed),
            other => Err(ValidationError::UnknownAnswerMode(other.to_string())),
        }
    }
}

/// Matching mode for typed answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    Exact,
    CaseInsensitive,
    #[default]
    Fuzzy,
}

impl MatchingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case_insensitive",
            Self::Fuzzy => "fuzzy",
        }
    }
}

impl FromStr for MatchingMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "case_insensitive" => Ok(Self::CaseInsensitive),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(ValidationError::UnknownMatchingMode(other.to_string())),
        }
    }
}

/// Scheduling algorithm identifier. The set is closed: the name is written
/// into every review, so adding one is a wire-format change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Sm2,
    Fsrs,
}

impl Algorithm {
    /// Get the algorithm name as a string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sm2 => "sm2",
            Self::Fsrs => "fsrs",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sm2" => Ok(Self::Sm2),
            "fsrs" => Ok(Self::Fsrs),
            other => Err(ValidationError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque device identity. Card state is owned per (card, device).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Card learning state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardState {
    pub status: CardStatus,
    pub interval_days: f64,
    pub ease_factor: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
    pub lapses: u32,
    pub reviews_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            status: CardStatus::New,
            interval_days: 0.0,
            ease_factor: 2.5,
            stability: None,
            difficulty: None,
            lapses: 0,
            reviews_count: 0,
            due_date: None,
        }
    }
}

/// Card record parsed from markdown (may not have an ID yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: Option<i64>,
    pub question: String,
    pub answer: String,
    /// Line where the record starts (1-based): its `ID:` line, or the `Q:`
    /// line when the record has no `ID:` marker.
    pub line_number: usize,
    /// Whether the record starts with an `ID:` line (possibly empty).
    pub has_id_marker: bool,
}

impl CardRecord {
    /// A record without an identifier yet.
    pub fn is_pending(&self) -> bool {
        self.id.is_none()
    }
}

/// Card with assigned ID and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub deck_path: String,
    pub question: String,
    pub answer: String,
    pub source_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Card {
    pub fn from_record(id: i64, record: &CardRecord, source_file: &str) -> Self {
        Self {
            id,
            deck_path: deck_path_for(source_file),
            question: record.question.clone(),
            answer: record.answer.clone(),
            source_file: source_file.to_string(),
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Derive the deck path from a watched file's relative path.
///
/// "rust/ownership.md" -> "rust", "single.md" -> "single"
pub fn deck_path_for(file_path: &str) -> String {
    let normalized = file_path.replace('\\', "/");
    match normalized.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => parent.to_string(),
        Some((_, name)) => name.trim_end_matches(".md").to_string(),
        None => normalized.trim_end_matches(".md").to_string(),
    }
}

/// Append-only record of one scheduling event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub card_id: i64,
    pub reviewed_at: DateTime<Utc>,
    pub rating: Rating,
    pub rating_scale: RatingScale,
    pub answer_mode: AnswerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_ms: Option<u32>,
    pub interval_before: f64,
    pub interval_after: f64,
    pub ease_before: f64,
    pub ease_after: f64,
    /// Scheduler that produced the transition; pins replay.
    pub algorithm: Algorithm,
    pub state_after: CardState,
}

/// Global settings configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub algorithm: Algorithm,
    pub rating_scale: RatingScale,
    pub matching_mode: MatchingMode,
    pub fuzzy_threshold: f64,
    pub new_cards_per_day: u32,
    pub reviews_per_day: u32,
    pub daily_reset_hour: u32,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            rating_scale: RatingScale::default(),
            matching_mode: MatchingMode::default(),
            fuzzy_threshold: 0.8,
            new_cards_per_day: 20,
            reviews_per_day: 200,
            daily_reset_hour: 0,
        }
    }
}

/// Per-deck settings (all fields optional for overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSettings {
    pub deck_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<Algorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_scale: Option<RatingScale>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_mode: Option<MatchingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzzy_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cards_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews_per_day: Option<u32>,
}

impl DeckSettings {
    /// Create new deck settings with only the path set.
    pub fn new(deck_path: impl Into<String>) -> Self {
        Self {
            deck_path: deck_path.into(),
            algorithm: None,
            rating_scale: None,
            matching_mode: None,
            fuzzy_threshold: None,
            new_cards_per_day: None,
            reviews_per_day: None,
        }
    }
}

/// Effective settings (global merged with deck overrides).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    pub algorithm: Algorithm,
    pub rating_scale: RatingScale,
    pub matching_mode: MatchingMode,
    pub fuzzy_threshold: f64,
    pub new_cards_per_day: u32,
    pub reviews_per_day: u32,
    pub daily_reset_hour: u32,
}

impl EffectiveSettings {
    /// Merge global settings with optional deck settings. Deck fields win
    /// where present; the daily reset hour is global only.
    pub fn merge(global: &GlobalSettings, deck: Option<&DeckSettings>) -> Self {
        let mut merged = Self {
            algorithm: global.algorithm,
            rating_scale: global.rating_scale,
            matching_mode: global.matching_mode,
            fuzzy_threshold: global.fuzzy_threshold,
            new_cards_per_day: global.new_cards_per_day,
            reviews_per_day: global.reviews_per_day,
            daily_reset_hour: global.daily_reset_hour,
        };
        if let Some(d) = deck {
            merged.algorithm = d.algorithm.unwrap_or(merged.algorithm);
            merged.rating_scale = d.rating_scale.unwrap_or(merged.rating_scale);
            merged.matching_mode = d.matching_mode.unwrap_or(merged.matching_mode);
            merged.fuzzy_threshold = d.fuzzy_threshold.unwrap_or(merged.fuzzy_threshold);
            merged.new_cards_per_day = d.new_cards_per_day.unwrap_or(merged.new_cards_per_day);
            merged.reviews_per_day = d.reviews_per_day.unwrap_or(merged.reviews_per_day);
        }
        merged
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(ValidationError::InvalidThreshold(self.fuzzy_threshold));
        }
        Ok(())
    }
}

impl Default for EffectiveSettings {
    fn default() -> Self {
        Self::merge(&GlobalSettings::default(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn rating_rejects_out_of_range_values() {
        assert_eq!(Rating::from_value(0), Err(ValidationError::InvalidRating(0)));
        assert_eq!(Rating::from_value(5), Err(ValidationError::InvalidRating(5)));
        for rating in Rating::ALL {
            assert_eq!(Rating::from_value(rating.to_value()), Ok(rating));
        }
    }

    #[test]
    fn two_point_scale_maps_onto_again_and_good() {
        let scale = RatingScale::TwoPoint;
        assert_eq!(scale.rating(1), Ok(Rating::Again));
        assert_eq!(scale.rating(2), Ok(Rating::Good));
        assert!(matches!(
            scale.rating(3),
            Err(ValidationError::RatingOutOfScale { value: 3, .. })
        ));
    }

    #[test]
    fn unknown_algorithm_is_a_validation_error() {
        assert_eq!("fsrs".parse::<Algorithm>(), Ok(Algorithm::Fsrs));
        assert_eq!(
            "anki".parse::<Algorithm>(),
            Err(ValidationError::UnknownAlgorithm("anki".to_string()))
        );
    }

    #[test]
    fn wire_names_match_storage_names() {
        assert_eq!(serde_json::to_string(&RatingScale::TwoPoint).unwrap(), "\"2point\"");
        assert_eq!(
            serde_json::to_string(&MatchingMode::CaseInsensitive).unwrap(),
            "\"case_insensitive\""
        );
        assert_eq!(serde_json::to_string(&Algorithm::Fsrs).unwrap(), "\"fsrs\"");
        assert_eq!(
            "relearning".parse::<CardStatus>().unwrap().as_str(),
            CardStatus::Relearning.as_str()
        );
    }

    #[test]
    fn deck_override_wins_per_field() {
        let global = GlobalSettings::default();
        let mut deck = DeckSettings::new("rust");
        deck.algorithm = Some(Algorithm::Fsrs);
        deck.fuzzy_threshold = Some(0.6);

        let merged = EffectiveSettings::merge(&global, Some(&deck));
        assert_eq!(merged.algorithm, Algorithm::Fsrs);
        assert_eq!(merged.fuzzy_threshold, 0.6);
        assert_eq!(merged.matching_mode, global.matching_mode);
        assert_eq!(merged.new_cards_per_day, 20);
    }

    #[test]
    fn threshold_outside_unit_interval_is_rejected() {
        let mut settings = EffectiveSettings::default();
        settings.fuzzy_threshold = 1.5;
        assert_eq!(settings.validate(), Err(ValidationError::InvalidThreshold(1.5)));
        settings.fuzzy_threshold = f64::NAN;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn deck_path_from_file_path() {
        assert_eq!(deck_path_for("rust/ownership.md"), "rust");
        assert_eq!(deck_path_for("prog/rust/basics.md"), "prog/rust");
        assert_eq!(deck_path_for("single.md"), "single");
        assert_eq!(deck_path_for("my decks/rust/basics.md"), "my decks/rust");
    }
}
