//! Local store: repository traits and the SQLite implementation.

mod day;
pub mod schema;
mod sqlite;

pub use day::{study_day, study_day_end};
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};
use recall_core::{
    Card, CardState, DeckSettings, DeviceId, EffectiveSettings, GlobalSettings, Review,
};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Cards available for a study session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StudyQueue {
    pub new_cards: Vec<Card>,
    pub due_cards: Vec<Card>,
}

impl StudyQueue {
    pub fn len(&self) -> usize {
        self.new_cards.len() + self.due_cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Card state tagged with its card id, as exchanged with the authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardStateWithId {
    pub card_id: i64,
    #[serde(flatten)]
    pub state: CardState,
}

/// A queued review row.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReview {
    pub id: i64,
    pub device_id: DeviceId,
    pub review: Review,
}

/// Settings snapshot exchanged during sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub global: GlobalSettings,
    #[serde(default)]
    pub decks: Vec<DeckSettings>,
}

/// Local sync state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_changes: u32,
}

/// Registered identity of this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDevice {
    pub device_id: DeviceId,
    pub token: String,
}

/// Counts from applying a pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedPull {
    pub cards: usize,
    pub states: usize,
    /// States not applied because the card has unsynced local reviews.
    pub skipped_states: usize,
}

/// A deck with its study counts for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deck {
    pub path: String,
    pub name: String,
    pub card_count: usize,
    pub new_count: usize,
    pub due_count: usize,
}

/// Deck statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeckStats {
    pub total_cards: usize,
    pub new_cards: usize,
    /// Learning and relearning cards.
    pub learning_cards: usize,
    pub review_cards: usize,
    pub average_ease: f64,
    pub average_interval: f64,
}

/// Overall study statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyStats {
    pub reviews_today: usize,
    pub new_today: usize,
    pub streak_days: usize,
    pub retention_rate: f64,
    pub total_reviews: usize,
}

/// Reviews on one study day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub reviews: usize,
}

/// Repository for card operations.
pub trait CardRepository {
    fn get_card(&self, id: i64) -> Result<Option<Card>>;
    /// Non-deleted cards, optionally restricted to one deck.
    fn list_cards(&self, deck_path: Option<&str>) -> Result<Vec<Card>>;
    fn upsert_cards(&self, cards: &[Card]) -> Result<usize>;
    fn soft_delete(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize>;
    fn study_queue(
        &self,
        device: &DeviceId,
        deck_path: Option<&str>,
        settings: &EffectiveSettings,
        now: DateTime<Utc>,
    ) -> Result<StudyQueue>;
}

/// Repository for card state operations.
pub trait StateRepository {
    fn get_card_state(&self, card_id: i64, device: &DeviceId) -> Result<Option<CardState>>;
    fn put_card_state(&self, card_id: i64, device: &DeviceId, state: &CardState) -> Result<()>;
}

/// Repository for the review log and offline queue.
pub trait ReviewRepository {
    fn enqueue_pending_review(&self, device: &DeviceId, review: &Review) -> Result<i64>;
    /// Store the review's resulting state and queue the review in one
    /// transaction.
    fn record_review(&self, device: &DeviceId, review: &Review) -> Result<i64>;
    /// Unsynced reviews in insertion order. Rows stay queued until
    /// [`ReviewRepository::mark_reviews_synced`].
    fn drain_pending_reviews(&self) -> Result<Vec<PendingReview>>;
    fn mark_reviews_synced(&self, ids: &[i64]) -> Result<()>;
    /// Full history for a card, including soft-deleted cards.
    fn reviews_for_card(&self, card_id: i64) -> Result<Vec<Review>>;
}

/// Repository for settings operations.
pub trait SettingsRepository {
    fn get_global_settings(&self) -> Result<GlobalSettings>;
    fn save_global_settings(&self, settings: &GlobalSettings) -> Result<()>;
    fn get_deck_settings(&self, deck_path: &str) -> Result<Option<DeckSettings>>;
    fn save_deck_settings(&self, settings: &DeckSettings) -> Result<()>;
    /// Drop a deck's overrides. Returns false if the deck had none.
    fn delete_deck_settings(&self, deck_path: &str) -> Result<bool>;

    fn get_effective_settings(&self, deck_path: Option<&str>) -> Result<EffectiveSettings> {
        let global = self.get_global_settings()?;
        let deck = match deck_path {
            Some(path) => self.get_deck_settings(path)?,
            None => None,
        };
        Ok(EffectiveSettings::merge(&global, deck.as_ref()))
    }

    /// Settings edited locally since the last push, if any.
    fn dirty_settings(&self) -> Result<Option<SettingsSnapshot>>;
    fn mark_settings_synced(&self) -> Result<()>;
}

/// Repository for deck operations.
pub trait DeckRepository {
    fn list_decks(&self, device: &DeviceId, now: DateTime<Utc>) -> Result<Vec<Deck>>;
    fn get_deck(&self, path: &str, device: &DeviceId, now: DateTime<Utc>) -> Result<Option<Deck>>;
}

/// Repository for statistics over cards and the review log.
///
/// Days are study days in local time, shifted by the daily reset hour.
pub trait StatsRepository {
    fn deck_stats(&self, device: &DeviceId, deck_path: Option<&str>) -> Result<DeckStats>;
    fn study_stats(&self, now: DateTime<Utc>) -> Result<StudyStats>;
    /// The last `days` study days up to today, oldest first.
    fn calendar(&self, now: DateTime<Utc>, days: usize) -> Result<Vec<CalendarDay>>;
}

/// Repository for sync bookkeeping.
pub trait SyncRepository {
    fn get_sync_state(&self) -> Result<SyncState>;
    /// Advance `last_sync_at` and recount outstanding changes.
    fn complete_sync(&self, at: DateTime<Utc>) -> Result<SyncState>;
    fn apply_pull(
        &self,
        device: &DeviceId,
        cards: &[Card],
        states: &[CardStateWithId],
        settings: Option<&SettingsSnapshot>,
    ) -> Result<AppliedPull>;
    fn get_device(&self) -> Result<Option<LocalDevice>>;
    fn save_device(&self, device: &LocalDevice) -> Result<()>;
}

/// Everything the study service and the reconciler need from local storage.
pub trait LocalStore:
    CardRepository
    + StateRepository
    + ReviewRepository
    + SettingsRepository
    + DeckRepository
    + StatsRepository
    + SyncRepository
    + Send
    + Sync
{
}

impl<T> LocalStore for T where
    T: CardRepository
        + StateRepository
        + ReviewRepository
        + SettingsRepository
        + DeckRepository
        + StatsRepository
        + SyncRepository
        + Send
        + Sync
{
}
