//! SQLite implementation of the local store.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Local, NaiveDate, SecondsFormat, Utc};
use recall_core::{
    Card, CardState, DeckSettings, DeviceId, EffectiveSettings, GlobalSettings, Rating, Review,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::schema::{INIT_ROWS, SCHEMA, SCHEMA_VERSION};
use super::{
    study_day, study_day_end, AppliedPull, CalendarDay, CardRepository, CardStateWithId, Deck,
    DeckRepository, DeckStats, LocalDevice, PendingReview, ReviewRepository, SettingsRepository,
    SettingsSnapshot, StateRepository, StatsRepository, StudyQueue, StudyStats, SyncRepository,
    SyncState,
};
use crate::error::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Local store backed by one SQLite connection.
///
/// Every writing method runs in a single transaction, so readers never
/// observe half of a stage's changes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open database at path, creating if necessary.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(INIT_ROWS)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {value:?}: {e}")))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

struct CardRow {
    id: i64,
    deck_path: String,
    question: String,
    answer: String,
    source_file: String,
    deleted_at: Option<String>,
}

impl CardRow {
    const COLUMNS: &'static str =
        "c.id, c.deck_path, c.question_text, c.answer_text, c.source_file, c.deleted_at";

    fn read(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            deck_path: row.get(1)?,
            question: row.get(2)?,
            answer: row.get(3)?,
            source_file: row.get(4)?,
            deleted_at: row.get(5)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        Ok(Card {
            id: self.id,
            deck_path: self.deck_path,
            question: self.question,
            answer: self.answer,
            source_file: self.source_file,
            deleted_at: parse_optional_timestamp(self.deleted_at)?,
        })
    }
}

fn into_cards(rows: Vec<CardRow>) -> Result<Vec<Card>> {
    rows.into_iter().map(CardRow::into_card).collect()
}

struct StateRow {
    status: String,
    interval_days: f64,
    ease_factor: f64,
    due_date: Option<String>,
    stability: Option<f64>,
    difficulty: Option<f64>,
    lapses: u32,
    reviews_count: u32,
}

impl StateRow {
    fn into_state(self) -> Result<CardState> {
        Ok(CardState {
            status: self.status.parse()?,
            interval_days: self.interval_days,
            ease_factor: self.ease_factor,
            stability: self.stability,
            difficulty: self.difficulty,
            lapses: self.lapses,
            reviews_count: self.reviews_count,
            due_date: parse_optional_timestamp(self.due_date)?,
        })
    }
}

struct ReviewRow {
    id: i64,
    card_id: i64,
    device_id: String,
    reviewed_at: String,
    rating: u8,
    rating_scale: String,
    answer_mode: String,
    typed_answer: Option<String>,
    was_correct: Option<bool>,
    time_taken_ms: Option<u32>,
    interval_before: f64,
    interval_after: f64,
    ease_before: f64,
    ease_after: f64,
    algorithm: String,
    state_after: String,
}

impl ReviewRow {
    const COLUMNS: &'static str = "id, card_id, device_id, reviewed_at, rating, rating_scale, \
        answer_mode, typed_answer, was_correct, time_taken_ms, interval_before, interval_after, \
        ease_before, ease_after, algorithm, state_after";

    fn read(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            card_id: row.get(1)?,
            device_id: row.get(2)?,
            reviewed_at: row.get(3)?,
            rating: row.get(4)?,
            rating_scale: row.get(5)?,
            answer_mode: row.get(6)?,
            typed_answer: row.get(7)?,
            was_correct: row.get(8)?,
            time_taken_ms: row.get(9)?,
            interval_before: row.get(10)?,
            interval_after: row.get(11)?,
            ease_before: row.get(12)?,
            ease_after: row.get(13)?,
            algorithm: row.get(14)?,
            state_after: row.get(15)?,
        })
    }

    fn into_pending(self) -> Result<PendingReview> {
        let review = Review {
            card_id: self.card_id,
            reviewed_at: parse_timestamp(&self.reviewed_at)?,
            rating: Rating::from_value(self.rating)?,
            rating_scale: self.rating_scale.parse()?,
            answer_mode: self.answer_mode.parse()?,
            typed_answer: self.typed_answer,
            was_correct: self.was_correct,
            time_taken_ms: self.time_taken_ms,
            interval_before: self.interval_before,
            interval_after: self.interval_after,
            ease_before: self.ease_before,
            ease_after: self.ease_after,
            algorithm: self.algorithm.parse()?,
            state_after: serde_json::from_str(&self.state_after)?,
        };
        Ok(PendingReview {
            id: self.id,
            device_id: DeviceId::new(self.device_id),
            review,
        })
    }
}

fn write_card(conn: &Connection, card: &Card, now: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO cards (id, deck_path, question_text, answer_text, source_file, deleted_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            deck_path = excluded.deck_path,
            question_text = excluded.question_text,
            answer_text = excluded.answer_text,
            source_file = excluded.source_file,
            deleted_at = excluded.deleted_at,
            updated_at = excluded.updated_at",
        params![
            card.id,
            card.deck_path,
            card.question,
            card.answer,
            card.source_file,
            card.deleted_at.as_ref().map(timestamp),
            now,
        ],
    )?;
    Ok(())
}

fn write_state(conn: &Connection, card_id: i64, device: &DeviceId, state: &CardState) -> Result<()> {
    conn.execute(
        "INSERT INTO card_states (card_id, device_id, status, interval_days, ease_factor, due_date, stability, difficulty, lapses, reviews_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(card_id, device_id) DO UPDATE SET
            status = excluded.status,
            interval_days = excluded.interval_days,
            ease_factor = excluded.ease_factor,
            due_date = excluded.due_date,
            stability = excluded.stability,
            difficulty = excluded.difficulty,
            lapses = excluded.lapses,
            reviews_count = excluded.reviews_count",
        params![
            card_id,
            device.as_str(),
            state.status.as_str(),
            state.interval_days,
            state.ease_factor,
            state.due_date.as_ref().map(timestamp),
            state.stability,
            state.difficulty,
            state.lapses,
            state.reviews_count,
        ],
    )?;
    Ok(())
}

fn insert_review(conn: &Connection, device: &DeviceId, review: &Review) -> Result<i64> {
    let state_after = serde_json::to_string(&review.state_after)?;
    conn.execute(
        "INSERT INTO pending_reviews (card_id, device_id, reviewed_at, rating, rating_scale, answer_mode,
            typed_answer, was_correct, time_taken_ms, interval_before, interval_after, ease_before,
            ease_after, algorithm, state_after, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0)",
        params![
            review.card_id,
            device.as_str(),
            timestamp(&review.reviewed_at),
            review.rating.to_value(),
            review.rating_scale.as_str(),
            review.answer_mode.as_str(),
            review.typed_answer,
            review.was_correct,
            review.time_taken_ms,
            review.interval_before,
            review.interval_after,
            review.ease_before,
            review.ease_after,
            review.algorithm.as_str(),
            state_after,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn increment_pending_changes(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE sync_state SET pending_changes = pending_changes + 1 WHERE id = 1",
        [],
    )?;
    Ok(())
}

fn settings_dirty(conn: &Connection) -> Result<bool> {
    let dirty: bool = conn.query_row(
        "SELECT (SELECT dirty FROM global_settings WHERE id = 1) = 1
            OR EXISTS(SELECT 1 FROM deck_settings WHERE dirty = 1)",
        [],
        |row| row.get(0),
    )?;
    Ok(dirty)
}

fn read_global_settings(conn: &Connection) -> Result<GlobalSettings> {
    let (algorithm, rating_scale, matching_mode, fuzzy_threshold, new_cards, reviews, reset): (
        String,
        String,
        String,
        f64,
        u32,
        u32,
        u32,
    ) = conn.query_row(
        "SELECT algorithm, rating_scale, matching_mode, fuzzy_threshold, new_cards_per_day,
                reviews_per_day, daily_reset_hour
         FROM global_settings WHERE id = 1",
        [],
        |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        },
    )?;

    Ok(GlobalSettings {
        algorithm: algorithm.parse()?,
        rating_scale: rating_scale.parse()?,
        matching_mode: matching_mode.parse()?,
        fuzzy_threshold,
        new_cards_per_day: new_cards,
        reviews_per_day: reviews,
        daily_reset_hour: reset,
    })
}

fn write_global_settings(conn: &Connection, settings: &GlobalSettings, dirty: bool) -> Result<()> {
    conn.execute(
        "UPDATE global_settings SET algorithm = ?1, rating_scale = ?2, matching_mode = ?3,
            fuzzy_threshold = ?4, new_cards_per_day = ?5, reviews_per_day = ?6,
            daily_reset_hour = ?7, dirty = ?8
         WHERE id = 1",
        params![
            settings.algorithm.as_str(),
            settings.rating_scale.as_str(),
            settings.matching_mode.as_str(),
            settings.fuzzy_threshold,
            settings.new_cards_per_day,
            settings.reviews_per_day,
            settings.daily_reset_hour,
            dirty,
        ],
    )?;
    Ok(())
}

type DeckSettingsRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<u32>,
    Option<u32>,
);

const DECK_SETTINGS_COLUMNS: &str = "deck_path, algorithm, rating_scale, matching_mode, \
    fuzzy_threshold, new_cards_per_day, reviews_per_day";

fn read_deck_settings_row(row: &rusqlite::Row) -> rusqlite::Result<DeckSettingsRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn into_deck_settings(row: DeckSettingsRow) -> Result<DeckSettings> {
    let (deck_path, algorithm, rating_scale, matching_mode, fuzzy_threshold, new_cards, reviews) =
        row;
    Ok(DeckSettings {
        deck_path,
        algorithm: algorithm.map(|s| s.parse()).transpose()?,
        rating_scale: rating_scale.map(|s| s.parse()).transpose()?,
        matching_mode: matching_mode.map(|s| s.parse()).transpose()?,
        fuzzy_threshold,
        new_cards_per_day: new_cards,
        reviews_per_day: reviews,
    })
}

fn write_deck_settings(conn: &Connection, settings: &DeckSettings, dirty: bool) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO deck_settings (deck_path, algorithm, rating_scale, matching_mode,
            fuzzy_threshold, new_cards_per_day, reviews_per_day, dirty)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            settings.deck_path,
            settings.algorithm.map(|a| a.as_str()),
            settings.rating_scale.map(|r| r.as_str()),
            settings.matching_mode.map(|m| m.as_str()),
            settings.fuzzy_threshold,
            settings.new_cards_per_day,
            settings.reviews_per_day,
            dirty,
        ],
    )?;
    Ok(())
}

fn read_all_deck_settings(conn: &Connection) -> Result<Vec<DeckSettings>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DECK_SETTINGS_COLUMNS} FROM deck_settings ORDER BY deck_path"
    ))?;
    let rows = stmt
        .query_map([], read_deck_settings_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_deck_settings).collect()
}

fn read_decks(
    conn: &Connection,
    device: &DeviceId,
    deck_path: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<Deck>> {
    let reset_hour = read_global_settings(conn)?.daily_reset_hour;
    let cutoff = study_day_end(&now.with_timezone(&Local), reset_hour);
    let mut stmt = conn.prepare(
        "SELECT c.deck_path, COUNT(*),
            SUM(CASE WHEN cs.status IS NULL OR cs.status = 'new' THEN 1 ELSE 0 END),
            SUM(CASE WHEN cs.status != 'new' AND cs.due_date < ?3 THEN 1 ELSE 0 END)
         FROM cards c
         LEFT JOIN card_states cs ON cs.card_id = c.id AND cs.device_id = ?1
         WHERE c.deleted_at IS NULL AND (?2 IS NULL OR c.deck_path = ?2)
         GROUP BY c.deck_path
         ORDER BY c.deck_path",
    )?;
    let decks = stmt
        .query_map(
            params![device.as_str(), deck_path, timestamp(&cutoff)],
            |row| {
                let path: String = row.get(0)?;
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                Ok(Deck {
                    path,
                    name,
                    card_count: row.get(1)?,
                    new_count: row.get(2)?,
                    due_count: row.get(3)?,
                })
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(decks)
}

/// A review as the statistics see it.
struct LoggedReview {
    card_id: i64,
    day: NaiveDate,
    rating: u8,
}

/// The whole review log in chronological order, bucketed into study days.
fn read_review_log(conn: &Connection, reset_hour: u32) -> Result<Vec<LoggedReview>> {
    let mut stmt =
        conn.prepare("SELECT card_id, reviewed_at, rating FROM pending_reviews ORDER BY reviewed_at, id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u8>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(card_id, reviewed_at, rating)| {
            let at = parse_timestamp(&reviewed_at)?.with_timezone(&Local);
            Ok(LoggedReview {
                card_id,
                day: study_day(&at, reset_hour),
                rating,
            })
        })
        .collect()
}

fn reviews_per_day(log: &[LoggedReview]) -> BTreeMap<NaiveDate, usize> {
    let mut days = BTreeMap::new();
    for review in log {
        *days.entry(review.day).or_insert(0) += 1;
    }
    days
}

impl CardRepository for SqliteStore {
    fn get_card(&self, id: i64) -> Result<Option<Card>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM cards c WHERE c.id = ?1", CardRow::COLUMNS),
                params![id],
                CardRow::read,
            )
            .optional()?;
        row.map(CardRow::into_card).transpose()
    }

    fn list_cards(&self, deck_path: Option<&str>) -> Result<Vec<Card>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cards c
             WHERE c.deleted_at IS NULL AND (?1 IS NULL OR c.deck_path = ?1)
             ORDER BY c.source_file, c.id",
            CardRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![deck_path], CardRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        into_cards(rows)
    }

    fn upsert_cards(&self, cards: &[Card]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(&Utc::now());
        for card in cards {
            write_card(&tx, card, &now)?;
        }
        tx.commit()?;
        Ok(cards.len())
    }

    fn soft_delete(&self, ids: &[i64], at: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let at = timestamp(&at);
        let mut count = 0;
        for id in ids {
            count += tx.execute(
                "UPDATE cards SET deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![at, id],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    fn study_queue(
        &self,
        device: &DeviceId,
        deck_path: Option<&str>,
        settings: &EffectiveSettings,
        now: DateTime<Utc>,
    ) -> Result<StudyQueue> {
        let cutoff = study_day_end(&now.with_timezone(&Local), settings.daily_reset_hour);
        let conn = self.conn()?;

        let mut new_stmt = conn.prepare(&format!(
            "SELECT {} FROM cards c
             LEFT JOIN card_states cs ON cs.card_id = c.id AND cs.device_id = ?1
             WHERE c.deleted_at IS NULL
               AND (?2 IS NULL OR c.deck_path = ?2)
               AND (cs.status IS NULL OR cs.status = 'new')
             ORDER BY c.id
             LIMIT ?3",
            CardRow::COLUMNS
        ))?;
        let new_rows = new_stmt
            .query_map(
                params![device.as_str(), deck_path, settings.new_cards_per_day],
                CardRow::read,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut due_stmt = conn.prepare(&format!(
            "SELECT {} FROM cards c
             JOIN card_states cs ON cs.card_id = c.id AND cs.device_id = ?1
             WHERE c.deleted_at IS NULL
               AND (?2 IS NULL OR c.deck_path = ?2)
               AND cs.status != 'new'
               AND cs.due_date IS NOT NULL
               AND cs.due_date < ?3
             ORDER BY cs.due_date, c.id
             LIMIT ?4",
            CardRow::COLUMNS
        ))?;
        let due_rows = due_stmt
            .query_map(
                params![
                    device.as_str(),
                    deck_path,
                    timestamp(&cutoff),
                    settings.reviews_per_day
                ],
                CardRow::read,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StudyQueue {
            new_cards: into_cards(new_rows)?,
            due_cards: into_cards(due_rows)?,
        })
    }
}

impl StateRepository for SqliteStore {
    fn get_card_state(&self, card_id: i64, device: &DeviceId) -> Result<Option<CardState>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT status, interval_days, ease_factor, due_date, stability, difficulty, lapses, reviews_count
                 FROM card_states WHERE card_id = ?1 AND device_id = ?2",
                params![card_id, device.as_str()],
                |row| {
                    Ok(StateRow {
                        status: row.get(0)?,
                        interval_days: row.get(1)?,
                        ease_factor: row.get(2)?,
                        due_date: row.get(3)?,
                        stability: row.get(4)?,
                        difficulty: row.get(5)?,
                        lapses: row.get(6)?,
                        reviews_count: row.get(7)?,
                    })
                },
            )
            .optional()?;
        row.map(StateRow::into_state).transpose()
    }

    fn put_card_state(&self, card_id: i64, device: &DeviceId, state: &CardState) -> Result<()> {
        let conn = self.conn()?;
        write_state(&conn, card_id, device, state)
    }
}

impl ReviewRepository for SqliteStore {
    fn enqueue_pending_review(&self, device: &DeviceId, review: &Review) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let id = insert_review(&tx, device, review)?;
        increment_pending_changes(&tx)?;
        tx.commit()?;
        Ok(id)
    }

    fn record_review(&self, device: &DeviceId, review: &Review) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_state(&tx, review.card_id, device, &review.state_after)?;
        let id = insert_review(&tx, device, review)?;
        increment_pending_changes(&tx)?;
        tx.commit()?;
        Ok(id)
    }

    fn drain_pending_reviews(&self) -> Result<Vec<PendingReview>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pending_reviews WHERE synced = 0 ORDER BY id",
            ReviewRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map([], ReviewRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ReviewRow::into_pending).collect()
    }

    fn mark_reviews_synced(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE pending_reviews SET synced = 1 WHERE id IN ({placeholders})");
        let conn = self.conn()?;
        conn.execute(&sql, params_from_iter(ids.iter()))?;
        Ok(())
    }

    fn reviews_for_card(&self, card_id: i64) -> Result<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pending_reviews WHERE card_id = ?1 ORDER BY reviewed_at, id",
            ReviewRow::COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![card_id], ReviewRow::read)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|row| row.into_pending().map(|p| p.review))
            .collect()
    }
}

impl SettingsRepository for SqliteStore {
    fn get_global_settings(&self) -> Result<GlobalSettings> {
        let conn = self.conn()?;
        read_global_settings(&conn)
    }

    fn save_global_settings(&self, settings: &GlobalSettings) -> Result<()> {
        EffectiveSettings::merge(settings, None).validate()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        write_global_settings(&tx, settings, true)?;
        increment_pending_changes(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn get_deck_settings(&self, deck_path: &str) -> Result<Option<DeckSettings>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {DECK_SETTINGS_COLUMNS} FROM deck_settings WHERE deck_path = ?1"),
                params![deck_path],
                read_deck_settings_row,
            )
            .optional()?;
        row.map(into_deck_settings).transpose()
    }

    fn save_deck_settings(&self, settings: &DeckSettings) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let global = read_global_settings(&tx)?;
        EffectiveSettings::merge(&global, Some(settings)).validate()?;
        write_deck_settings(&tx, settings, true)?;
        increment_pending_changes(&tx)?;
        tx.commit()?;
        Ok(())
    }

    fn delete_deck_settings(&self, deck_path: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM deck_settings WHERE deck_path = ?1",
            params![deck_path],
        )?;
        if removed > 0 {
            // The pushed snapshot lists every deck, so the global row carries the edit.
            tx.execute("UPDATE global_settings SET dirty = 1 WHERE id = 1", [])?;
            increment_pending_changes(&tx)?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    fn dirty_settings(&self) -> Result<Option<SettingsSnapshot>> {
        let conn = self.conn()?;
        if !settings_dirty(&conn)? {
            return Ok(None);
        }
        Ok(Some(SettingsSnapshot {
            global: read_global_settings(&conn)?,
            decks: read_all_deck_settings(&conn)?,
        }))
    }

    fn mark_settings_synced(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("UPDATE global_settings SET dirty = 0 WHERE id = 1", [])?;
        tx.execute("UPDATE deck_settings SET dirty = 0", [])?;
        tx.commit()?;
        Ok(())
    }
}

impl DeckRepository for SqliteStore {
    fn list_decks(&self, device: &DeviceId, now: DateTime<Utc>) -> Result<Vec<Deck>> {
        let conn = self.conn()?;
        read_decks(&conn, device, None, now)
    }

    fn get_deck(&self, path: &str, device: &DeviceId, now: DateTime<Utc>) -> Result<Option<Deck>> {
        let conn = self.conn()?;
        Ok(read_decks(&conn, device, Some(path), now)?.into_iter().next())
    }
}

impl StatsRepository for SqliteStore {
    fn deck_stats(&self, device: &DeviceId, deck_path: Option<&str>) -> Result<DeckStats> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN cs.status IS NULL OR cs.status = 'new' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN cs.status IN ('learning', 'relearning') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN cs.status = 'review' THEN 1 ELSE 0 END), 0),
                COALESCE(AVG(cs.ease_factor), 2.5),
                COALESCE(AVG(CASE WHEN cs.interval_days > 0 THEN cs.interval_days END), 0.0)
             FROM cards c
             LEFT JOIN card_states cs ON cs.card_id = c.id AND cs.device_id = ?1
             WHERE c.deleted_at IS NULL AND (?2 IS NULL OR c.deck_path = ?2)",
            params![device.as_str(), deck_path],
            |row| {
                Ok(DeckStats {
                    total_cards: row.get(0)?,
                    new_cards: row.get(1)?,
                    learning_cards: row.get(2)?,
                    review_cards: row.get(3)?,
                    average_ease: row.get(4)?,
                    average_interval: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn study_stats(&self, now: DateTime<Utc>) -> Result<StudyStats> {
        let conn = self.conn()?;
        let reset_hour = read_global_settings(&conn)?.daily_reset_hour;
        let log = read_review_log(&conn, reset_hour)?;
        let today = study_day(&now.with_timezone(&Local), reset_hour);
        let days = reviews_per_day(&log);

        let mut first_seen = HashMap::new();
        for review in &log {
            first_seen.entry(review.card_id).or_insert(review.day);
        }
        let new_today = first_seen.values().filter(|day| **day == today).count();

        // Today may have no reviews yet without breaking the streak.
        let mut day = if days.contains_key(&today) {
            today
        } else {
            today - Duration::days(1)
        };
        let mut streak_days = 0;
        while days.contains_key(&day) {
            streak_days += 1;
            day -= Duration::days(1);
        }

        let passed = log
            .iter()
            .filter(|review| review.rating >= Rating::Good.to_value())
            .count();
        let retention_rate = if log.is_empty() {
            0.0
        } else {
            passed as f64 / log.len() as f64
        };

        Ok(StudyStats {
            reviews_today: days.get(&today).copied().unwrap_or(0),
            new_today,
            streak_days,
            retention_rate,
            total_reviews: log.len(),
        })
    }

    fn calendar(&self, now: DateTime<Utc>, days: usize) -> Result<Vec<CalendarDay>> {
        let conn = self.conn()?;
        let reset_hour = read_global_settings(&conn)?.daily_reset_hour;
        let counts = reviews_per_day(&read_review_log(&conn, reset_hour)?);
        let today = study_day(&now.with_timezone(&Local), reset_hour);

        Ok((0..days as i64)
            .rev()
            .map(|ago| {
                let date = today - Duration::days(ago);
                CalendarDay {
                    date,
                    reviews: counts.get(&date).copied().unwrap_or(0),
                }
            })
            .collect())
    }
}

impl SyncRepository for SqliteStore {
    fn get_sync_state(&self) -> Result<SyncState> {
        let conn = self.conn()?;
        let (last_sync_at, pending_changes): (Option<String>, u32) = conn.query_row(
            "SELECT last_sync_at, pending_changes FROM sync_state WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(SyncState {
            last_sync_at: parse_optional_timestamp(last_sync_at)?,
            pending_changes,
        })
    }

    fn complete_sync(&self, at: DateTime<Utc>) -> Result<SyncState> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let pending: u32 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM pending_reviews WHERE synced = 0)
                  + (SELECT COUNT(*) FROM global_settings WHERE dirty = 1)
                  + (SELECT COUNT(*) FROM deck_settings WHERE dirty = 1)",
            [],
            |row| row.get(0),
        )?;
        tx.execute(
            "UPDATE sync_state SET last_sync_at = ?1, pending_changes = ?2 WHERE id = 1",
            params![timestamp(&at), pending],
        )?;
        tx.commit()?;
        Ok(SyncState {
            last_sync_at: Some(at),
            pending_changes: pending,
        })
    }

    fn apply_pull(
        &self,
        device: &DeviceId,
        cards: &[Card],
        states: &[CardStateWithId],
        settings: Option<&SettingsSnapshot>,
    ) -> Result<AppliedPull> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(&Utc::now());
        let mut applied = AppliedPull::default();

        for card in cards {
            write_card(&tx, card, &now)?;
            applied.cards += 1;
        }

        for pulled in states {
            let queued: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM pending_reviews
                    WHERE card_id = ?1 AND device_id = ?2 AND synced = 0)",
                params![pulled.card_id, device.as_str()],
                |row| row.get(0),
            )?;
            if queued {
                applied.skipped_states += 1;
                continue;
            }
            write_state(&tx, pulled.card_id, device, &pulled.state)?;
            applied.states += 1;
        }

        if let Some(snapshot) = settings {
            if !settings_dirty(&tx)? {
                write_global_settings(&tx, &snapshot.global, false)?;
                tx.execute("DELETE FROM deck_settings", [])?;
                for deck in &snapshot.decks {
                    write_deck_settings(&tx, deck, false)?;
                }
            }
        }

        tx.commit()?;
        Ok(applied)
    }

    fn get_device(&self) -> Result<Option<LocalDevice>> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT device_id, token FROM local_device WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(device_id, token)| LocalDevice {
            device_id: DeviceId::new(device_id),
            token,
        }))
    }

    fn save_device(&self, device: &LocalDevice) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO local_device (id, device_id, token) VALUES (1, ?1, ?2)",
            params![device.device_id.as_str(), device.token],
        )?;
        Ok(())
    }
}
