//! SQLite schema definitions.

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema for the local SQLite database.
///
/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison orders them chronologically.
pub const SCHEMA: &str = r#"
-- Local device identity
CREATE TABLE IF NOT EXISTS local_device (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    device_id TEXT NOT NULL,
    token TEXT NOT NULL
);

-- Cards mirrored from watched files and the authority
CREATE TABLE IF NOT EXISTS cards (
    id INTEGER PRIMARY KEY,
    deck_path TEXT NOT NULL,
    question_text TEXT NOT NULL,
    answer_text TEXT NOT NULL,
    source_file TEXT NOT NULL,
    deleted_at TEXT,
    updated_at TEXT NOT NULL
);

-- Card learning state, one row per (card, device)
CREATE TABLE IF NOT EXISTS card_states (
    card_id INTEGER NOT NULL REFERENCES cards(id),
    device_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    interval_days REAL NOT NULL DEFAULT 0,
    ease_factor REAL NOT NULL DEFAULT 2.5,
    due_date TEXT,
    stability REAL,
    difficulty REAL,
    lapses INTEGER NOT NULL DEFAULT 0,
    reviews_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (card_id, device_id)
);

-- Review log; rows with synced = 0 form the offline queue
CREATE TABLE IF NOT EXISTS pending_reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    card_id INTEGER NOT NULL REFERENCES cards(id),
    device_id TEXT NOT NULL,
    reviewed_at TEXT NOT NULL,
    rating INTEGER NOT NULL,
    rating_scale TEXT NOT NULL,
    answer_mode TEXT NOT NULL,
    typed_answer TEXT,
    was_correct INTEGER,
    time_taken_ms INTEGER,
    interval_before REAL NOT NULL,
    interval_after REAL NOT NULL,
    ease_before REAL NOT NULL,
    ease_after REAL NOT NULL,
    algorithm TEXT NOT NULL,
    state_after TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

-- Deck settings overrides
CREATE TABLE IF NOT EXISTS deck_settings (
    deck_path TEXT PRIMARY KEY,
    algorithm TEXT,
    rating_scale TEXT,
    matching_mode TEXT,
    fuzzy_threshold REAL,
    new_cards_per_day INTEGER,
    reviews_per_day INTEGER,
    dirty INTEGER NOT NULL DEFAULT 0
);

-- Global settings
CREATE TABLE IF NOT EXISTS global_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    algorithm TEXT NOT NULL DEFAULT 'sm2',
    rating_scale TEXT NOT NULL DEFAULT '4point',
    matching_mode TEXT NOT NULL DEFAULT 'fuzzy',
    fuzzy_threshold REAL NOT NULL DEFAULT 0.8,
    new_cards_per_day INTEGER NOT NULL DEFAULT 20,
    reviews_per_day INTEGER NOT NULL DEFAULT 200,
    daily_reset_hour INTEGER NOT NULL DEFAULT 0,
    dirty INTEGER NOT NULL DEFAULT 0
);

-- Sync metadata
CREATE TABLE IF NOT EXISTS sync_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_sync_at TEXT,
    pending_changes INTEGER NOT NULL DEFAULT 0
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards(deck_path);
CREATE INDEX IF NOT EXISTS idx_cards_deleted ON cards(deleted_at);
CREATE INDEX IF NOT EXISTS idx_card_states_due ON card_states(device_id, due_date);
CREATE INDEX IF NOT EXISTS idx_pending_reviews_synced ON pending_reviews(synced);
CREATE INDEX IF NOT EXISTS idx_pending_reviews_card ON pending_reviews(card_id);
"#;

/// Seed singleton rows.
pub const INIT_ROWS: &str = r#"
INSERT OR IGNORE INTO global_settings (id) VALUES (1);
INSERT OR IGNORE INTO sync_state (id, pending_changes) VALUES (1, 0);
"#;
