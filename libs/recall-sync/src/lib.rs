//! Local-first storage and synchronisation for recall.
//!
//! Provides:
//! - SQLite local store (cards, per-device state, review queue, settings)
//! - Study service that grades answers and queues reviews
//! - Identity authority (in-process) and an HTTP client for a remote one
//! - Sync reconciler state machine

pub mod authority;
pub mod error;
pub mod files;
pub mod reconciler;
pub mod remote;
pub mod store;
pub mod study;

pub use authority::{AuthorityClient, IdentityAuthority};
pub use error::{AuthorityError, StoreError, StudyError, SyncError};
pub use files::{collect_markdown, hash_content, write_atomically, WatchedFile};
pub use reconciler::{SyncEngine, SyncStage, SyncStats, SyncStatus};
pub use remote::{ensure_registered, Connector, HttpConnector, HttpRemote, RemoteAuthority};
pub use store::{
    CardRepository, DeckRepository, LocalStore, ReviewRepository, SettingsRepository,
    SqliteStore, StateRepository, StatsRepository, SyncRepository,
};
pub use study::{StudyService, StudySession};
