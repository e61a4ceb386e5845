//! Sync reconciler: a per-device state machine that exchanges cards,
//! reviews and state with the identity authority one stage at a time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use recall_core::{parse_all, Card, DeviceId};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::files::{collect_markdown, hash_content, write_atomically, WatchedFile};
use crate::remote::{
    ConfirmDeleteRequest, Connector, OrphanInfo, PullRequest, PullResponse, PushReviewsRequest,
    RemoteAuthority, SyncFile, UploadRequest, UploadResponse,
};
use crate::store::LocalStore;

/// Sync stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Connecting,
    UploadingFiles,
    ParsingCards,
    ReceivingUpdates,
    PushingReviews,
    PullingState,
    ApplyingChanges,
    WritingFiles,
}

impl SyncStage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::UploadingFiles),
            Self::UploadingFiles => Some(Self::ParsingCards),
            Self::ParsingCards => Some(Self::ReceivingUpdates),
            Self::ReceivingUpdates => Some(Self::PushingReviews),
            Self::PushingReviews => Some(Self::PullingState),
            Self::PullingState => Some(Self::ApplyingChanges),
            Self::ApplyingChanges => Some(Self::WritingFiles),
            Self::WritingFiles => None,
        }
    }
}

/// Sync statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub files_uploaded: usize,
    pub cards_created: usize,
    pub cards_updated: usize,
    pub orphans_deleted: usize,
    pub reviews_synced: usize,
    pub states_pulled: usize,
}

/// Sync status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncStatus {
    Idle,
    Syncing {
        stage: SyncStage,
    },
    AwaitingOrphanConfirmation {
        orphans: Vec<OrphanInfo>,
    },
    Completed {
        synced_at: DateTime<Utc>,
        stats: SyncStats,
    },
    Failed {
        error: String,
    },
}

impl SyncStatus {
    /// A sync is in flight: running a stage or waiting for the user.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Syncing { .. } | Self::AwaitingOrphanConfirmation { .. }
        )
    }
}

/// A watched file whose content the authority changed.
struct Rewrite {
    path: String,
    absolute: PathBuf,
    original_hash: String,
    content: String,
}

/// Data carried between the stages of one sync.
struct SyncSession {
    endpoint: String,
    roots: Vec<PathBuf>,
    remote: Option<Arc<dyn RemoteAuthority>>,
    files: Vec<WatchedFile>,
    upload: Option<UploadResponse>,
    cards: Vec<Card>,
    rewrites: Vec<Rewrite>,
    pull: Option<PullResponse>,
    stats: SyncStats,
}

impl SyncSession {
    fn new(endpoint: &str, roots: Vec<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            roots,
            remote: None,
            files: Vec::new(),
            upload: None,
            cards: Vec::new(),
            rewrites: Vec::new(),
            pull: None,
            stats: SyncStats::default(),
        }
    }

    fn remote(&self) -> Result<Arc<dyn RemoteAuthority>, SyncError> {
        self.remote
            .clone()
            .ok_or_else(|| SyncError::Failed("not connected".to_string()))
    }
}

/// What a finished stage asks the state machine to do next.
enum Step {
    Continue(SyncStage),
    AwaitOrphans(Vec<OrphanInfo>),
    Done(DateTime<Utc>),
}

/// Reconciles one device's local store and watched files with the
/// identity authority.
pub struct SyncEngine<S> {
    store: Arc<S>,
    connector: Arc<dyn Connector>,
    device: DeviceId,
    status: Mutex<SyncStatus>,
    session: tokio::sync::Mutex<Option<SyncSession>>,
    cancel: AtomicBool,
}

impl<S: LocalStore> SyncEngine<S> {
    pub fn new(store: Arc<S>, connector: Arc<dyn Connector>, device: DeviceId) -> Self {
        Self {
            store,
            connector,
            device,
            status: Mutex::new(SyncStatus::Idle),
            session: tokio::sync::Mutex::new(None),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn get_sync_status(&self) -> SyncStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_status(&self, status: SyncStatus) -> SyncStatus {
        let mut current = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        *current = status.clone();
        status
    }

    /// Start a sync and run it until it completes, fails, is cancelled or
    /// stops for orphan confirmation.
    pub async fn start_sync(
        &self,
        endpoint: &str,
        watched_paths: &[PathBuf],
    ) -> Result<SyncStatus, SyncError> {
        self.begin_sync(endpoint, watched_paths)?;
        Ok(self.drive().await)
    }

    /// Start a sync without running any stage. Stages are then run with
    /// [`SyncEngine::run_sync_phase`].
    pub fn begin_sync(&self, endpoint: &str, watched_paths: &[PathBuf]) -> Result<(), SyncError> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| SyncError::AlreadyInProgress)?;
        {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            if status.is_active() {
                return Err(SyncError::AlreadyInProgress);
            }
            *status = SyncStatus::Syncing {
                stage: SyncStage::Connecting,
            };
        }
        self.cancel.store(false, Ordering::SeqCst);
        *session = Some(SyncSession::new(endpoint, watched_paths.to_vec()));
        info!(endpoint, device_id = %self.device, "sync started");
        Ok(())
    }

    async fn drive(&self) -> SyncStatus {
        loop {
            let status = self.run_sync_phase().await;
            if !matches!(status, SyncStatus::Syncing { .. }) {
                return status;
            }
        }
    }

    /// Run the current stage and return the resulting status.
    ///
    /// Outside of `Syncing` this only reports the status. A pending
    /// cancellation is honoured here, before the stage starts.
    pub async fn run_sync_phase(&self) -> SyncStatus {
        let mut guard = self.session.lock().await;
        let stage = match self.get_sync_status() {
            SyncStatus::Syncing { stage } => stage,
            other => return other,
        };
        let Some(session) = guard.as_mut() else {
            return self.set_status(SyncStatus::Idle);
        };

        if self.cancel.swap(false, Ordering::SeqCst) {
            *guard = None;
            info!(?stage, "sync cancelled");
            return self.set_status(SyncStatus::Idle);
        }

        debug!(?stage, "sync stage started");
        match self.run_stage(session, stage).await {
            Ok(Step::Continue(next)) => self.set_status(SyncStatus::Syncing { stage: next }),
            Ok(Step::AwaitOrphans(orphans)) => {
                info!(count = orphans.len(), "awaiting orphan confirmation");
                self.set_status(SyncStatus::AwaitingOrphanConfirmation { orphans })
            }
            Ok(Step::Done(synced_at)) => {
                let stats = session.stats.clone();
                *guard = None;
                info!(?stats, "sync completed");
                self.set_status(SyncStatus::Completed { synced_at, stats })
            }
            Err(e) => {
                *guard = None;
                error!(?stage, error = %e, "sync stage failed");
                self.set_status(SyncStatus::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Request cancellation. A running sync stops at the next stage
    /// boundary; a sync waiting for orphan confirmation ends at once.
    pub async fn cancel_sync(&self) -> SyncStatus {
        if let SyncStatus::Syncing { .. } = self.get_sync_status() {
            self.cancel.store(true, Ordering::SeqCst);
            return self.get_sync_status();
        }

        let mut guard = self.session.lock().await;
        match self.get_sync_status() {
            SyncStatus::AwaitingOrphanConfirmation { .. } => {
                *guard = None;
                info!("sync cancelled during orphan confirmation");
                self.set_status(SyncStatus::Idle)
            }
            SyncStatus::Syncing { .. } => {
                self.cancel.store(true, Ordering::SeqCst);
                self.get_sync_status()
            }
            other => other,
        }
    }

    /// Soft-delete the given orphans locally and on the authority, then
    /// continue the sync. Ids that were not reported as orphans are ignored.
    ///
    /// Returns the authority's deleted count once the sync completes. If a
    /// later stage fails the deletions stay applied and the stage error is
    /// returned.
    pub async fn confirm_orphan_deletion(&self, card_ids: &[i64]) -> Result<usize, SyncError> {
        let mut guard = self.session.lock().await;
        let orphans = match self.get_sync_status() {
            SyncStatus::AwaitingOrphanConfirmation { orphans } => orphans,
            _ => return Err(SyncError::NotAwaitingConfirmation),
        };
        let session = guard.as_mut().ok_or(SyncError::NotAwaitingConfirmation)?;

        let flagged: Vec<i64> = card_ids
            .iter()
            .copied()
            .filter(|id| orphans.iter().any(|o| o.card_id == *id))
            .collect();

        match self.delete_orphans(session, flagged).await {
            Ok(deleted) => {
                session.stats.orphans_deleted += deleted;
                self.set_status(SyncStatus::Syncing {
                    stage: SyncStage::PushingReviews,
                });
                drop(guard);
                match self.drive().await {
                    SyncStatus::Completed { .. } => Ok(deleted),
                    SyncStatus::Failed { error } => Err(SyncError::Failed(error)),
                    SyncStatus::Idle => Err(SyncError::Cancelled),
                    other => Err(SyncError::Failed(format!("unexpected sync status: {other:?}"))),
                }
            }
            Err(e) => {
                *guard = None;
                error!(error = %e, "orphan deletion failed");
                self.set_status(SyncStatus::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn delete_orphans(
        &self,
        session: &SyncSession,
        ids: Vec<i64>,
    ) -> Result<usize, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let remote = session.remote()?;
        let response = remote
            .confirm_delete(ConfirmDeleteRequest {
                card_ids: ids.clone(),
            })
            .await?;
        let local = self.store.soft_delete(&ids, Utc::now())?;
        info!(
            remote = response.deleted_count,
            local, "orphans soft-deleted"
        );
        Ok(response.deleted_count)
    }

    /// Keep the orphans and continue the sync. They are reported again on
    /// the next sync.
    pub async fn skip_orphan_deletion(&self) -> Result<SyncStats, SyncError> {
        {
            let guard = self.session.lock().await;
            if guard.is_none()
                || !matches!(
                    self.get_sync_status(),
                    SyncStatus::AwaitingOrphanConfirmation { .. }
                )
            {
                return Err(SyncError::NotAwaitingConfirmation);
            }
            self.set_status(SyncStatus::Syncing {
                stage: SyncStage::PushingReviews,
            });
        }
        info!("orphan deletion skipped");

        match self.drive().await {
            SyncStatus::Completed { stats, .. } => Ok(stats),
            SyncStatus::Failed { error } => Err(SyncError::Failed(error)),
            SyncStatus::Idle => Err(SyncError::Cancelled),
            other => Err(SyncError::Failed(format!("unexpected sync status: {other:?}"))),
        }
    }

    async fn run_stage(
        &self,
        session: &mut SyncSession,
        stage: SyncStage,
    ) -> Result<Step, SyncError> {
        match stage {
            SyncStage::Connecting => self.connect(session).await?,
            SyncStage::UploadingFiles => self.upload_files(session).await?,
            SyncStage::ParsingCards => self.parse_cards(session)?,
            SyncStage::ReceivingUpdates => {
                let orphans = self.receive_updates(session)?;
                if !orphans.is_empty() {
                    return Ok(Step::AwaitOrphans(orphans));
                }
            }
            SyncStage::PushingReviews => self.push_reviews(session).await?,
            SyncStage::PullingState => self.pull_state(session).await?,
            SyncStage::ApplyingChanges => self.apply_changes(session)?,
            SyncStage::WritingFiles => return self.write_files(session).map(Step::Done),
        }

        Ok(match stage.next() {
            Some(next) => Step::Continue(next),
            None => Step::Done(Utc::now()),
        })
    }

    async fn connect(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let remote = self.connector.connect(&session.endpoint)?;
        remote.health().await?;
        session.remote = Some(remote);
        Ok(())
    }

    async fn upload_files(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let files = collect_markdown(&session.roots)?;
        let mut pending = 0;
        for file in &files {
            let parsed = parse_all(&file.content);
            for warning in &parsed.warnings {
                warn!(path = %file.path, line = warning.line(), "{warning}");
            }
            pending += parsed.pending().count();
        }

        let request = UploadRequest {
            files: files
                .iter()
                .map(|f| SyncFile {
                    path: f.path.clone(),
                    content: f.content.clone(),
                    hash: hash_content(&f.content),
                })
                .collect(),
        };
        let response = session.remote()?.upload(request).await?;
        info!(
            files = files.len(),
            pending,
            new_ids = response.new_ids.len(),
            orphans = response.orphaned_cards.len(),
            "files uploaded"
        );

        session.stats.files_uploaded = files.len();
        session.files = files;
        session.upload = Some(response);
        Ok(())
    }

    fn parse_cards(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let upload = session
            .upload
            .as_ref()
            .ok_or_else(|| SyncError::Failed("no upload response".to_string()))?;

        let mut rewrites = Vec::new();
        for updated in &upload.updated_files {
            if hash_content(&updated.content) != updated.hash {
                return Err(SyncError::Parse(format!(
                    "hash mismatch for updated file {}",
                    updated.path
                )));
            }
            let file = session
                .files
                .iter()
                .find(|f| f.path == updated.path)
                .ok_or_else(|| SyncError::Parse(format!("unknown file {}", updated.path)))?;
            rewrites.push(Rewrite {
                path: updated.path.clone(),
                absolute: file.absolute.clone(),
                original_hash: hash_content(&file.content),
                content: updated.content.clone(),
            });
        }

        let mut cards = Vec::new();
        for file in &session.files {
            let content = rewrites
                .iter()
                .find(|r| r.path == file.path)
                .map_or(file.content.as_str(), |r| r.content.as_str());
            let parsed = parse_all(content);
            if let Some(record) = parsed.pending().next() {
                return Err(SyncError::Parse(format!(
                    "{}: record at line {} has no id after upload",
                    file.path, record.line_number
                )));
            }
            cards.extend(
                parsed
                    .records
                    .iter()
                    .filter_map(|r| r.id.map(|id| Card::from_record(id, r, &file.path))),
            );
        }

        let (mut created, mut updated) = (0, 0);
        for card in &cards {
            match self.store.get_card(card.id)? {
                None => created += 1,
                Some(existing) if existing != *card => updated += 1,
                Some(_) => {}
            }
        }
        session.stats.cards_created = created;
        session.stats.cards_updated = updated;
        session.cards = cards;
        session.rewrites = rewrites;
        Ok(())
    }

    fn receive_updates(&self, session: &mut SyncSession) -> Result<Vec<OrphanInfo>, SyncError> {
        let count = self.store.upsert_cards(&session.cards)?;
        debug!(count, "cards stored");
        Ok(session
            .upload
            .as_ref()
            .map(|u| u.orphaned_cards.clone())
            .unwrap_or_default())
    }

    async fn push_reviews(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let pending = self.store.drain_pending_reviews()?;
        let settings = self.store.dirty_settings()?;
        if pending.is_empty() && settings.is_none() {
            return Ok(());
        }

        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        let sent_settings = settings.is_some();
        let request = PushReviewsRequest {
            reviews: pending.into_iter().map(|p| p.review).collect(),
            settings,
        };
        let response = session.remote()?.push_reviews(request).await?;

        self.store.mark_reviews_synced(&ids)?;
        if sent_settings {
            self.store.mark_settings_synced()?;
        }
        session.stats.reviews_synced = response.synced_count;
        info!(reviews = response.synced_count, sent_settings, "reviews pushed");
        Ok(())
    }

    async fn pull_state(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let last_sync_at = self.store.get_sync_state()?.last_sync_at;
        let response = session
            .remote()?
            .pull(PullRequest { last_sync_at })
            .await?;
        debug!(
            cards = response.cards.len(),
            states = response.card_states.len(),
            "state pulled"
        );
        session.pull = Some(response);
        Ok(())
    }

    fn apply_changes(&self, session: &mut SyncSession) -> Result<(), SyncError> {
        let pull = session
            .pull
            .as_ref()
            .ok_or_else(|| SyncError::Failed("no pull response".to_string()))?;
        let applied = self.store.apply_pull(
            &self.device,
            &pull.cards,
            &pull.card_states,
            Some(&pull.settings),
        )?;
        if applied.skipped_states > 0 {
            debug!(
                skipped = applied.skipped_states,
                "kept local states with queued reviews"
            );
        }
        session.stats.states_pulled = applied.states;
        Ok(())
    }

    fn write_files(&self, session: &mut SyncSession) -> Result<DateTime<Utc>, SyncError> {
        let synced_at = session
            .pull
            .as_ref()
            .map(|p| p.server_time)
            .ok_or_else(|| SyncError::Failed("no pull response".to_string()))?;

        let mut writes = Vec::with_capacity(session.rewrites.len());
        for rewrite in &session.rewrites {
            let current = std::fs::read_to_string(&rewrite.absolute)?;
            if hash_content(&current) != rewrite.original_hash {
                warn!(path = %rewrite.path, "file changed during sync, ids will be assigned next sync");
                continue;
            }
            writes.push((rewrite.absolute.clone(), rewrite.content.clone()));
        }
        write_atomically(&writes)?;

        let state = self.store.complete_sync(synced_at)?;
        info!(
            files_written = writes.len(),
            pending_changes = state.pending_changes,
            "local files updated"
        );
        Ok(synced_at)
    }
}
