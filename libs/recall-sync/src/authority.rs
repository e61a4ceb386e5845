//! In-process identity authority.
//!
//! Owns the single card id sequence, tracks which cards each device has
//! uploaded, flags orphans, stores append-only reviews and keeps the
//! last-written card state per (card, device).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::{inject_ids, parse_all, Card, CardRecord, CardState, DeviceId, Review};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuthorityError, SyncError};
use crate::files::hash_content;
use crate::remote::{
    ConfirmDeleteRequest, ConfirmDeleteResponse, Connector, DeviceRegisterResponse,
    DeviceStatusResponse, NewIdAssignment, OrphanInfo, PullRequest, PullResponse,
    PushReviewsRequest, PushReviewsResponse, RemoteAuthority, UpdatedFile, UploadRequest,
    UploadResponse,
};
use crate::store::{CardStateWithId, SettingsSnapshot};

type Result<T> = std::result::Result<T, AuthorityError>;

/// Length of the question preview reported for orphans.
pub const ORPHAN_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeviceRecord {
    name: String,
    token: String,
    created_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCard {
    card: Card,
    seen_by: BTreeSet<DeviceId>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredState {
    state: CardState,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredReview {
    device_id: DeviceId,
    review: Review,
}

/// Outcome of one file upload, kept so that re-sending the same content
/// replays it instead of minting new ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileOutcome {
    hash: String,
    new_ids: Vec<NewIdAssignment>,
    updated: Option<UpdatedFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeviceCards {
    present: BTreeSet<i64>,
    orphaned: BTreeSet<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthorityData {
    last_id: i64,
    devices: BTreeMap<DeviceId, DeviceRecord>,
    cards: BTreeMap<i64, StoredCard>,
    states: BTreeMap<DeviceId, BTreeMap<i64, StoredState>>,
    reviews: Vec<StoredReview>,
    settings: BTreeMap<DeviceId, SettingsSnapshot>,
    uploads: BTreeMap<DeviceId, BTreeMap<String, FileOutcome>>,
    device_cards: BTreeMap<DeviceId, DeviceCards>,
}

/// A file being processed by one upload, before anything is committed.
struct PlannedFile {
    path: String,
    outcome: FileOutcome,
    records: Vec<(i64, CardRecord)>,
    replayed: bool,
}

/// Identity authority shared by all devices.
#[derive(Debug, Default)]
pub struct IdentityAuthority {
    data: Mutex<AuthorityData>,
}

impl IdentityAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the id sequence after `last_id`.
    pub fn with_last_id(last_id: i64) -> Self {
        Self {
            data: Mutex::new(AuthorityData {
                last_id,
                ..AuthorityData::default()
            }),
        }
    }

    fn data(&self) -> MutexGuard<'_, AuthorityData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest id handed out or seen so far.
    pub fn last_id(&self) -> i64 {
        self.data().last_id
    }

    pub fn register_device(&self, name: &str) -> DeviceRegisterResponse {
        let device_id = DeviceId::new(Uuid::new_v4().to_string());
        let token = Uuid::new_v4().simple().to_string();
        self.data().devices.insert(
            device_id.clone(),
            DeviceRecord {
                name: name.to_string(),
                token: token.clone(),
                created_at: Utc::now(),
                last_seen_at: None,
            },
        );
        info!(device_id = %device_id, name, "device registered");
        DeviceRegisterResponse { device_id, token }
    }

    /// Resolve a bearer token to its device.
    pub fn authenticate(&self, token: &str) -> Result<DeviceId> {
        let mut data = self.data();
        let (device_id, record) = data
            .devices
            .iter_mut()
            .find(|(_, record)| record.token == token)
            .ok_or_else(|| AuthorityError::UnknownDevice("invalid token".to_string()))?;
        record.last_seen_at = Some(Utc::now());
        Ok(device_id.clone())
    }

    pub fn device_status(&self, device: &DeviceId) -> Result<DeviceStatusResponse> {
        let data = self.data();
        let record = known_device(&data, device)?;
        let card_count = data
            .device_cards
            .get(device)
            .map(|c| c.present.len())
            .unwrap_or(0);
        let review_count = data
            .reviews
            .iter()
            .filter(|r| &r.device_id == device)
            .count();
        Ok(DeviceStatusResponse {
            device_id: device.clone(),
            name: record.name.clone(),
            created_at: record.created_at,
            last_seen_at: record.last_seen_at,
            card_count,
            review_count,
        })
    }

    /// Assign ids to pending records, store the uploaded cards and report
    /// orphans for this device.
    ///
    /// Nothing is committed unless every file verifies and every id can be
    /// assigned.
    pub fn upload(&self, device: &DeviceId, request: &UploadRequest) -> Result<UploadResponse> {
        let mut data = self.data();
        known_device(&data, device)?;

        for file in &request.files {
            if hash_content(&file.content) != file.hash {
                return Err(AuthorityError::HashMismatch(file.path.clone()));
            }
        }

        let cached = data.uploads.get(device);
        let mut planned = Vec::with_capacity(request.files.len());
        let mut pending_total: i64 = 0;
        let mut highest = data.last_id;

        for file in &request.files {
            let parsed = parse_all(&file.content);
            for warning in &parsed.warnings {
                warn!(path = %file.path, line = warning.line(), "{warning}");
            }

            if let Some(outcome) = cached
                .and_then(|c| c.get(&file.path))
                .filter(|o| o.hash == file.hash)
                .filter(|o| {
                    !o.new_ids
                        .iter()
                        .any(|a| data.cards.get(&a.id).is_some_and(|c| c.card.is_deleted()))
                })
            {
                let assigned: BTreeMap<usize, i64> =
                    outcome.new_ids.iter().map(|a| (a.line, a.id)).collect();
                let records = parsed
                    .records
                    .into_iter()
                    .filter_map(|r| {
                        let id = r.id.or_else(|| assigned.get(&r.line_number).copied())?;
                        Some((id, r))
                    })
                    .collect();
                planned.push(PlannedFile {
                    path: file.path.clone(),
                    outcome: outcome.clone(),
                    records,
                    replayed: true,
                });
                continue;
            }

            for id in parsed.identified().filter_map(|r| r.id) {
                highest = highest.max(id);
            }
            let pending = parsed.pending().count();
            pending_total = pending_total
                .checked_add(i64::try_from(pending).map_err(|_| AuthorityError::IdentityExhausted)?)
                .ok_or(AuthorityError::IdentityExhausted)?;

            planned.push(PlannedFile {
                path: file.path.clone(),
                outcome: FileOutcome {
                    hash: file.hash.clone(),
                    new_ids: Vec::new(),
                    updated: None,
                },
                records: parsed.records.into_iter().map(|r| (0, r)).collect(),
                replayed: false,
            });
        }

        let last_id = highest
            .checked_add(pending_total)
            .ok_or(AuthorityError::IdentityExhausted)?;

        let mut next = highest;
        for (plan, file) in planned.iter_mut().zip(&request.files) {
            if plan.replayed {
                continue;
            }
            let mut assignments = Vec::new();
            for (id, record) in plan.records.iter_mut() {
                *id = match record.id {
                    Some(existing) => existing,
                    None => {
                        next += 1;
                        assignments.push((record.line_number, next));
                        plan.outcome.new_ids.push(NewIdAssignment {
                            path: plan.path.clone(),
                            line: record.line_number,
                            id: next,
                        });
                        next
                    }
                };
            }
            if !assignments.is_empty() {
                let content = inject_ids(&file.content, &assignments);
                plan.outcome.updated = Some(UpdatedFile {
                    path: plan.path.clone(),
                    hash: hash_content(&content),
                    content,
                });
            }
        }

        // Commit.
        let now = Utc::now();
        data.last_id = last_id;

        let mut current = BTreeSet::new();
        for plan in &planned {
            for (id, record) in &plan.records {
                current.insert(*id);
                upsert_card(&mut *data, device, Card::from_record(*id, record, &plan.path), now);
            }
        }

        let previous = data.device_cards.remove(device).unwrap_or_default();
        let orphaned: BTreeSet<i64> = previous
            .present
            .union(&previous.orphaned)
            .copied()
            .filter(|id| !current.contains(id))
            .filter(|id| data.cards.get(id).is_some_and(|c| !c.card.is_deleted()))
            .collect();

        let orphaned_cards = orphaned
            .iter()
            .filter_map(|id| data.cards.get(id))
            .map(|stored| OrphanInfo {
                card_id: stored.card.id,
                question_preview: stored.card.question.chars().take(ORPHAN_PREVIEW_CHARS).collect(),
            })
            .collect();

        let mut response = UploadResponse {
            orphaned_cards,
            ..UploadResponse::default()
        };
        let uploads = data.uploads.entry(device.clone()).or_default();
        uploads.retain(|path, _| request.files.iter().any(|f| &f.path == path));
        for plan in planned {
            response.new_ids.extend(plan.outcome.new_ids.iter().cloned());
            response.updated_files.extend(plan.outcome.updated.clone());
            uploads.insert(plan.path, plan.outcome);
        }
        data.device_cards.insert(
            device.clone(),
            DeviceCards {
                present: current,
                orphaned,
            },
        );

        info!(
            device_id = %device,
            files = request.files.len(),
            new_ids = response.new_ids.len(),
            orphans = response.orphaned_cards.len(),
            "upload processed"
        );
        Ok(response)
    }

    /// Append reviews and apply their resulting states, last write wins.
    pub fn push_reviews(
        &self,
        device: &DeviceId,
        request: PushReviewsRequest,
    ) -> Result<PushReviewsResponse> {
        let mut data = self.data();
        known_device(&data, device)?;
        let now = Utc::now();
        let synced_count = request.reviews.len();

        for review in request.reviews {
            data.states.entry(device.clone()).or_default().insert(
                review.card_id,
                StoredState {
                    state: review.state_after.clone(),
                    updated_at: now,
                },
            );
            data.reviews.push(StoredReview {
                device_id: device.clone(),
                review,
            });
        }

        if let Some(settings) = request.settings {
            data.settings.insert(device.clone(), settings);
        }

        debug!(device_id = %device, synced_count, "reviews pushed");
        Ok(PushReviewsResponse { synced_count })
    }

    /// Cards, states and settings changed since the request's timestamp.
    pub fn pull(&self, device: &DeviceId, request: &PullRequest) -> Result<PullResponse> {
        let data = self.data();
        known_device(&data, device)?;
        let changed = |at: &DateTime<Utc>| request.last_sync_at.map_or(true, |since| *at >= since);

        let cards = data
            .cards
            .values()
            .filter(|stored| stored.seen_by.contains(device) && changed(&stored.updated_at))
            .map(|stored| stored.card.clone())
            .collect();

        let card_states = data
            .states
            .get(device)
            .into_iter()
            .flatten()
            .filter(|(_, stored)| changed(&stored.updated_at))
            .map(|(card_id, stored)| CardStateWithId {
                card_id: *card_id,
                state: stored.state.clone(),
            })
            .collect();

        Ok(PullResponse {
            cards,
            card_states,
            settings: data.settings.get(device).cloned().unwrap_or_default(),
            server_time: Utc::now(),
        })
    }

    /// Soft-delete confirmed orphans. Ids not currently flagged as orphans
    /// for this device are ignored.
    pub fn confirm_delete(
        &self,
        device: &DeviceId,
        request: &ConfirmDeleteRequest,
    ) -> Result<ConfirmDeleteResponse> {
        let mut data = self.data();
        known_device(&data, device)?;
        let now = Utc::now();

        let flagged = data
            .device_cards
            .get(device)
            .map(|c| c.orphaned.clone())
            .unwrap_or_default();

        let mut deleted = BTreeSet::new();
        for id in request.card_ids.iter().filter(|id| flagged.contains(*id)) {
            if let Some(stored) = data.cards.get_mut(id) {
                if stored.card.deleted_at.is_none() {
                    stored.card.deleted_at = Some(now);
                    stored.updated_at = now;
                    deleted.insert(*id);
                }
            }
            if let Some(cards) = data.device_cards.get_mut(device) {
                cards.orphaned.remove(id);
            }
        }

        // A replayed outcome must never hand a deleted id to a new record.
        for uploads in data.uploads.values_mut() {
            uploads.retain(|_, outcome| !outcome.new_ids.iter().any(|a| deleted.contains(&a.id)));
        }

        let deleted_count = deleted.len();

        info!(device_id = %device, deleted_count, "orphans deleted");
        Ok(ConfirmDeleteResponse { deleted_count })
    }

    /// Every review received for a card, in arrival order.
    pub fn reviews_for_card(&self, card_id: i64) -> Vec<Review> {
        self.data()
            .reviews
            .iter()
            .filter(|r| r.review.card_id == card_id)
            .map(|r| r.review.clone())
            .collect()
    }

    pub fn card(&self, id: i64) -> Option<Card> {
        self.data().cards.get(&id).map(|stored| stored.card.clone())
    }

    pub fn card_state(&self, device: &DeviceId, card_id: i64) -> Option<CardState> {
        self.data()
            .states
            .get(device)
            .and_then(|states| states.get(&card_id))
            .map(|stored| stored.state.clone())
    }

    /// Load a snapshot written by [`IdentityAuthority::save_snapshot`], or
    /// start empty when the file does not exist.
    pub fn load_snapshot(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|e| AuthorityError::Snapshot(e.to_string()))?;
        let data: AuthorityData =
            serde_json::from_str(&content).map_err(|e| AuthorityError::Snapshot(e.to_string()))?;
        info!(path = %path.display(), last_id = data.last_id, "authority snapshot loaded");
        Ok(Self {
            data: Mutex::new(data),
        })
    }

    /// Write the whole authority state to `path`, replacing it atomically.
    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        let json = {
            let data = self.data();
            serde_json::to_vec(&*data).map_err(|e| AuthorityError::Snapshot(e.to_string()))?
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp =
            NamedTempFile::new_in(dir).map_err(|e| AuthorityError::Snapshot(e.to_string()))?;
        temp.write_all(&json)
            .map_err(|e| AuthorityError::Snapshot(e.to_string()))?;
        temp.persist(path)
            .map_err(|e| AuthorityError::Snapshot(e.to_string()))?;
        Ok(())
    }
}

fn known_device<'a>(data: &'a AuthorityData, device: &DeviceId) -> Result<&'a DeviceRecord> {
    data.devices
        .get(device)
        .ok_or_else(|| AuthorityError::UnknownDevice(device.to_string()))
}

fn upsert_card(data: &mut AuthorityData, device: &DeviceId, card: Card, now: DateTime<Utc>) {
    match data.cards.get_mut(&card.id) {
        Some(stored) => {
            let changed = stored.card != card;
            if stored.card.is_deleted() {
                debug!(card_id = card.id, "card revived");
            }
            let newly_seen = stored.seen_by.insert(device.clone());
            if changed || newly_seen {
                stored.card = card;
                stored.updated_at = now;
            }
        }
        None => {
            data.cards.insert(
                card.id,
                StoredCard {
                    card,
                    seen_by: BTreeSet::from([device.clone()]),
                    updated_at: now,
                },
            );
        }
    }
}

/// Authority handle scoped to one device, usable as the reconciler's
/// remote without a network hop.
#[derive(Clone)]
pub struct AuthorityClient {
    authority: Arc<IdentityAuthority>,
    device: DeviceId,
}

impl AuthorityClient {
    pub fn new(authority: Arc<IdentityAuthority>, device: DeviceId) -> Self {
        Self { authority, device }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }
}

#[async_trait]
impl RemoteAuthority for AuthorityClient {
    async fn health(&self) -> std::result::Result<(), SyncError> {
        Ok(())
    }

    async fn upload(&self, request: UploadRequest) -> std::result::Result<UploadResponse, SyncError> {
        Ok(self.authority.upload(&self.device, &request)?)
    }

    async fn push_reviews(
        &self,
        request: PushReviewsRequest,
    ) -> std::result::Result<PushReviewsResponse, SyncError> {
        Ok(self.authority.push_reviews(&self.device, request)?)
    }

    async fn pull(&self, request: PullRequest) -> std::result::Result<PullResponse, SyncError> {
        Ok(self.authority.pull(&self.device, &request)?)
    }

    async fn confirm_delete(
        &self,
        request: ConfirmDeleteRequest,
    ) -> std::result::Result<ConfirmDeleteResponse, SyncError> {
        Ok(self.authority.confirm_delete(&self.device, &request)?)
    }
}

/// Connects every endpoint to the same in-process authority.
impl Connector for AuthorityClient {
    fn connect(&self, _endpoint: &str) -> std::result::Result<Arc<dyn RemoteAuthority>, SyncError> {
        Ok(Arc::new(self.clone()))
    }
}
