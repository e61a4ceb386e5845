//! Remote identity authority: wire types and the client seam.

mod http;

pub use http::{ensure_registered, HttpConnector, HttpRemote};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::{Card, DeviceId, Review};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::store::{CardStateWithId, SettingsSnapshot};

/// File content sent for id assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFile {
    pub path: String,
    pub content: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<SyncFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Files whose content changed because ids were inserted.
    pub updated_files: Vec<UpdatedFile>,
    pub new_ids: Vec<NewIdAssignment>,
    pub orphaned_cards: Vec<OrphanInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedFile {
    pub path: String,
    pub content: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIdAssignment {
    pub path: String,
    /// 1-based line of the record start in the uploaded content.
    pub line: usize,
    pub id: i64,
}

/// A previously known card missing from every uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanInfo {
    pub card_id: i64,
    pub question_preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushReviewsRequest {
    pub reviews: Vec<Review>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReviewsResponse {
    pub synced_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Includes soft-deleted cards so deletions propagate.
    pub cards: Vec<Card>,
    pub card_states: Vec<CardStateWithId>,
    pub settings: SettingsSnapshot,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmDeleteRequest {
    pub card_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDeleteResponse {
    pub deleted_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegisterRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegisterResponse {
    pub device_id: DeviceId,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    pub device_id: DeviceId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub card_count: usize,
    pub review_count: usize,
}

/// Operations the reconciler needs from the identity authority, scoped to
/// one authenticated device.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    async fn health(&self) -> Result<(), SyncError>;
    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, SyncError>;
    async fn push_reviews(
        &self,
        request: PushReviewsRequest,
    ) -> Result<PushReviewsResponse, SyncError>;
    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError>;
    async fn confirm_delete(
        &self,
        request: ConfirmDeleteRequest,
    ) -> Result<ConfirmDeleteResponse, SyncError>;
}

/// Opens a session to the authority at an endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteAuthority>, SyncError>;
}
