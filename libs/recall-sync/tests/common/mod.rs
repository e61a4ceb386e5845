//! Common test utilities and fixtures for integration tests.
//!
//! This module provides shared test infrastructure including:
//! - TestContext wiring an in-memory store, an in-process authority and a
//!   temporary directory of watched markdown files
//! - TestRemote, an authority wrapper that can fail or pause on demand

#![allow(dead_code)]

pub mod fixtures;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use recall_core::DeviceId;
use recall_sync::remote::{
    ConfirmDeleteRequest, ConfirmDeleteResponse, PullRequest, PullResponse, PushReviewsRequest,
    PushReviewsResponse, UploadRequest, UploadResponse,
};
use recall_sync::{
    AuthorityClient, Connector, IdentityAuthority, RemoteAuthority, SqliteStore, StudyService,
    SyncEngine, SyncError,
};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const ENDPOINT: &str = "local://authority";

/// Remote operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Health,
    Upload,
    PushReviews,
    Pull,
    ConfirmDelete,
}

/// Pauses an upload until released.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Authority client with failure injection.
#[derive(Clone)]
pub struct TestRemote {
    inner: AuthorityClient,
    fail_on: Arc<Mutex<Option<Op>>>,
    upload_gate: Arc<Mutex<Option<Arc<Gate>>>>,
}

impl TestRemote {
    pub fn new(inner: AuthorityClient) -> Self {
        Self {
            inner,
            fail_on: Arc::new(Mutex::new(None)),
            upload_gate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn fail_on(&self, op: Option<Op>) {
        *self.fail_on.lock().unwrap() = op;
    }

    pub fn gate_upload(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.upload_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn check(&self, op: Op) -> Result<(), SyncError> {
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(SyncError::Network(format!("injected failure on {op:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAuthority for TestRemote {
    async fn health(&self) -> Result<(), SyncError> {
        self.check(Op::Health)?;
        self.inner.health().await
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, SyncError> {
        self.check(Op::Upload)?;
        let response = self.inner.upload(request).await;
        let gate = self.upload_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        response
    }

    async fn push_reviews(
        &self,
        request: PushReviewsRequest,
    ) -> Result<PushReviewsResponse, SyncError> {
        self.check(Op::PushReviews)?;
        self.inner.push_reviews(request).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError> {
        self.check(Op::Pull)?;
        self.inner.pull(request).await
    }

    async fn confirm_delete(
        &self,
        request: ConfirmDeleteRequest,
    ) -> Result<ConfirmDeleteResponse, SyncError> {
        self.check(Op::ConfirmDelete)?;
        self.inner.confirm_delete(request).await
    }
}

impl Connector for TestRemote {
    fn connect(&self, _endpoint: &str) -> Result<Arc<dyn RemoteAuthority>, SyncError> {
        Ok(Arc::new(self.clone()))
    }
}

/// One device syncing a directory of markdown files with an authority.
pub struct TestContext {
    pub dir: TempDir,
    pub authority: Arc<IdentityAuthority>,
    pub device: DeviceId,
    pub store: Arc<SqliteStore>,
    pub remote: TestRemote,
    pub engine: Arc<SyncEngine<SqliteStore>>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_authority(Arc::new(IdentityAuthority::new()))
    }

    pub fn with_authority(authority: Arc<IdentityAuthority>) -> Self {
        let device = authority.register_device("test device").device_id;
        Self::for_device(authority, device)
    }

    /// A fresh store and directory for an already registered device.
    pub fn for_device(authority: Arc<IdentityAuthority>, device: DeviceId) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let remote = TestRemote::new(AuthorityClient::new(Arc::clone(&authority), device.clone()));
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::new(remote.clone()),
            device.clone(),
        ));
        Self {
            dir,
            authority,
            device,
            store,
            remote,
            engine,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        vec![self.root().to_path_buf()]
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.root().join(relative)).unwrap()
    }

    pub fn study(&self) -> StudyService<SqliteStore> {
        StudyService::new(Arc::clone(&self.store), self.device.clone())
    }
}
