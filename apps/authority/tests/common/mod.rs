//! Common test utilities and fixtures for integration tests.
//!
//! TestContext hosts the authority router over an in-process
//! IdentityAuthority, so no external services are needed.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use axum::Router;
use recall_authority::{router, AppState};
use recall_core::DeviceId;
use recall_sync::IdentityAuthority;

/// Test context holding the authority and the router built on it.
pub struct TestContext {
    pub authority: Arc<IdentityAuthority>,
    app: Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_authority(IdentityAuthority::new())
    }

    pub fn with_authority(authority: IdentityAuthority) -> Self {
        let authority = Arc::new(authority);
        let app = router(AppState::new(Arc::clone(&authority)));
        Self { authority, app }
    }

    /// Get the router for use with axum-test.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    /// Create a test device and return its ID and token.
    pub fn create_test_device(&self, name: &str) -> (DeviceId, String) {
        let device = self.authority.register_device(name);
        (device.device_id, device.token)
    }

    /// Format authorization header value.
    pub fn auth_header_value(token: &str) -> String {
        format!("Bearer {}", token)
    }
}
