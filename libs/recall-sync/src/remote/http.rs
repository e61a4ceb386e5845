//! HTTP client for the authority server.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    ConfirmDeleteRequest, ConfirmDeleteResponse, Connector, DeviceRegisterRequest,
    DeviceRegisterResponse, DeviceStatusResponse, PullRequest, PullResponse, PushReviewsRequest,
    PushReviewsResponse, RemoteAuthority, UploadRequest, UploadResponse,
};
use crate::error::SyncError;
use crate::store::{LocalDevice, SyncRepository};

/// Error body returned by the authority.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

/// Authenticated client for one device.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpRemote {
    pub fn new(client: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Register a new device and return its identity.
    pub async fn register(
        client: &Client,
        base_url: &str,
        name: &str,
    ) -> Result<DeviceRegisterResponse, SyncError> {
        let url = format!("{}/api/device/register", base_url.trim_end_matches('/'));
        let resp = client
            .post(&url)
            .json(&DeviceRegisterRequest {
                name: name.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn device_status(&self) -> Result<DeviceStatusResponse, SyncError> {
        let resp = self
            .client
            .get(self.url("/api/device/status"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, SyncError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        debug!(path, "authority request");
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SyncError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json()
            .await
            .map_err(|e| SyncError::Parse(e.to_string()));
    }

    let text = resp.text().await.unwrap_or_default();
    Err(error_from_body(status.as_u16(), &text))
}

fn error_from_body(status: u16, text: &str) -> SyncError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) if body.error == "identity_exhausted" => SyncError::IdentityExhausted,
        Ok(_) if status == 401 => SyncError::NotAuthenticated,
        Ok(body) => SyncError::Backend {
            status,
            message: body.message,
        },
        Err(_) => SyncError::Backend {
            status,
            message: text.to_string(),
        },
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn health(&self) -> Result<(), SyncError> {
        let resp = self.client.get(self.url("/health")).send().await?;
        if !resp.status().is_success() {
            return Err(SyncError::Network(format!(
                "health check returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, SyncError> {
        self.post("/api/sync/upload", &request).await
    }

    async fn push_reviews(
        &self,
        request: PushReviewsRequest,
    ) -> Result<PushReviewsResponse, SyncError> {
        self.post("/api/sync/push-reviews", &request).await
    }

    async fn pull(&self, request: PullRequest) -> Result<PullResponse, SyncError> {
        self.post("/api/sync/pull", &request).await
    }

    async fn confirm_delete(
        &self,
        request: ConfirmDeleteRequest,
    ) -> Result<ConfirmDeleteResponse, SyncError> {
        self.post("/api/sync/confirm-delete", &request).await
    }
}

/// Connects to an authority over HTTP with a stored device token.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    token: String,
}

impl HttpConnector {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), token)
    }

    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }
}

impl Connector for HttpConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn RemoteAuthority>, SyncError> {
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(SyncError::Network(format!(
                "unsupported endpoint: {endpoint}"
            )));
        }
        Ok(Arc::new(HttpRemote::new(
            self.client.clone(),
            endpoint,
            self.token.clone(),
        )))
    }
}

/// Return the stored device identity, registering with the authority first
/// if this store has none.
pub async fn ensure_registered<S>(
    store: &S,
    client: &Client,
    endpoint: &str,
    name: &str,
) -> Result<LocalDevice, SyncError>
where
    S: SyncRepository + ?Sized,
{
    if let Some(device) = store.get_device()? {
        return Ok(device);
    }

    let registered = HttpRemote::register(client, endpoint, name).await?;
    let device = LocalDevice {
        device_id: registered.device_id,
        token: registered.token,
    };
    store.save_device(&device)?;
    info!(device_id = %device.device_id, "registered device");
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_exhaustion_is_recognised_in_error_body() {
        let body = r#"{"error":"identity_exhausted","message":"card id sequence exhausted"}"#;
        assert!(matches!(
            error_from_body(500, body),
            SyncError::IdentityExhausted
        ));
    }

    #[test]
    fn unauthorized_maps_to_not_authenticated() {
        let body = r#"{"error":"unauthorized","message":"Invalid token"}"#;
        assert!(matches!(
            error_from_body(401, body),
            SyncError::NotAuthenticated
        ));
    }

    #[test]
    fn plain_text_error_keeps_status_and_text() {
        match error_from_body(502, "bad gateway") {
            SyncError::Backend { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn connector_rejects_non_http_endpoints() {
        let connector = HttpConnector::new("token");
        assert!(connector.connect("ftp://example.com").is_err());
        assert!(connector.connect("http://127.0.0.1:3000/").is_ok());
    }
}
