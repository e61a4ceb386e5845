//! Device registration and status endpoints

use axum::{extract::State, Extension, Json};
use recall_sync::remote::{DeviceRegisterRequest, DeviceRegisterResponse, DeviceStatusResponse};

use crate::error::Result;
use crate::routes::auth::AuthenticatedDevice;
use crate::AppState;

const UNNAMED_DEVICE: &str = "unnamed device";

/// POST /api/device/register
/// Creates a new device and returns the token
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Option<DeviceRegisterRequest>>,
) -> Result<Json<DeviceRegisterResponse>> {
    let name = payload
        .map(|p| p.name)
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNNAMED_DEVICE.to_string());
    let device = state.authority.register_device(&name);
    state.persist().await?;

    tracing::info!("Registered new device: {}", device.device_id);

    Ok(Json(device))
}

/// GET /api/device/status
/// Returns device status
pub async fn status(
    Extension(auth): Extension<AuthenticatedDevice>,
    State(state): State<AppState>,
) -> Result<Json<DeviceStatusResponse>> {
    Ok(Json(state.authority.device_status(&auth.device_id)?))
}
