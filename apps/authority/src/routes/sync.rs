//! Sync endpoints

use axum::{extract::State, Extension, Json};
use recall_sync::remote::{
    ConfirmDeleteRequest, ConfirmDeleteResponse, PullRequest, PullResponse, PushReviewsRequest,
    PushReviewsResponse, UploadRequest, UploadResponse,
};

use crate::error::Result;
use crate::routes::auth::AuthenticatedDevice;
use crate::AppState;

/// POST /api/sync/upload
/// Assign ids to pending cards, return rewritten files and flag orphans
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    let response = state.authority.upload(&auth.device_id, &payload)?;
    if !response.new_ids.is_empty() || !response.orphaned_cards.is_empty() {
        tracing::info!(
            device_id = %auth.device_id,
            new_ids = response.new_ids.len(),
            orphans = response.orphaned_cards.len(),
            "upload assigned ids"
        );
    }
    state.persist().await?;
    Ok(Json(response))
}

/// POST /api/sync/push-reviews
/// Store reviews and the card states they produced
pub async fn push_reviews(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    Json(payload): Json<PushReviewsRequest>,
) -> Result<Json<PushReviewsResponse>> {
    let response = state.authority.push_reviews(&auth.device_id, payload)?;
    state.persist().await?;
    Ok(Json(response))
}

/// POST /api/sync/pull
/// Pull latest state from server
pub async fn pull(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    Json(payload): Json<PullRequest>,
) -> Result<Json<PullResponse>> {
    Ok(Json(state.authority.pull(&auth.device_id, &payload)?))
}

/// POST /api/sync/confirm-delete
/// Soft-delete orphans the user confirmed
pub async fn confirm_delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedDevice>,
    Json(payload): Json<ConfirmDeleteRequest>,
) -> Result<Json<ConfirmDeleteResponse>> {
    let response = state.authority.confirm_delete(&auth.device_id, &payload)?;
    state.persist().await?;
    Ok(Json(response))
}
