//! Direct-upload endpoints: multipart session lifecycle.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use vidra_core::storage::UploadedPart;
use vidra_core::upload::UploadSession;
use vidra_model::Video;

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub title: String,
}

pub async fn init_upload(
    State(state): State<AppState>,
    Json(request): Json<InitUploadRequest>,
) -> ApiResult<Json<UploadSession>> {
    if request.filename.is_empty() {
        return Err(ApiError::BadRequest("filename is required".into()));
    }
    let session = state
        .coordinator
        .init(&request.filename, request.size_bytes, &request.title)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct CompleteUploadRequest {
    pub parts: Vec<UploadedPart>,
}

pub async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(request): Json<CompleteUploadRequest>,
) -> ApiResult<Json<Video>> {
    if request.parts.is_empty() {
        return Err(ApiError::BadRequest("no parts supplied".into()));
    }
    let video = state
        .coordinator
        .complete(&upload_id, request.parts)
        .await?;
    Ok(Json(video))
}

pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.coordinator.abort(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
