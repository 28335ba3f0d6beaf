//! Thin job-producing video endpoints.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use vidra_core::broker::subjects;
use vidra_core::keys;
use vidra_core::repo::NewVideo;
use vidra_model::{TranscodeJob, Video, VideoCode, VideoId};

use crate::errors::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateVideoRequest {
    pub title: String,
    /// Reuse an existing code whose source object is already uploaded;
    /// generated when absent.
    pub code: Option<String>,
    #[serde(default = "default_ext")]
    pub ext: String,
}

fn default_ext() -> String {
    "mp4".to_string()
}

/// Creates the row and enqueues the transcode job. The source object
/// must already exist under `videos/{code}/`.
pub async fn create_video(
    State(state): State<AppState>,
    Json(request): Json<CreateVideoRequest>,
) -> ApiResult<Json<Video>> {
    let code = match &request.code {
        Some(code) => VideoCode::parse(code.clone())
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => VideoCode::generate(),
    };

    let input_path = keys::source_key(&code, &request.ext);
    if !state.store.exists(&input_path).await? {
        return Err(ApiError::BadRequest(format!(
            "source object {input_path} does not exist"
        )));
    }

    let video = state
        .repo
        .create(NewVideo {
            id: VideoId::new(),
            code: code.clone(),
            title: request.title,
        })
        .await?;

    publish_transcode(&state, &video, input_path).await?;
    info!("Video {} created and enqueued", video.code);

    let video = state
        .repo
        .get(video.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(video))
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Video>> {
    let id = VideoId(id);
    if let Some(video) = state.cache.get_video::<Video>(id).await {
        return Ok(Json(video));
    }
    let video = state.repo.get(id).await?.ok_or(ApiError::NotFound)?;
    state.cache.put_video(id, &video).await;
    Ok(Json(video))
}

/// Operator-driven re-run: flags the row and republishes the job.
pub async fn retranscode_video(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Video>> {
    let id = VideoId(id);
    let video = state.repo.get(id).await?.ok_or(ApiError::NotFound)?;

    let prefix = format!("videos/{}/", video.code);
    let input_path = state
        .store
        .list(&prefix)
        .await?
        .into_iter()
        .find(|key| key.contains("/original."))
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "video {} has no source object",
                video.code
            ))
        })?;

    state.repo.set_needs_retranscode(id).await?;
    publish_transcode(&state, &video, input_path).await?;
    state.cache.invalidate(id).await;
    info!("Video {} re-enqueued for transcode", video.code);

    let video = state.repo.get(id).await?.ok_or(ApiError::NotFound)?;
    Ok(Json(video))
}

async fn publish_transcode(
    state: &AppState,
    video: &Video,
    input_path: String,
) -> ApiResult<()> {
    let job = TranscodeJob {
        video_id: video.id,
        video_code: video.code.clone(),
        input_path,
        output_prefix: keys::hls_prefix(&video.code),
        codec: state.job_defaults.codec,
        qualities: state.job_defaults.qualities.clone(),
        use_byte_range: state.job_defaults.use_byte_range,
        generate_gallery: state.job_defaults.generate_gallery,
    };
    let payload = serde_json::to_vec(&job)
        .map_err(|e| ApiError::Internal(e.into()))?;
    state
        .broker
        .publish(subjects::JOBS_TRANSCODE, &payload)
        .await?;
    state.repo.mark_queued(video.id).await?;
    Ok(())
}
