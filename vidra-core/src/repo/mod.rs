//! Video repository contract.
//!
//! All operations are row-scoped single-row UPDATEs; the worker holding a
//! job and the stuck-job supervisor are the only mutators. No multi-row
//! transactions exist in the core path.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vidra_model::{CompletionInfo, Video, VideoCode, VideoId, VideoStatus};

use crate::error::Result;

pub use postgres::PgVideoRepository;

/// Fields supplied at row creation; everything else starts at defaults.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub id: VideoId,
    pub code: VideoCode,
    pub title: String,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Creates the row in `pending`.
    async fn create(&self, video: NewVideo) -> Result<Video>;

    async fn get(&self, id: VideoId) -> Result<Option<Video>>;

    async fn get_status(&self, id: VideoId) -> Result<Option<VideoStatus>>;

    /// `pending`/`failed` -> `queued` once the job is durably published.
    async fn mark_queued(&self, id: VideoId) -> Result<()>;

    /// Claims the row: `status=processing`, `processing_started_at=now()`.
    /// Idempotent; returns false when the row no longer exists.
    async fn mark_processing_started(&self, id: VideoId) -> Result<bool>;

    /// Terminal success: writes every produced-artifact column, clears
    /// `needs_retranscode` and `processing_started_at`.
    async fn mark_completed(
        &self,
        id: VideoId,
        info: &CompletionInfo,
    ) -> Result<()>;

    /// Terminal failure for this attempt: `failed` below the delivery
    /// cap, `dead_letter` at or above it. Stores `last_error`, raises
    /// `retry_count` monotonically, clears `processing_started_at`.
    /// Returns the resulting status.
    async fn mark_failed(
        &self,
        id: VideoId,
        error: &str,
        attempt: u32,
    ) -> Result<VideoStatus>;

    /// Operator-driven re-run flag; cleared by `mark_completed`.
    async fn set_needs_retranscode(&self, id: VideoId) -> Result<()>;

    async fn update_gallery_pending(&self, id: VideoId) -> Result<()>;

    /// Classified-flow commit: stores per-tier counts, derives
    /// `gallery_count = super_safe + safe`, and parks the gallery in
    /// `pending_review` until an operator approves the super-safe set.
    async fn update_gallery_classified(
        &self,
        id: VideoId,
        path: &str,
        source: i32,
        super_safe: i32,
        safe: i32,
        nsfw: i32,
    ) -> Result<()>;

    async fn update_gallery_failed(&self, id: VideoId) -> Result<()>;

    /// Rows stuck in `processing` since before the cutoff.
    async fn find_stuck_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Video>>;

    /// Rows parked in `pending` with no update since the cutoff.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Video>>;

    async fn delete(&self, id: VideoId) -> Result<()>;
}
