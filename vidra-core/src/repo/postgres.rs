use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::debug;
use vidra_model::{CompletionInfo, Video, VideoId, VideoStatus};

use super::{NewVideo, VideoRepository};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
    /// Delivery attempts before `mark_failed` flips to `dead_letter`.
    /// The same value configures the broker's redelivery cap.
    max_deliveries: u32,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool, max_deliveries: u32) -> Self {
        Self {
            pool,
            max_deliveries,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn create(&self, video: NewVideo) -> Result<Video> {
        let row = sqlx::query_as::<_, Video>(
            r#"
            INSERT INTO video (id, code, title)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(video.id)
        .bind(&video.code)
        .bind(&video.title)
        .fetch_one(&self.pool)
        .await?;
        debug!("Created video {} ({})", row.id, row.code);
        Ok(row)
    }

    async fn get(&self, id: VideoId) -> Result<Option<Video>> {
        let row = sqlx::query_as::<_, Video>(
            "SELECT * FROM video WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_status(&self, id: VideoId) -> Result<Option<VideoStatus>> {
        let status: Option<(VideoStatus,)> = sqlx::query_as(
            "SELECT status FROM video WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status.map(|(s,)| s))
    }

    async fn mark_queued(&self, id: VideoId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video
            SET status = 'queued', updated_at = now()
            WHERE id = $1 AND status IN ('pending', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processing_started(&self, id: VideoId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE video
            SET status = 'processing',
                processing_started_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_completed(
        &self,
        id: VideoId,
        info: &CompletionInfo,
    ) -> Result<()> {
        let sizes: Json<HashMap<String, i64>> =
            Json(info.quality_sizes.clone());
        sqlx::query(
            r#"
            UPDATE video
            SET status = 'ready',
                hls_path = $2,
                thumbnail_path = $3,
                duration_sec = $4,
                quality = $5,
                disk_usage_bytes = $6,
                quality_sizes = $7,
                needs_retranscode = FALSE,
                processing_started_at = NULL,
                last_error = NULL,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&info.hls_path)
        .bind(&info.thumbnail_path)
        .bind(info.duration_sec)
        .bind(&info.quality)
        .bind(info.disk_usage_bytes)
        .bind(sizes)
        .execute(&self.pool)
        .await?;
        debug!("Video {id} ready: {}", info.hls_path);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: VideoId,
        error: &str,
        attempt: u32,
    ) -> Result<VideoStatus> {
        let status: (VideoStatus,) = sqlx::query_as(
            r#"
            UPDATE video
            SET status = CASE
                    WHEN $2 >= $3 THEN 'dead_letter'::video_status
                    ELSE 'failed'::video_status
                END,
                last_error = $4,
                retry_count = GREATEST(retry_count, $2),
                processing_started_at = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(attempt as i32)
        .bind(self.max_deliveries as i32)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        Ok(status.0)
    }

    async fn set_needs_retranscode(&self, id: VideoId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video
            SET needs_retranscode = TRUE, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_gallery_pending(&self, id: VideoId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video
            SET gallery_status = 'pending', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_gallery_classified(
        &self,
        id: VideoId,
        path: &str,
        source: i32,
        super_safe: i32,
        safe: i32,
        nsfw: i32,
    ) -> Result<()> {
        // gallery_count is derived, never stored independently.
        sqlx::query(
            r#"
            UPDATE video
            SET gallery_path = $2,
                gallery_status = 'pending_review',
                gallery_source_count = $3,
                gallery_super_safe_count = $4,
                gallery_safe_count = $5,
                gallery_nsfw_count = $6,
                gallery_count = $4 + $5,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(path)
        .bind(source)
        .bind(super_safe)
        .bind(safe)
        .bind(nsfw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_gallery_failed(&self, id: VideoId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE video
            SET gallery_status = 'failed', updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_stuck_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Video>> {
        let rows = sqlx::query_as::<_, Video>(
            r#"
            SELECT * FROM video
            WHERE status = 'processing' AND processing_started_at < $1
            ORDER BY processing_started_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Video>> {
        let rows = sqlx::query_as::<_, Video>(
            r#"
            SELECT * FROM video
            WHERE status = 'pending' AND updated_at < $1
            ORDER BY updated_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete(&self, id: VideoId) -> Result<()> {
        sqlx::query("DELETE FROM video WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
