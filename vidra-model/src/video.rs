use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::gallery::GalleryStatus;
use crate::ids::{VideoCode, VideoId};
use crate::status::VideoStatus;

/// The authoritative asset record.
///
/// Mutated only by the worker currently holding its job and by the
/// stuck-job supervisor; artifact columns are written exclusively on the
/// `processing -> ready` edge.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: VideoId,
    pub code: VideoCode,
    pub title: String,
    pub status: VideoStatus,
    pub duration_sec: Option<i32>,
    /// Highest rung of the produced ladder, or the probed source label.
    pub quality: Option<String>,
    /// Prefix holding the master playlist and variant segments.
    pub hls_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub disk_usage_bytes: i64,
    /// Per-variant size breakdown keyed by quality label.
    pub quality_sizes: Option<Json<HashMap<String, i64>>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    /// Set when a worker claims the row; cleared on any terminal
    /// transition. `processing_started_at IS NULL <=> status != processing`.
    pub processing_started_at: Option<DateTime<Utc>>,
    pub needs_retranscode: bool,
    pub gallery_path: Option<String>,
    pub gallery_status: GalleryStatus,
    pub gallery_source_count: i32,
    pub gallery_super_safe_count: i32,
    pub gallery_safe_count: i32,
    pub gallery_nsfw_count: i32,
    pub gallery_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything `mark_completed` writes on the `pending -> ready` edge.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionInfo {
    pub hls_path: String,
    pub thumbnail_path: String,
    pub duration_sec: i32,
    /// Label of the tallest produced rung.
    pub quality: String,
    /// Sum of uploaded artifact sizes.
    pub disk_usage_bytes: i64,
    /// Bytes per top-level output subdirectory (quality label or
    /// `thumbnail`).
    pub quality_sizes: HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_info_sizes_sum_to_disk_usage() {
        let mut sizes = HashMap::new();
        sizes.insert("720p".to_string(), 700_i64);
        sizes.insert("480p".to_string(), 300_i64);
        let info = CompletionInfo {
            hls_path: "hls/abc12345".into(),
            thumbnail_path: "hls/abc12345/thumb.jpg".into(),
            duration_sec: 120,
            quality: "720p".into(),
            disk_usage_bytes: 1000,
            quality_sizes: sizes,
        };
        let sum: i64 = info.quality_sizes.values().sum();
        assert_eq!(sum, info.disk_usage_bytes);
    }
}
