//! Broker message schemas.
//!
//! Jobs are immutable once published; redelivery carries the same payload
//! plus the broker-supplied delivery count. All payloads are
//! self-describing JSON with stable snake_case field names.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ids::{VideoCode, VideoId, WorkerId};
use crate::quality::{Codec, Quality};

/// The transcode work order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TranscodeJob {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    /// Storage key of the source object.
    pub input_path: String,
    /// Deterministic key prefix for every produced artifact.
    pub output_prefix: String,
    pub codec: Codec,
    pub qualities: Vec<Quality>,
    /// When set, the encoder reads the source through a presigned ranged
    /// URL instead of staging it to scratch.
    #[serde(default)]
    pub use_byte_range: bool,
    #[serde(default)]
    pub generate_gallery: bool,
}

/// Standalone gallery extraction order (re-runs against an existing
/// source without retranscoding).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GalleryJob {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    pub input_path: String,
    pub output_prefix: String,
}

/// CDN cache warming order published downstream of a successful transcode.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WarmCacheJob {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    pub hls_path: String,
}

/// Subtitle transcription order. Execution plugs into the same worker
/// runtime with its own handler.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubtitleJob {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    pub input_path: String,
    pub language: String,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Upload,
    Transcode,
    Subtitle,
    Gallery,
    Reel,
    Warmcache,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Started,
    Processing,
    Completed,
    Failed,
}

/// Best-effort progress report pushed on the non-durable channel.
///
/// Consumers treat these as a hint, never a source of truth; they may be
/// dropped or reordered.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProgressEvent {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub status: EventStatus,
    /// Cumulative completion, 0-100, monotonically non-decreasing within
    /// one job execution.
    pub progress: u8,
    pub stage: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub worker_id: WorkerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Type-specific fields the core does not interpret.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub extra: Value,
}

impl ProgressEvent {
    pub fn new(
        video_id: VideoId,
        video_code: VideoCode,
        event_type: EventType,
        status: EventStatus,
        progress: u8,
        stage: impl Into<String>,
        message: impl Into<String>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            video_id,
            video_code,
            event_type,
            status,
            progress: progress.min(100),
            stage: stage.into(),
            message: message.into(),
            error: None,
            worker_id,
            output_path: None,
            extra: Value::Null,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, EventStatus::Completed | EventStatus::Failed)
    }
}

/// Final-failure envelope published on the dead-letter subject.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DlqNotification {
    pub video_id: VideoId,
    pub video_code: VideoCode,
    pub title: String,
    pub error: String,
    pub attempts: u32,
    pub worker_id: WorkerId,
    pub stage: String,
    pub failed_at: DateTime<Utc>,
}

/// Periodic liveness report from a worker process.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: WorkerId,
    pub worker_type: String,
    pub concurrency: usize,
    pub in_flight: usize,
    pub disk_used_percent: f64,
    pub gpu_enabled: bool,
    /// True while the disk monitor holds the consumer paused.
    pub paused: bool,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> TranscodeJob {
        TranscodeJob {
            video_id: VideoId::new(),
            video_code: VideoCode::parse("abc12345").unwrap(),
            input_path: "videos/abc12345/original.mp4".into(),
            output_prefix: "hls/abc12345".into(),
            codec: Codec::H264,
            qualities: vec![Quality::Q720p, Quality::Q480p],
            use_byte_range: false,
            generate_gallery: true,
        }
    }

    #[test]
    fn transcode_job_round_trips() {
        let original = job();
        let json = serde_json::to_string(&original).unwrap();
        let back: TranscodeJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn transcode_job_field_names_are_stable() {
        let json = serde_json::to_value(job()).unwrap();
        for key in [
            "video_id",
            "video_code",
            "input_path",
            "output_prefix",
            "codec",
            "qualities",
            "use_byte_range",
            "generate_gallery",
        ] {
            assert!(json.get(key).is_some(), "missing field {key}");
        }
    }

    #[test]
    fn optional_job_flags_default_off() {
        let json = r#"{
            "video_id": "0192f4a0-0000-7000-8000-000000000000",
            "video_code": "abc12345",
            "input_path": "videos/abc12345/original.mp4",
            "output_prefix": "hls/abc12345",
            "codec": "h264",
            "qualities": ["720p"]
        }"#;
        let parsed: TranscodeJob = serde_json::from_str(json).unwrap();
        assert!(!parsed.use_byte_range);
        assert!(!parsed.generate_gallery);
    }

    #[test]
    fn progress_event_clamps_and_tags() {
        let event = ProgressEvent::new(
            VideoId::new(),
            VideoCode::parse("abc12345").unwrap(),
            EventType::Transcode,
            EventStatus::Processing,
            150,
            "encode",
            "encoding 720p",
            WorkerId::new("w1"),
        );
        assert_eq!(event.progress, 100);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "transcode");
        assert_eq!(json["status"], "processing");
        // Unset optionals stay off the wire.
        assert!(json.get("error").is_none());
    }

    #[test]
    fn terminal_event_statuses() {
        let mut event = ProgressEvent::new(
            VideoId::new(),
            VideoCode::parse("abc12345").unwrap(),
            EventType::Transcode,
            EventStatus::Completed,
            100,
            "commit",
            "done",
            WorkerId::new("w1"),
        );
        assert!(event.is_terminal());
        event.status = EventStatus::Processing;
        assert!(!event.is_terminal());
    }
}
