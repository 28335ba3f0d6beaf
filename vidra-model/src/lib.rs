//! Core data model definitions shared across Vidra crates.
#![allow(missing_docs)]

pub mod error;
pub mod gallery;
pub mod ids;
pub mod messages;
pub mod quality;
pub mod status;
pub mod video;

// Intentionally curated re-exports for downstream consumers.
pub use error::{ModelError, Result as ModelResult};
pub use gallery::{GalleryCounts, GalleryStatus, GalleryTier};
pub use ids::{VideoCode, VideoId, WorkerId};
pub use messages::{
    DlqNotification, EventStatus, EventType, GalleryJob, ProgressEvent,
    SubtitleJob, TranscodeJob, WarmCacheJob, WorkerHeartbeat,
};
pub use quality::{Codec, Quality, source_quality_label};
pub use status::VideoStatus;
pub use video::{CompletionInfo, Video};
