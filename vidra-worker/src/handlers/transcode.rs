//! Transcode job handler: the full pipeline plus its commit and
//! downstream effects.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vidra_core::broker::{JobBroker, subjects};
use vidra_core::error::JobError;
use vidra_core::pipeline::{
    GalleryOutcome, ProgressSink, TranscodePipeline,
};
use vidra_core::repo::VideoRepository;
use vidra_model::{
    EventType, SubtitleJob, TranscodeJob, WarmCacheJob,
};

use super::{HandlerOutcome, JobDescriptor, JobHandler};

pub struct TranscodeHandler {
    pipeline: Arc<TranscodePipeline>,
    repo: Arc<dyn VideoRepository>,
    broker: Arc<dyn JobBroker>,
    warmcache_enabled: bool,
    auto_subtitle: Option<String>,
}

impl std::fmt::Debug for TranscodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeHandler").finish_non_exhaustive()
    }
}

impl TranscodeHandler {
    pub fn new(
        pipeline: Arc<TranscodePipeline>,
        repo: Arc<dyn VideoRepository>,
        broker: Arc<dyn JobBroker>,
        warmcache_enabled: bool,
        auto_subtitle: Option<String>,
    ) -> Self {
        Self {
            pipeline,
            repo,
            broker,
            warmcache_enabled,
            auto_subtitle,
        }
    }

    /// Effects this job is responsible for after a successful commit.
    async fn enqueue_downstream(&self, job: &TranscodeJob, hls_path: &str) {
        if self.warmcache_enabled {
            let warm = WarmCacheJob {
                video_id: job.video_id,
                video_code: job.video_code.clone(),
                hls_path: hls_path.to_string(),
            };
            match serde_json::to_vec(&warm) {
                Ok(payload) => {
                    if let Err(e) = self
                        .broker
                        .publish(subjects::JOBS_WARMCACHE, &payload)
                        .await
                    {
                        warn!("Failed to enqueue cache warming for {}: {e}", job.video_code);
                    }
                }
                Err(e) => warn!("Failed to encode warm-cache job: {e}"),
            }
        }
        if let Some(language) = &self.auto_subtitle {
            let subtitle = SubtitleJob {
                video_id: job.video_id,
                video_code: job.video_code.clone(),
                input_path: job.input_path.clone(),
                language: language.clone(),
            };
            match serde_json::to_vec(&subtitle) {
                Ok(payload) => {
                    if let Err(e) = self
                        .broker
                        .publish(subjects::JOBS_SUBTITLE, &payload)
                        .await
                    {
                        warn!("Failed to enqueue subtitles for {}: {e}", job.video_code);
                    }
                }
                Err(e) => warn!("Failed to encode subtitle job: {e}"),
            }
        }
    }
}

#[async_trait]
impl JobHandler for TranscodeHandler {
    fn subject(&self) -> &'static str {
        subjects::JOBS_TRANSCODE
    }

    fn event_type(&self) -> EventType {
        EventType::Transcode
    }

    fn describe(&self, payload: &[u8]) -> Result<JobDescriptor, JobError> {
        let job: TranscodeJob = serde_json::from_slice(payload)
            .map_err(|e| JobError::MalformedJob(e.to_string()))?;
        Ok(JobDescriptor {
            video_id: job.video_id,
            video_code: job.video_code,
        })
    }

    async fn run(
        &self,
        payload: &[u8],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutcome, JobError> {
        let job: TranscodeJob = serde_json::from_slice(payload)
            .map_err(|e| JobError::MalformedJob(e.to_string()))?;
        if job.qualities.is_empty() {
            return Err(JobError::MalformedJob(
                "transcode job with empty ladder".into(),
            ));
        }

        let output = self.pipeline.run(&job, progress, cancel).await?;

        // Commit. The artifact columns are only ever written here, on the
        // processing -> ready edge.
        self.repo
            .mark_completed(job.video_id, &output.completion)
            .await
            .map_err(JobError::from)?;

        match &output.gallery {
            GalleryOutcome::Classified(result) => {
                self.repo
                    .update_gallery_classified(
                        job.video_id,
                        &result.path,
                        result.counts.source,
                        result.counts.super_safe,
                        result.counts.safe,
                        result.counts.nsfw,
                    )
                    .await
                    .map_err(JobError::from)?;
            }
            GalleryOutcome::Skipped(reason) => {
                warn!("Gallery skipped for {}: {reason}", job.video_code);
            }
            GalleryOutcome::Disabled => {}
        }

        self.enqueue_downstream(&job, &output.completion.hls_path).await;

        info!(
            "Video {} transcoded to {} ({} bytes)",
            job.video_code,
            output.completion.quality,
            output.completion.disk_usage_bytes
        );
        Ok(HandlerOutcome {
            message: format!("transcoded to {}", output.completion.quality),
            output_path: Some(output.completion.hls_path.clone()),
        })
    }
}
