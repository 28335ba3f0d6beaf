//! Standalone gallery job handler: re-runs extraction against an
//! existing source without retranscoding. Runs against `ready` rows and
//! never moves the video lifecycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vidra_core::broker::subjects;
use vidra_core::error::JobError;
use vidra_core::pipeline::{
    FfprobeRunner, GalleryPipeline, GalleryRun, ProgressSink, ScratchDir,
};
use vidra_core::repo::VideoRepository;
use vidra_core::storage::ObjectStore;
use vidra_model::{EventType, GalleryJob};

use super::{HandlerOutcome, JobDescriptor, JobHandler};

pub struct GalleryHandler {
    gallery: Arc<GalleryPipeline>,
    prober: FfprobeRunner,
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn VideoRepository>,
    scratch_root: std::path::PathBuf,
    presign_ttl: Duration,
}

impl std::fmt::Debug for GalleryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryHandler").finish_non_exhaustive()
    }
}

impl GalleryHandler {
    pub fn new(
        gallery: Arc<GalleryPipeline>,
        prober: FfprobeRunner,
        store: Arc<dyn ObjectStore>,
        repo: Arc<dyn VideoRepository>,
        scratch_root: std::path::PathBuf,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            gallery,
            prober,
            store,
            repo,
            scratch_root,
            presign_ttl,
        }
    }
}

#[async_trait]
impl JobHandler for GalleryHandler {
    fn subject(&self) -> &'static str {
        subjects::JOBS_GALLERY
    }

    fn event_type(&self) -> EventType {
        EventType::Gallery
    }

    fn owns_lifecycle(&self) -> bool {
        false
    }

    fn describe(&self, payload: &[u8]) -> Result<JobDescriptor, JobError> {
        let job: GalleryJob = serde_json::from_slice(payload)
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
        let job: GalleryJob = serde_json::from_slice(payload)
            .map_err(|e| JobError::MalformedJob(e.to_string()))?;

        if !self.store.exists(&job.input_path).await? {
            return Err(JobError::SourceNotFound(job.input_path.clone()));
        }
        // The source stays on the store; both the prober and the frame
        // grabs read it through a presigned URL.
        let input = self
            .store
            .presign_get(&job.input_path, self.presign_ttl)
            .await?;
        let media = self.prober.probe(&input).await?;
        progress.emit("probe", 10, "source probed").await;

        self.repo
            .update_gallery_pending(job.video_id)
            .await
            .map_err(JobError::from)?;

        let scratch = ScratchDir::create(&self.scratch_root).await?;
        let run = self
            .gallery
            .run(
                &job.video_code,
                &input,
                media.duration_secs,
                scratch.path(),
                progress,
                cancel,
            )
            .await;
        scratch.remove().await;

        match run {
            Ok(GalleryRun::Done(result)) => {
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
                Ok(HandlerOutcome {
                    message: format!(
                        "gallery classified: {} super-safe, {} safe, {} nsfw",
                        result.counts.super_safe,
                        result.counts.safe,
                        result.counts.nsfw
                    ),
                    output_path: Some(result.path),
                })
            }
            Ok(GalleryRun::Skipped(reason)) => {
                warn!("Gallery skipped for {}: {reason}", job.video_code);
                Ok(HandlerOutcome {
                    message: format!("gallery skipped: {reason}"),
                    output_path: None,
                })
            }
            Err(JobError::Classifier(reason)) => {
                // Standalone runs exist only to produce the gallery;
                // record the failure but do not retry endlessly.
                warn!(
                    "Gallery classification failed for {}: {reason}",
                    job.video_code
                );
                self.repo
                    .update_gallery_failed(job.video_id)
                    .await
                    .map_err(JobError::from)?;
                Ok(HandlerOutcome {
                    message: format!("gallery classification failed: {reason}"),
                    output_path: None,
                })
            }
            Err(other) => Err(other),
        }
    }
}
