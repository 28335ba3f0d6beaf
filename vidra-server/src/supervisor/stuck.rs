//! Stuck-job detector.
//!
//! Two queries on a fixed cadence: rows stuck in `processing` past the
//! processing timeout are failed (a sign the owning worker died without
//! ack or nak), and rows parked in `pending` past the pending timeout
//! get their job republished. There is deliberately no timeout on
//! `queued`; jobs may legitimately wait in the broker for workers.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vidra_core::broker::{JobBroker, subjects};
use vidra_core::keys;
use vidra_core::repo::VideoRepository;
use vidra_core::storage::ObjectStore;
use vidra_model::{Codec, Quality, TranscodeJob, Video};

#[derive(Debug, Clone)]
pub struct StuckDetectorConfig {
    pub cadence: Duration,
    pub processing_timeout: Duration,
    pub pending_timeout: Duration,
    pub codec: Codec,
    pub qualities: Vec<Quality>,
    pub generate_gallery: bool,
}

impl Default for StuckDetectorConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(30),
            processing_timeout: Duration::from_secs(10 * 60),
            pending_timeout: Duration::from_secs(5 * 60),
            codec: Codec::H264,
            qualities: Quality::ALL.to_vec(),
            generate_gallery: true,
        }
    }
}

pub struct StuckJobDetector {
    repo: Arc<dyn VideoRepository>,
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn ObjectStore>,
    config: StuckDetectorConfig,
}

impl std::fmt::Debug for StuckJobDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StuckJobDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StuckJobDetector {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn ObjectStore>,
        config: StuckDetectorConfig,
    ) -> Self {
        Self {
            repo,
            broker,
            store,
            config,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.cadence);
        info!(
            "Stuck-job detector running (processing > {:?}, pending > {:?})",
            self.config.processing_timeout, self.config.pending_timeout
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    pub async fn tick(&self) {
        self.fail_stuck_processing().await;
        self.republish_stale_pending().await;
    }

    async fn fail_stuck_processing(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.processing_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let stuck = match self.repo.find_stuck_processing(cutoff).await {
            Ok(stuck) => stuck,
            Err(e) => {
                warn!("Stuck-processing query failed: {e}");
                return;
            }
        };
        for video in stuck {
            warn!(
                "Video {} stuck in processing since {:?}; failing",
                video.code, video.processing_started_at
            );
            let attempt = (video.retry_count + 1) as u32;
            if let Err(e) = self
                .repo
                .mark_failed(video.id, "processing stuck", attempt)
                .await
            {
                warn!("Failed to fail stuck video {}: {e}", video.id);
            }
        }
    }

    async fn republish_stale_pending(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.pending_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let stale = match self.repo.find_stale_pending(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!("Stale-pending query failed: {e}");
                return;
            }
        };
        for video in stale {
            match self.build_job(&video).await {
                Ok(Some(job)) => {
                    let payload = match serde_json::to_vec(&job) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("Encoding republished job failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = self
                        .broker
                        .publish(subjects::JOBS_TRANSCODE, &payload)
                        .await
                    {
                        warn!("Republish for {} failed: {e}", video.code);
                        continue;
                    }
                    if let Err(e) = self.repo.mark_queued(video.id).await {
                        warn!("mark_queued for {} failed: {e}", video.id);
                    }
                    info!("Republished stale pending video {}", video.code);
                }
                Ok(None) => {
                    warn!(
                        "Pending video {} has no source object; leaving for the operator",
                        video.code
                    );
                }
                Err(e) => warn!("Republish probe for {} failed: {e}", video.code),
            }
        }
    }

    /// Rebuilds the transcode job from the row; the source extension is
    /// recovered by listing the upload prefix.
    async fn build_job(
        &self,
        video: &Video,
    ) -> anyhow::Result<Option<TranscodeJob>> {
        let prefix = format!("videos/{}/", video.code);
        let objects = self.store.list(&prefix).await?;
        let Some(input_path) = objects
            .into_iter()
            .find(|key| key.contains("/original."))
        else {
            return Ok(None);
        };

        let qualities = match video.quality.as_deref() {
            // A retranscode of a probed source keeps rungs at or below it.
            Some(label) => match Quality::from_str(label) {
                Ok(top) => self
                    .config
                    .qualities
                    .iter()
                    .copied()
                    .filter(|q| q.height() <= top.height())
                    .collect(),
                Err(_) => self.config.qualities.clone(),
            },
            None => self.config.qualities.clone(),
        };

        Ok(Some(TranscodeJob {
            video_id: video.id,
            video_code: video.code.clone(),
            input_path,
            output_prefix: keys::hls_prefix(&video.code),
            codec: self.config.codec,
            qualities,
            use_byte_range: false,
            generate_gallery: self.config.generate_gallery,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidra_core::broker::MockJobBroker;
    use vidra_core::repo::MockVideoRepository;
    use vidra_core::storage::MockObjectStore;
    use vidra_model::{VideoCode, VideoId, VideoStatus};

    fn video(status: VideoStatus, retry_count: i32) -> Video {
        use chrono::Utc;
        Video {
            id: VideoId::new(),
            code: VideoCode::parse("abc12345").unwrap(),
            title: "A title".into(),
            status,
            duration_sec: None,
            quality: None,
            hls_path: None,
            thumbnail_path: None,
            disk_usage_bytes: 0,
            quality_sizes: None,
            retry_count,
            last_error: None,
            processing_started_at: matches!(status, VideoStatus::Processing)
                .then(Utc::now),
            needs_retranscode: false,
            gallery_path: None,
            gallery_status: Default::default(),
            gallery_source_count: 0,
            gallery_super_safe_count: 0,
            gallery_safe_count: 0,
            gallery_nsfw_count: 0,
            gallery_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn detector(
        repo: MockVideoRepository,
        broker: MockJobBroker,
        store: MockObjectStore,
    ) -> StuckJobDetector {
        StuckJobDetector::new(
            Arc::new(repo),
            Arc::new(broker),
            Arc::new(store),
            StuckDetectorConfig::default(),
        )
    }

    #[tokio::test]
    async fn stuck_processing_rows_are_failed() {
        let stuck = video(VideoStatus::Processing, 1);
        let stuck_id = stuck.id;

        let mut repo = MockVideoRepository::new();
        repo.expect_find_stuck_processing()
            .returning(move |_| Ok(vec![stuck.clone()]));
        repo.expect_find_stale_pending().returning(|_| Ok(vec![]));
        repo.expect_mark_failed()
            .withf(move |id, error, attempt| {
                *id == stuck_id && error == "processing stuck" && *attempt == 2
            })
            .times(1)
            .returning(|_, _, _| Ok(VideoStatus::Failed));

        detector(repo, MockJobBroker::new(), MockObjectStore::new())
            .tick()
            .await;
    }

    #[tokio::test]
    async fn stale_pending_rows_are_republished() {
        let pending = video(VideoStatus::Pending, 0);
        let pending_id = pending.id;

        let mut repo = MockVideoRepository::new();
        repo.expect_find_stuck_processing().returning(|_| Ok(vec![]));
        repo.expect_find_stale_pending()
            .returning(move |_| Ok(vec![pending.clone()]));
        repo.expect_mark_queued()
            .withf(move |id| *id == pending_id)
            .times(1)
            .returning(|_| Ok(()));

        let mut store = MockObjectStore::new();
        store.expect_list().returning(|_| {
            Ok(vec!["videos/abc12345/original.mkv".to_string()])
        });

        let mut broker = MockJobBroker::new();
        broker
            .expect_publish()
            .withf(|subject, payload| {
                let job: TranscodeJob =
                    serde_json::from_slice(payload).unwrap();
                subject == subjects::JOBS_TRANSCODE
                    && job.input_path == "videos/abc12345/original.mkv"
            })
            .times(1)
            .returning(|_, _| Ok(()));

        detector(repo, broker, store).tick().await;
    }

    #[tokio::test]
    async fn pending_row_without_source_is_left_alone() {
        let pending = video(VideoStatus::Pending, 0);

        let mut repo = MockVideoRepository::new();
        repo.expect_find_stuck_processing().returning(|_| Ok(vec![]));
        repo.expect_find_stale_pending()
            .returning(move |_| Ok(vec![pending.clone()]));

        let mut store = MockObjectStore::new();
        store.expect_list().returning(|_| Ok(vec![]));

        // No publish, no mark_queued: the mocks would panic.
        detector(repo, MockJobBroker::new(), store).tick().await;
    }
}
