//! Cache warming: pulls the freshly produced playlists (and the first
//! segment of each variant) through the public edge so the CDN is hot
//! before the first viewer arrives.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vidra_core::broker::subjects;
use vidra_core::error::JobError;
use vidra_core::pipeline::ProgressSink;
use vidra_model::{EventType, WarmCacheJob};

use super::{HandlerOutcome, JobDescriptor, JobHandler};

pub struct WarmCacheHandler {
    client: reqwest::Client,
    public_url: String,
}

impl std::fmt::Debug for WarmCacheHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmCacheHandler")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl WarmCacheHandler {
    pub fn new(client: reqwest::Client, public_url: impl Into<String>) -> Self {
        Self {
            client,
            public_url: public_url.into(),
        }
    }

    async fn fetch(&self, path: &str) -> Result<String, JobError> {
        let url = format!("{}/{}", self.public_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| JobError::Storage(format!("warm {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(JobError::Storage(format!(
                "warm {url}: status {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| JobError::Storage(format!("warm {url}: {e}")))
    }

    async fn fetch_discard(&self, path: &str) -> Result<u64, JobError> {
        let url = format!("{}/{}", self.public_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| JobError::Storage(format!("warm {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(JobError::Storage(format!(
                "warm {url}: status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| JobError::Storage(format!("warm {url}: {e}")))?;
        Ok(bytes.len() as u64)
    }
}

#[async_trait]
impl JobHandler for WarmCacheHandler {
    fn subject(&self) -> &'static str {
        subjects::JOBS_WARMCACHE
    }

    fn event_type(&self) -> EventType {
        EventType::Warmcache
    }

    fn owns_lifecycle(&self) -> bool {
        false
    }

    fn describe(&self, payload: &[u8]) -> Result<JobDescriptor, JobError> {
        let job: WarmCacheJob = serde_json::from_slice(payload)
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
        let job: WarmCacheJob = serde_json::from_slice(payload)
            .map_err(|e| JobError::MalformedJob(e.to_string()))?;

        let master_path = format!("{}/master.m3u8", job.hls_path);
        let master = self.fetch(&master_path).await?;
        progress.emit("warm", 20, "master playlist warmed").await;

        let variants: Vec<String> = master
            .lines()
            .filter(|line| line.ends_with("index.m3u8"))
            .map(str::to_string)
            .collect();

        let mut warmed_bytes = 0u64;
        let variant_count = variants.len().max(1);
        for (i, variant) in variants.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let variant_path = format!("{}/{variant}", job.hls_path);
            let playlist = self.fetch(&variant_path).await?;

            // First segment per variant is enough to prime startup.
            if let Some(segment) = playlist
                .lines()
                .find(|line| !line.starts_with('#') && line.ends_with(".ts"))
            {
                let variant_dir = variant
                    .rsplit_once('/')
                    .map(|(dir, _)| dir)
                    .unwrap_or("");
                let segment_path = if variant_dir.is_empty() {
                    format!("{}/{segment}", job.hls_path)
                } else {
                    format!("{}/{variant_dir}/{segment}", job.hls_path)
                };
                warmed_bytes += self.fetch_discard(&segment_path).await?;
            }
            progress
                .emit(
                    "warm",
                    20 + (75 * (i + 1) / variant_count) as u8,
                    format!("warmed {variant}"),
                )
                .await;
        }

        debug!(
            "Warmed {} variant playlist(s), {warmed_bytes} segment byte(s) for {}",
            variants.len(),
            job.video_code
        );
        info!("Cache warmed for {}", job.video_code);
        Ok(HandlerOutcome {
            message: format!("warmed {} variant(s)", variants.len()),
            output_path: Some(job.hls_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_from_payload() {
        let job = WarmCacheJob {
            video_id: vidra_model::VideoId::new(),
            video_code: vidra_model::VideoCode::parse("abc12345").unwrap(),
            hls_path: "hls/abc12345".into(),
        };
        let handler = WarmCacheHandler::new(reqwest::Client::new(), "http://edge");
        let descriptor = handler
            .describe(&serde_json::to_vec(&job).unwrap())
            .unwrap();
        assert_eq!(descriptor.video_id, job.video_id);
        assert!(!handler.owns_lifecycle());
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let handler = WarmCacheHandler::new(reqwest::Client::new(), "http://edge");
        let err = handler.describe(b"not json").unwrap_err();
        assert!(matches!(err, JobError::MalformedJob(_)));
        assert!(!err.retriable());
    }
}
