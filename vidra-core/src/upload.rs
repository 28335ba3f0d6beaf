//! Direct-upload coordination.
//!
//! Large sources are uploaded by the client straight to the object store
//! through presigned multipart PUTs. Only a successful `complete` creates
//! the `video` row and publishes the transcode job, so a row never
//! exists without its source object. Session bookkeeping lives in Redis
//! with a TTL, keeping the producer stateless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};
use vidra_model::{Codec, Quality, TranscodeJob, Video, VideoCode, VideoId};

use crate::broker::{JobBroker, subjects};
use crate::error::{CoreError, Result};
use crate::keys;
use crate::repo::{NewVideo, VideoRepository};
use crate::storage::{ObjectStore, UploadedPart};

/// What the producer hands back to the client after `init`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadSession {
    pub upload_id: String,
    pub key: String,
    pub code: VideoCode,
    pub part_size: u64,
    /// Presigned PUT URL per part, 1-indexed order.
    pub part_urls: Vec<String>,
}

/// Durable session record between `init` and `complete`/`abort`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub code: VideoCode,
    pub key: String,
    pub title: String,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait UploadSessionStore: Send + Sync {
    async fn put(&self, upload_id: &str, record: &SessionRecord) -> Result<()>;
    async fn get(&self, upload_id: &str) -> Result<Option<SessionRecord>>;
    async fn delete(&self, upload_id: &str) -> Result<()>;
}

/// Redis-backed session store with TTL expiry.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl: Duration,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    fn key_for(upload_id: &str) -> String {
        format!("upload:{upload_id}")
    }
}

#[async_trait]
impl UploadSessionStore for RedisSessionStore {
    async fn put(&self, upload_id: &str, record: &SessionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            Self::key_for(upload_id),
            json,
            self.ttl.as_secs(),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, upload_id: &str) -> Result<Option<SessionRecord>> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(Self::key_for(upload_id)).await?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, upload_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key_for(upload_id)).await?;
        Ok(())
    }
}

/// Job parameters stamped onto every upload-produced transcode job.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub codec: Codec,
    pub qualities: Vec<Quality>,
    pub use_byte_range: bool,
    pub generate_gallery: bool,
}

pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn VideoRepository>,
    broker: Arc<dyn JobBroker>,
    sessions: Arc<dyn UploadSessionStore>,
    part_size: u64,
    presign_ttl: Duration,
    defaults: JobDefaults,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repo: Arc<dyn VideoRepository>,
        broker: Arc<dyn JobBroker>,
        sessions: Arc<dyn UploadSessionStore>,
        part_size: u64,
        presign_ttl: Duration,
        defaults: JobDefaults,
    ) -> Self {
        Self {
            store,
            repo,
            broker,
            sessions,
            part_size,
            presign_ttl,
            defaults,
        }
    }

    /// Opens a multipart session and presigns one PUT URL per part.
    pub async fn init(
        &self,
        filename: &str,
        size_bytes: u64,
        title: &str,
    ) -> Result<UploadSession> {
        if size_bytes == 0 {
            return Err(CoreError::InvalidInput("empty upload".into()));
        }
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4");
        let code = VideoCode::generate();
        let key = keys::source_key(&code, ext);

        let upload_id = self
            .store
            .create_multipart(&key, "video/mp4")
            .await?;

        let part_count = size_bytes.div_ceil(self.part_size).max(1);
        let mut part_urls = Vec::with_capacity(part_count as usize);
        for part_number in 1..=part_count {
            let url = self
                .store
                .presign_part(
                    &key,
                    &upload_id,
                    part_number as i32,
                    self.presign_ttl,
                )
                .await?;
            part_urls.push(url);
        }

        self.sessions
            .put(
                &upload_id,
                &SessionRecord {
                    code: code.clone(),
                    key: key.clone(),
                    title: title.to_string(),
                },
            )
            .await?;

        debug!(
            "Upload session {upload_id} opened for {key} ({part_count} part(s))"
        );
        Ok(UploadSession {
            upload_id,
            key,
            code,
            part_size: self.part_size,
            part_urls,
        })
    }

    /// Assembles the object and, only on success, creates the `pending`
    /// row and publishes the transcode job.
    pub async fn complete(
        &self,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<Video> {
        let record = self
            .sessions
            .get(upload_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidInput(format!("unknown upload session {upload_id}"))
            })?;

        let size = self
            .store
            .complete_multipart(&record.key, upload_id, parts)
            .await?;

        let video = self
            .repo
            .create(NewVideo {
                id: VideoId::new(),
                code: record.code.clone(),
                title: record.title.clone(),
            })
            .await?;

        let job = TranscodeJob {
            video_id: video.id,
            video_code: record.code.clone(),
            input_path: record.key.clone(),
            output_prefix: keys::hls_prefix(&record.code),
            codec: self.defaults.codec,
            qualities: self.defaults.qualities.clone(),
            use_byte_range: self.defaults.use_byte_range,
            generate_gallery: self.defaults.generate_gallery,
        };
        self.broker
            .publish(subjects::JOBS_TRANSCODE, &serde_json::to_vec(&job)?)
            .await?;
        self.repo.mark_queued(video.id).await?;
        self.sessions.delete(upload_id).await?;

        info!(
            "Upload {upload_id} completed: video {} ({}, {size} bytes)",
            video.id, record.code
        );
        Ok(video)
    }

    /// Discards the assembler; no row or job is created.
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let record = self.sessions.get(upload_id).await?;
        if let Some(record) = record {
            self.store.abort_multipart(&record.key, upload_id).await?;
        }
        self.sessions.delete(upload_id).await?;
        debug!("Upload {upload_id} aborted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockJobBroker;
    use crate::repo::MockVideoRepository;
    use crate::storage::MockObjectStore;
    use vidra_model::VideoStatus;

    fn defaults() -> JobDefaults {
        JobDefaults {
            codec: Codec::H264,
            qualities: vec![Quality::Q720p, Quality::Q480p],
            use_byte_range: false,
            generate_gallery: true,
        }
    }

    fn coordinator(
        store: MockObjectStore,
        repo: MockVideoRepository,
        broker: MockJobBroker,
        sessions: MockUploadSessionStore,
    ) -> UploadCoordinator {
        UploadCoordinator::new(
            Arc::new(store),
            Arc::new(repo),
            Arc::new(broker),
            Arc::new(sessions),
            8 * 1024 * 1024,
            Duration::from_secs(3600),
            defaults(),
        )
    }

    fn pending_video(id: VideoId, code: VideoCode, title: &str) -> Video {
        use chrono::Utc;
        Video {
            id,
            code,
            title: title.to_string(),
            status: VideoStatus::Pending,
            duration_sec: None,
            quality: None,
            hls_path: None,
            thumbnail_path: None,
            disk_usage_bytes: 0,
            quality_sizes: None,
            retry_count: 0,
            last_error: None,
            processing_started_at: None,
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

    #[tokio::test]
    async fn init_presigns_every_part() {
        let mut store = MockObjectStore::new();
        store
            .expect_create_multipart()
            .returning(|_, _| Ok("upload-1".to_string()));
        store
            .expect_presign_part()
            .times(3)
            .returning(|_, _, n, _| Ok(format!("https://store/part/{n}")));
        let mut sessions = MockUploadSessionStore::new();
        sessions.expect_put().times(1).returning(|_, _| Ok(()));

        let coordinator = coordinator(
            store,
            MockVideoRepository::new(),
            MockJobBroker::new(),
            sessions,
        );

        // 20 MiB at 8 MiB parts -> 3 parts.
        let session = coordinator
            .init("movie.mp4", 20 * 1024 * 1024, "A title")
            .await
            .unwrap();
        assert_eq!(session.part_urls.len(), 3);
        assert!(session.key.starts_with("videos/"));
        assert!(session.key.ends_with("/original.mp4"));
    }

    #[tokio::test]
    async fn complete_assembles_creates_row_then_publishes() {
        let code = VideoCode::parse("abc12345").unwrap();
        let key = keys::source_key(&code, "mp4");

        let mut sessions = MockUploadSessionStore::new();
        let record = SessionRecord {
            code: code.clone(),
            key: key.clone(),
            title: "A title".to_string(),
        };
        sessions
            .expect_get()
            .returning(move |_| Ok(Some(record.clone())));
        sessions.expect_delete().times(1).returning(|_| Ok(()));

        let mut store = MockObjectStore::new();
        store
            .expect_complete_multipart()
            .times(1)
            .returning(|_, _, _| Ok(1024));

        let mut repo = MockVideoRepository::new();
        let code_for_create = code.clone();
        repo.expect_create().times(1).returning(move |new| {
            Ok(pending_video(new.id, code_for_create.clone(), &new.title))
        });
        repo.expect_mark_queued().times(1).returning(|_| Ok(()));

        let mut broker = MockJobBroker::new();
        broker
            .expect_publish()
            .times(1)
            .withf(|subject, payload| {
                let job: TranscodeJob = serde_json::from_slice(payload).unwrap();
                subject == subjects::JOBS_TRANSCODE
                    && job.input_path == "videos/abc12345/original.mp4"
                    && job.output_prefix == "hls/abc12345"
            })
            .returning(|_, _| Ok(()));

        let coordinator = coordinator(store, repo, broker, sessions);
        let video = coordinator
            .complete(
                "upload-1",
                vec![UploadedPart {
                    part_number: 1,
                    etag: "etag-1".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(video.code, code);
    }

    #[tokio::test]
    async fn abort_discards_without_creating_anything() {
        let code = VideoCode::parse("abc12345").unwrap();
        let key = keys::source_key(&code, "mp4");
        let mut sessions = MockUploadSessionStore::new();
        let record = SessionRecord {
            code,
            key: key.clone(),
            title: String::new(),
        };
        sessions
            .expect_get()
            .returning(move |_| Ok(Some(record.clone())));
        sessions.expect_delete().times(1).returning(|_| Ok(()));

        let mut store = MockObjectStore::new();
        store
            .expect_abort_multipart()
            .times(1)
            .returning(|_, _| Ok(()));

        // No create, no publish: the mocks would panic on any call.
        let repo = MockVideoRepository::new();
        let broker = MockJobBroker::new();

        let coordinator = coordinator(store, repo, broker, sessions);
        coordinator.abort("upload-1").await.unwrap();
    }

    #[tokio::test]
    async fn complete_with_unknown_session_fails_cleanly() {
        let mut sessions = MockUploadSessionStore::new();
        sessions.expect_get().returning(|_| Ok(None));

        let coordinator = coordinator(
            MockObjectStore::new(),
            MockVideoRepository::new(),
            MockJobBroker::new(),
            sessions,
        );
        let result = coordinator.complete("nope", Vec::new()).await;
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }
}
