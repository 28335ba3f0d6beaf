//! Object-store abstraction.
//!
//! A versionless blob namespace keyed by path strings. All worker writes
//! are path-idempotent (see [`crate::keys`]); overwrites are allowed and
//! no ETag preconditions are used.

pub mod s3;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use s3::S3Store;

/// One part of a completed multipart upload, as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UploadedPart {
    pub part_number: i32,
    pub etag: String,
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Uploads a local file; returns its size in bytes.
    async fn put_file(&self, key: &str, path: &Path) -> Result<u64>;

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    /// Streams an object to a local file without full buffering; returns
    /// the byte count. Missing keys surface as [`crate::CoreError::NotFound`].
    async fn download_to(&self, key: &str, path: &Path) -> Result<u64>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deletes every key under the prefix; returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String>;

    async fn presign_put(&self, key: &str, ttl: Duration) -> Result<String>;

    /// Opens a multipart session; returns the upload id.
    async fn create_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String>;

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> Result<String>;

    /// Assembles the object; returns its final size in bytes.
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<i64>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// Content type by file extension for the artifact set we produce.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        Some("vtt") => "text/vtt",
        _ => "application/octet-stream",
    }
}
