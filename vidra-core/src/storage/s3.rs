//! S3 implementation of the object-store port.
//!
//! Works against AWS proper or any S3-compatible endpoint (MinIO in
//! development, hence the path-style toggle).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use vidra_config::StorageConfig;

use super::{ObjectStore, UploadedPart};
use crate::error::{CoreError, Result};

const DELETE_BATCH: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Store {
    pub async fn connect(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "vidra-static",
        );
        let endpoint = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else if config.use_ssl {
            format!("https://{}", config.endpoint)
        } else {
            format!("http://{}", config.endpoint)
        };

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            "Object store ready: bucket {} at {}",
            config.bucket, config.endpoint
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
        }
    }

    fn presign_config(ttl: Duration) -> Result<PresigningConfig> {
        PresigningConfig::expires_in(ttl)
            .map_err(|e| CoreError::Storage(format!("presign config: {e}")))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service = err.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(CoreError::Storage(format!("head {key}: {service}")))
                }
            }
        }
    }

    async fn put_file(&self, key: &str, path: &Path) -> Result<u64> {
        let size = tokio::fs::metadata(path).await?.len();
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| CoreError::Storage(format!("read {path:?}: {e}")))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(super::content_type_for(path))
            .body(body)
            .send()
            .await
            .map_err(|e| CoreError::Storage(format!("put {key}: {e}")))?;
        debug!("Uploaded {key} ({size} bytes)");
        Ok(size)
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| CoreError::Storage(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<u64> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                return if service.is_no_such_key() {
                    Err(CoreError::NotFound(key.to_string()))
                } else {
                    Err(CoreError::Storage(format!("get {key}: {service}")))
                };
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut body = output.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| CoreError::Storage(format!("stream {key}: {e}")))?
        {
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!("Downloaded {key} to {path:?} ({written} bytes)");
        Ok(written)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| CoreError::Storage(format!("list {prefix}: {e}")))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.list(prefix).await?;
        let total = keys.len() as u64;
        for chunk in keys.chunks(DELETE_BATCH) {
            let identifiers = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder().key(key).build().map_err(|e| {
                        CoreError::Storage(format!("identifier {key}: {e}"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .build()
                .map_err(|e| CoreError::Storage(format!("delete batch: {e}")))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    CoreError::Storage(format!("delete {prefix}: {e}"))
                })?;
        }
        if total > 0 {
            debug!("Deleted {total} object(s) under {prefix}");
        }
        Ok(total)
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(|e| CoreError::Storage(format!("presign get {key}: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    async fn presign_put(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(|e| CoreError::Storage(format!("presign put {key}: {e}")))?;
        Ok(presigned.uri().to_string())
    }

    async fn create_multipart(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                CoreError::Storage(format!("create multipart {key}: {e}"))
            })?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::Storage(format!("no upload id returned for {key}"))
            })
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        ttl: Duration,
    ) -> Result<String> {
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presign_config(ttl)?)
            .await
            .map_err(|e| {
                CoreError::Storage(format!("presign part {part_number}: {e}"))
            })?;
        Ok(presigned.uri().to_string())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<i64> {
        let completed_parts: Vec<CompletedPart> = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag)
                    .build()
            })
            .collect();
        let assembled = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(assembled)
            .send()
            .await
            .map_err(|e| {
                CoreError::Storage(format!("complete multipart {key}: {e}"))
            })?;

        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| CoreError::Storage(format!("head {key}: {e}")))?;
        Ok(head.content_length().unwrap_or_default())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                CoreError::Storage(format!("abort multipart {key}: {e}"))
            })?;
        Ok(())
    }
}
