//! The transcoding pipeline.
//!
//! Stage order and coarse progress waypoints:
//! fetch (5) -> probe (10) -> encode (10-85) -> master playlist (86) ->
//! thumbnail (88) -> gallery (88-96, optional) -> upload (96-99). The
//! final commit (100) belongs to the job handler, which owns the
//! repository and the broker.
//!
//! Any stage failure aborts downstream stages; scratch is removed on
//! every exit path. Artifacts already uploaded are tolerated, the next
//! attempt overwrites them by key.

pub mod encode;
pub mod gallery;
pub mod playlist;
pub mod probe;
pub mod progress;
pub mod scratch;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vidra_model::{CompletionInfo, Quality, TranscodeJob};

use crate::error::JobError;
use crate::storage::ObjectStore;

pub use encode::FfmpegRunner;
pub use gallery::{GalleryPipeline, GalleryResult, GalleryRun};
pub use playlist::master_playlist;
pub use probe::{FfprobeRunner, MediaProbe};
pub use progress::{PipelineProgress, ProgressSink};
pub use scratch::ScratchDir;

/// Gallery disposition carried alongside the completion info.
#[derive(Debug, Clone, PartialEq)]
pub enum GalleryOutcome {
    /// Not requested or not configured.
    Disabled,
    /// Requested but not produced; the transcode still succeeded.
    Skipped(String),
    Classified(GalleryResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub completion: CompletionInfo,
    pub gallery: GalleryOutcome,
}

pub struct TranscodePipeline {
    store: Arc<dyn ObjectStore>,
    prober: FfprobeRunner,
    encoder: FfmpegRunner,
    gallery: Option<GalleryPipeline>,
    scratch_root: PathBuf,
    presign_ttl: Duration,
}

impl std::fmt::Debug for TranscodePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodePipeline")
            .field("scratch_root", &self.scratch_root)
            .finish_non_exhaustive()
    }
}

impl TranscodePipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prober: FfprobeRunner,
        encoder: FfmpegRunner,
        gallery: Option<GalleryPipeline>,
        scratch_root: PathBuf,
        presign_ttl: Duration,
    ) -> Self {
        Self {
            store,
            prober,
            encoder,
            gallery,
            scratch_root,
            presign_ttl,
        }
    }

    pub async fn run(
        &self,
        job: &TranscodeJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, JobError> {
        let scratch = ScratchDir::create(&self.scratch_root).await?;
        let result = self.run_staged(job, &scratch, progress, cancel).await;
        scratch.remove().await;
        result
    }

    async fn run_staged(
        &self,
        job: &TranscodeJob,
        scratch: &ScratchDir,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput, JobError> {
        // Stage: fetch.
        if !self.store.exists(&job.input_path).await? {
            return Err(JobError::SourceNotFound(job.input_path.clone()));
        }
        let input = if job.use_byte_range {
            // The encoder reads straight off the store via a ranged URL;
            // nothing is staged locally.
            self.store
                .presign_get(&job.input_path, self.presign_ttl)
                .await?
        } else {
            let ext = Path::new(&job.input_path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("mp4");
            let local = scratch.join(format!("source.{ext}"));
            self.store.download_to(&job.input_path, &local).await?;
            local.to_string_lossy().into_owned()
        };
        progress.emit("fetch", 5, "source staged").await;

        // Stage: probe.
        let media = self.prober.probe(&input).await?;
        progress
            .emit(
                "probe",
                10,
                format!(
                    "{}x{}, {:.0}s, {}",
                    media.width, media.height, media.duration_secs,
                    media.video_codec
                ),
            )
            .await;

        let mut ladder = Quality::filter_ladder(&job.qualities, media.height);
        if ladder.is_empty() {
            warn!(
                "Source {} is below every requested rung ({}p); encoding 360p only",
                job.video_code, media.height
            );
            ladder.push(Quality::Q360p);
        }

        // Stage: encode, 10 -> 85 across the ladder.
        let out_dir = scratch.join("out");
        let rung_count = ladder.len() as u32;
        for (i, quality) in ladder.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let band = (
                (10 + 75 * i as u32 / rung_count) as u8,
                (10 + 75 * (i as u32 + 1) / rung_count) as u8,
            );
            self.encoder
                .encode_variant(
                    &input,
                    *quality,
                    job.codec,
                    &out_dir.join(quality.label()),
                    media.duration_secs,
                    band,
                    progress,
                    cancel,
                )
                .await?;
        }

        // Stage: master playlist.
        let playlist = master_playlist(&ladder);
        tokio::fs::write(out_dir.join("master.m3u8"), playlist).await?;
        progress.emit("master_playlist", 86, "master playlist written").await;

        // Stage: thumbnail at mid-duration.
        self.encoder
            .capture_frame(
                &input,
                media.duration_secs / 2.0,
                &out_dir.join("thumb.jpg"),
                cancel,
            )
            .await?;
        progress.emit("thumbnail", 88, "thumbnail captured").await;

        // Stage: gallery (optional).
        let gallery = match (&self.gallery, job.generate_gallery) {
            (Some(pipeline), true) => {
                match pipeline
                    .run(
                        &job.video_code,
                        &input,
                        media.duration_secs,
                        scratch.path(),
                        progress,
                        cancel,
                    )
                    .await
                {
                    Ok(GalleryRun::Done(result)) => {
                        GalleryOutcome::Classified(result)
                    }
                    Ok(GalleryRun::Skipped(reason)) => {
                        GalleryOutcome::Skipped(reason.to_string())
                    }
                    Err(JobError::Classifier(reason)) => {
                        warn!(
                            "Gallery classification failed for {}; skipping: {reason}",
                            job.video_code
                        );
                        GalleryOutcome::Skipped(reason)
                    }
                    Err(other) => return Err(other),
                }
            }
            _ => GalleryOutcome::Disabled,
        };

        // Stage: upload. Evict stale artifacts from an earlier ladder
        // first; within the prefix every filename is deterministic.
        self.store.delete_prefix(&job.output_prefix).await?;
        let files = collect_files(&out_dir).await?;
        let mut disk_usage_bytes: i64 = 0;
        let mut quality_sizes: HashMap<String, i64> = HashMap::new();
        let file_count = files.len().max(1);
        for (i, file) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let rel = file
                .strip_prefix(&out_dir)
                .map_err(|_| JobError::Storage("upload path escape".into()))?;
            let key = format!("{}/{}", job.output_prefix, rel.to_string_lossy());
            let size = self.store.put_file(&key, file).await? as i64;
            disk_usage_bytes += size;
            if let Some(bucket) = quality_bucket(rel) {
                *quality_sizes.entry(bucket).or_insert(0) += size;
            }
            progress
                .emit(
                    "upload",
                    progress::band_percent(
                        (96, 99),
                        (i + 1) as f64 / file_count as f64,
                    ),
                    format!("uploaded {}", rel.to_string_lossy()),
                )
                .await;
        }

        let top_quality = ladder
            .iter()
            .max_by_key(|q| q.height())
            .map(|q| q.label().to_string())
            .unwrap_or_else(|| "SD".to_string());

        info!(
            "Transcode of {} done: {} rung(s), {} byte(s)",
            job.video_code,
            ladder.len(),
            disk_usage_bytes
        );

        Ok(PipelineOutput {
            completion: CompletionInfo {
                hls_path: job.output_prefix.clone(),
                thumbnail_path: format!("{}/thumb.jpg", job.output_prefix),
                duration_sec: media.duration_secs.round() as i32,
                quality: top_quality,
                disk_usage_bytes,
                quality_sizes,
            },
            gallery,
        })
    }
}

/// Every file under `root`, depth-first, in stable order.
async fn collect_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut stack = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Top-level subdirectory a file's size is accounted under; root-level
/// files (master playlist, thumbnail) are counted in the total only.
fn quality_bucket(rel: &Path) -> Option<String> {
    let mut components = rel.components();
    let first = components.next()?;
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_by_top_level_dir() {
        assert_eq!(
            quality_bucket(Path::new("720p/seg-001.ts")),
            Some("720p".to_string())
        );
        assert_eq!(
            quality_bucket(Path::new("480p/index.m3u8")),
            Some("480p".to_string())
        );
        assert_eq!(quality_bucket(Path::new("master.m3u8")), None);
        assert_eq!(quality_bucket(Path::new("thumb.jpg")), None);
    }

    #[tokio::test]
    async fn collect_files_walks_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        tokio::fs::create_dir_all(root.join("720p")).await.unwrap();
        tokio::fs::create_dir_all(root.join("480p")).await.unwrap();
        for rel in [
            "master.m3u8",
            "thumb.jpg",
            "720p/index.m3u8",
            "720p/seg-000.ts",
            "480p/index.m3u8",
        ] {
            tokio::fs::write(root.join(rel), b"x").await.unwrap();
        }

        let files = collect_files(root).await.unwrap();
        assert_eq!(files.len(), 5);
        let rels: Vec<String> = files
            .iter()
            .map(|f| {
                f.strip_prefix(root).unwrap().to_string_lossy().into_owned()
            })
            .collect();
        assert!(rels.contains(&"720p/seg-000.ts".to_string()));
        assert!(rels.contains(&"master.m3u8".to_string()));
    }
}
