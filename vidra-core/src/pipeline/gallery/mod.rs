//! Classified three-tier gallery extraction.
//!
//! Runs extraction rounds over round-specific slices of the duration
//! until the super-safe and combined quotas are met or the round cap is
//! reached, classifies each round through the external classifier, and
//! uploads the disjoint buckets under `gallery/{code}/`.

pub mod classifier;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vidra_model::{GalleryCounts, GalleryTier, VideoCode};

use super::encode::FfmpegRunner;
use super::progress::{ProgressSink, band_percent};
use crate::error::JobError;
use crate::keys;
use crate::storage::ObjectStore;

pub use classifier::{CommandClassifier, FrameClassifier, FrameScore};

/// Quotas and caps for the extraction loop.
pub const MIN_SUPER_SAFE: usize = 10;
pub const MIN_COMBINED: usize = 12;
pub const MAX_ROUNDS: usize = 5;
pub const FRAMES_PER_ROUND: usize = 12;
pub const NSFW_KEEP: usize = 30;
pub const MIN_TIMESTAMP_GAP_SECS: f64 = 3.0;

/// Percent band the gallery stage reports inside.
const GALLERY_BAND: (u8, u8) = (88, 96);

/// One extraction round: a slice of the duration plus a sub-second
/// offset so repeated slices do not land on the same frames.
#[derive(Debug, Clone, Copy)]
pub struct RoundPlan {
    pub name: &'static str,
    pub start_frac: f64,
    pub end_frac: f64,
    pub offset_secs: f64,
}

pub const ROUNDS: [RoundPlan; MAX_ROUNDS] = [
    RoundPlan {
        name: "standard",
        start_frac: 0.05,
        end_frac: 0.95,
        offset_secs: 0.0,
    },
    RoundPlan {
        name: "intro",
        start_frac: 0.0,
        end_frac: 0.15,
        offset_secs: 0.0,
    },
    RoundPlan {
        name: "outro",
        start_frac: 0.90,
        end_frac: 1.0,
        offset_secs: 0.0,
    },
    RoundPlan {
        name: "gap_fill",
        start_frac: 0.05,
        end_frac: 0.95,
        offset_secs: 0.5,
    },
    RoundPlan {
        name: "dense_intro",
        start_frac: 0.0,
        end_frac: 0.10,
        offset_secs: 0.25,
    },
];

/// Prevents near-duplicate captures across rounds.
#[derive(Debug, Default)]
pub struct TimestampTracker {
    used: Vec<f64>,
}

impl TimestampTracker {
    /// Claims a timestamp unless one within the minimum gap was already
    /// taken by an earlier round.
    pub fn try_claim(&mut self, ts: f64) -> bool {
        if self
            .used
            .iter()
            .any(|u| (u - ts).abs() < MIN_TIMESTAMP_GAP_SECS)
        {
            return false;
        }
        self.used.push(ts);
        true
    }

    pub fn claimed(&self) -> usize {
        self.used.len()
    }
}

/// Capture timestamps for one round: evenly spread over the plan's
/// slice, shifted by the plan offset, deduplicated through the tracker.
pub fn round_timestamps(
    plan: &RoundPlan,
    duration_secs: f64,
    count: usize,
    tracker: &mut TimestampTracker,
) -> Vec<f64> {
    let start = plan.start_frac * duration_secs + plan.offset_secs;
    let end = (plan.end_frac * duration_secs).min(duration_secs - 0.5);
    if end <= start || count == 0 {
        return Vec::new();
    }
    let step = (end - start) / count as f64;
    (0..count)
        .map(|i| start + step * i as f64)
        .filter(|ts| tracker.try_claim(*ts))
        .collect()
}

/// Outcome of one gallery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum GalleryRun {
    /// Gallery was not produced; the transcode still succeeds.
    Skipped(&'static str),
    Done(GalleryResult),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryResult {
    /// Storage prefix the buckets were uploaded under.
    pub path: String,
    pub counts: GalleryCounts,
}

pub struct GalleryPipeline {
    store: Arc<dyn ObjectStore>,
    classifier: Arc<dyn FrameClassifier>,
    encoder: FfmpegRunner,
    min_duration_secs: u32,
}

impl std::fmt::Debug for GalleryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryPipeline")
            .field("min_duration_secs", &self.min_duration_secs)
            .finish_non_exhaustive()
    }
}

impl GalleryPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn FrameClassifier>,
        encoder: FfmpegRunner,
        min_duration_secs: u32,
    ) -> Self {
        Self {
            store,
            classifier,
            encoder,
            min_duration_secs,
        }
    }

    /// Runs the full extraction/classification/upload loop.
    ///
    /// Classifier errors propagate as [`JobError::Classifier`]; the
    /// caller downgrades them to a skip.
    pub async fn run(
        &self,
        code: &VideoCode,
        input: &str,
        duration_secs: f64,
        scratch: &Path,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<GalleryRun, JobError> {
        if duration_secs < self.min_duration_secs as f64 {
            debug!(
                "Video {code} is {duration_secs:.0}s, below the {}s gallery minimum",
                self.min_duration_secs
            );
            return Ok(GalleryRun::Skipped("below minimum gallery duration"));
        }

        let rounds_root = scratch.join("gallery_rounds");
        let out_root = scratch.join("gallery_out");
        for tier in [GalleryTier::SuperSafe, GalleryTier::Safe, GalleryTier::Nsfw] {
            tokio::fs::create_dir_all(out_root.join(tier.dir_name())).await?;
        }

        let mut tracker = TimestampTracker::default();
        let mut counts = GalleryCounts::default();
        let mut nsfw_pool: Vec<(PathBuf, f64)> = Vec::new();

        for (round_idx, plan) in ROUNDS.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let timestamps = round_timestamps(
                plan,
                duration_secs,
                FRAMES_PER_ROUND,
                &mut tracker,
            );
            if timestamps.is_empty() {
                continue;
            }

            let round_dir = rounds_root.join(plan.name);
            tokio::fs::create_dir_all(&round_dir).await?;
            for (j, ts) in timestamps.iter().enumerate() {
                // Filename offset per round so rounds never collide.
                let name = format!("{:03}.jpg", round_idx * 100 + j);
                self.encoder
                    .capture_frame(input, *ts, &round_dir.join(name), cancel)
                    .await?;
                counts.source += 1;
            }

            let scores = self.classifier.classify_dir(&round_dir).await?;
            bucket_round(&round_dir, &out_root, &scores, &mut counts, &mut nsfw_pool)
                .await?;

            progress
                .emit(
                    "gallery",
                    band_percent(
                        GALLERY_BAND,
                        (round_idx + 1) as f64 / MAX_ROUNDS as f64,
                    ),
                    format!(
                        "gallery round {} done: {} super-safe, {} safe",
                        plan.name, counts.super_safe, counts.safe
                    ),
                )
                .await;

            if quotas_met(&counts) {
                break;
            }
        }

        truncate_nsfw(&mut nsfw_pool, NSFW_KEEP, &mut counts).await?;

        let prefix = keys::gallery_prefix(code);
        self.store.delete_prefix(&prefix).await?;
        for tier in [GalleryTier::SuperSafe, GalleryTier::Safe, GalleryTier::Nsfw] {
            let dir = out_root.join(tier.dir_name());
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_name = entry.file_name();
                let key = format!(
                    "{prefix}/{}/{}",
                    tier.dir_name(),
                    file_name.to_string_lossy()
                );
                self.store.put_file(&key, &entry.path()).await?;
            }
        }

        info!(
            "Gallery for {code}: {} source frame(s) -> {} super-safe, {} safe, {} nsfw",
            counts.source, counts.super_safe, counts.safe, counts.nsfw
        );
        Ok(GalleryRun::Done(GalleryResult {
            path: prefix,
            counts,
        }))
    }
}

fn quotas_met(counts: &GalleryCounts) -> bool {
    counts.super_safe as usize >= MIN_SUPER_SAFE
        && (counts.super_safe + counts.safe) as usize >= MIN_COMBINED
}

/// Moves a classified round into the tier buckets.
async fn bucket_round(
    round_dir: &Path,
    out_root: &Path,
    scores: &[FrameScore],
    counts: &mut GalleryCounts,
    nsfw_pool: &mut Vec<(PathBuf, f64)>,
) -> Result<(), JobError> {
    for score in scores {
        let src = round_dir.join(&score.file);
        if !src.exists() {
            continue;
        }
        let tier = GalleryTier::classify(score.nsfw_score, score.face_score);
        let dest = out_root.join(tier.dir_name()).join(&score.file);
        tokio::fs::rename(&src, &dest).await?;
        counts.record(tier);
        if tier == GalleryTier::Nsfw {
            nsfw_pool.push((dest, score.aesthetic_score));
        }
    }
    Ok(())
}

/// Keeps the `keep` most aesthetic NSFW stills, deleting the rest
/// locally before upload.
async fn truncate_nsfw(
    pool: &mut Vec<(PathBuf, f64)>,
    keep: usize,
    counts: &mut GalleryCounts,
) -> Result<(), JobError> {
    if pool.len() <= keep {
        return Ok(());
    }
    pool.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (path, _) in pool.drain(keep..) {
        tokio::fs::remove_file(&path).await?;
        counts.nsfw -= 1;
    }
    Ok(())
}
