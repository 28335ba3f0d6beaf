//! Encoder invocation through the external binary's narrow interface.
//!
//! One invocation per ladder rung; progress is recovered by parsing the
//! encoder's stderr `time=` ticks against the probed source duration.

use std::collections::VecDeque;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vidra_model::{Codec, Quality};

use super::progress::{ProgressSink, band_percent};
use crate::error::JobError;

const ERROR_TAIL_LINES: usize = 10;

#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg_path: String,
    preset: String,
    hls_time_secs: u32,
    gop_alignment: bool,
}

impl FfmpegRunner {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        preset: impl Into<String>,
        hls_time_secs: u32,
        gop_alignment: bool,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            preset: preset.into(),
            hls_time_secs,
            gop_alignment,
        }
    }

    /// Argument vector for one HLS variant. Split out for testability.
    pub fn variant_args(
        &self,
        input: &str,
        quality: Quality,
        codec: Codec,
        out_dir: &Path,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-y".into(),
            "-i".into(),
            input.into(),
            "-c:v".into(),
            codec.encoder_name().into(),
        ];

        // Presets only apply to the x264/x265 family.
        if matches!(codec, Codec::H264 | Codec::H265) {
            args.push("-preset".into());
            args.push(self.preset.clone());
        }

        args.push("-b:v".into());
        args.push(format!("{}k", quality.video_bitrate_kbps()));
        args.push("-vf".into());
        args.push(format!("scale=-2:{}", quality.height()));
        args.push("-c:a".into());
        args.push("aac".into());
        args.push("-b:a".into());
        args.push("128k".into());
        args.push("-map".into());
        args.push("0:v:0".into());
        args.push("-map".into());
        args.push("0:a:0?".into());

        if self.gop_alignment {
            // Pin keyframes to segment boundaries for clean HLS cuts.
            args.push("-force_key_frames".into());
            args.push(format!("expr:gte(t,n_forced*{})", self.hls_time_secs));
        }

        args.push("-f".into());
        args.push("hls".into());
        args.push("-hls_time".into());
        args.push(self.hls_time_secs.to_string());
        args.push("-hls_playlist_type".into());
        args.push("vod".into());
        args.push("-hls_list_size".into());
        args.push("0".into());
        args.push("-hls_segment_type".into());
        args.push("mpegts".into());
        args.push("-start_number".into());
        args.push("0".into());
        args.push("-hls_segment_filename".into());
        args.push(out_dir.join("seg-%03d.ts").to_string_lossy().into_owned());
        args.push(out_dir.join("index.m3u8").to_string_lossy().into_owned());

        args
    }

    /// Encodes one variant, mapping per-quality completion into the
    /// given percent band.
    pub async fn encode_variant(
        &self,
        input: &str,
        quality: Quality,
        codec: Codec,
        out_dir: &Path,
        duration_secs: f64,
        band: (u8, u8),
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let args = self.variant_args(input, quality, codec, out_dir);
        debug!("Encoder invocation: {} {:?}", self.ffmpeg_path, args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| JobError::Encoder(format!("spawn encoder: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| JobError::Encoder("encoder stderr unavailable".into()))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(ERROR_TAIL_LINES);
        let label = quality.label();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    warn!("Encoder cancelled while producing {label}");
                    return Err(JobError::Cancelled);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if tail.len() == ERROR_TAIL_LINES {
                                tail.pop_front();
                            }
                            tail.push_back(line.clone());
                            if let Some(secs) = extract_time_seconds(&line) {
                                let fraction = if duration_secs > 0.0 {
                                    secs / duration_secs
                                } else {
                                    0.0
                                };
                                progress
                                    .emit(
                                        "encode",
                                        band_percent(band, fraction),
                                        format!("encoding {label}"),
                                    )
                                    .await;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Encoder stderr read failed: {e}");
                            break;
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| JobError::Encoder(format!("wait encoder: {e}")))?;
        if !status.success() {
            let detail: Vec<String> = tail.into_iter().collect();
            return Err(JobError::Encoder(format!(
                "encoder exited with {} for {label}: {}",
                status,
                detail.join("\n")
            )));
        }
        Ok(())
    }

    /// Captures a single frame at the given timestamp as a JPEG still.
    pub async fn capture_frame(
        &self,
        input: &str,
        timestamp_secs: f64,
        out_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut child = Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-y",
                "-ss",
                &format!("{timestamp_secs:.3}"),
                "-i",
                input,
                "-frames:v",
                "1",
                "-q:v",
                "2",
            ])
            .arg(out_path)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| JobError::Encoder(format!("spawn encoder: {e}")))?;

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(JobError::Cancelled)
            }
            status = child.wait() => {
                let status = status
                    .map_err(|e| JobError::Encoder(format!("wait encoder: {e}")))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(JobError::Encoder(format!(
                        "frame capture at {timestamp_secs:.1}s exited with {status}"
                    )))
                }
            }
        }
    }
}

/// Pulls the `time=HH:MM:SS.ff` tick out of an encoder progress line.
pub fn extract_time_seconds(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = line[start..].trim_start();
    let token = rest.split_whitespace().next()?;
    parse_clock(token)
}

fn parse_clock(token: &str) -> Option<f64> {
    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> FfmpegRunner {
        FfmpegRunner::new("ffmpeg", "veryfast", 6, true)
    }

    #[test]
    fn extracts_progress_time() {
        let line = "frame= 1234 fps= 30.0 q=28.0 size=   12345KiB \
                    time=00:00:41.36 bitrate= 244.8kbits/s speed=1.23x";
        let secs = extract_time_seconds(line).unwrap();
        assert!((secs - 41.36).abs() < 1e-6);
    }

    #[test]
    fn ignores_lines_without_time() {
        assert!(extract_time_seconds("Stream mapping:").is_none());
        assert!(extract_time_seconds("time=N/A bitrate=N/A").is_none());
    }

    #[test]
    fn variant_args_shape() {
        let args = runner().variant_args(
            "/scratch/source.mp4",
            Quality::Q720p,
            Codec::H264,
            Path::new("/scratch/out/720p"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-preset veryfast"));
        assert!(joined.contains("-b:v 2500k"));
        assert!(joined.contains("scale=-2:720"));
        assert!(joined.contains("-hls_time 6"));
        assert!(joined.contains("-hls_playlist_type vod"));
        assert!(joined.contains("expr:gte(t,n_forced*6)"));
        assert!(joined.contains("/scratch/out/720p/seg-%03d.ts"));
        assert!(joined.ends_with("/scratch/out/720p/index.m3u8"));
    }

    #[test]
    fn av1_skips_preset_and_gop_alignment_is_optional() {
        let runner = FfmpegRunner::new("ffmpeg", "veryfast", 4, false);
        let args = runner.variant_args(
            "in.mp4",
            Quality::Q480p,
            Codec::Av1,
            Path::new("out/480p"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libaom-av1"));
        assert!(!joined.contains("-preset"));
        assert!(!joined.contains("force_key_frames"));
        assert!(joined.contains("-hls_time 4"));
    }
}
