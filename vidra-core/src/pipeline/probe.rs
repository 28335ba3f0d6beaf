//! Source probing through the external prober binary.

use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::error::JobError;

/// Technical metadata of the source, learned before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub fps: f64,
}

#[derive(Debug, Clone)]
pub struct FfprobeRunner {
    path: String,
}

impl FfprobeRunner {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Probes a local path or URL.
    pub async fn probe(&self, input: &str) -> Result<MediaProbe, JobError> {
        let output = Command::new(&self.path)
            .args([
                "-v",
                "error",
                "-show_format",
                "-show_streams",
                "-of",
                "json",
                input,
            ])
            .output()
            .await
            .map_err(|e| JobError::Encoder(format!("spawn prober: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JobError::Encoder(format!(
                "probe exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| JobError::Encoder(format!("probe output: {e}")))?;
        let probe = parse_probe(&json)?;
        debug!(
            "Probed {input}: {}x{} {}s {}",
            probe.width, probe.height, probe.duration_secs, probe.video_codec
        );
        Ok(probe)
    }
}

/// Parses the prober's JSON document.
pub fn parse_probe(json: &Value) -> Result<MediaProbe, JobError> {
    let streams = json["streams"]
        .as_array()
        .ok_or_else(|| JobError::Encoder("probe output has no streams".into()))?;

    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"))
        .ok_or_else(|| JobError::Encoder("source has no video stream".into()))?;

    let width = video["width"].as_u64().unwrap_or(0) as u32;
    let height = video["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(JobError::Encoder("source has no frame size".into()));
    }

    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            video["duration"].as_str().and_then(|d| d.parse::<f64>().ok())
        })
        .filter(|d| *d > 0.0)
        .ok_or_else(|| JobError::Encoder("source has no duration".into()))?;

    let audio_codec = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("audio"))
        .and_then(|s| s["codec_name"].as_str())
        .map(str::to_string);

    Ok(MediaProbe {
        duration_secs,
        width,
        height,
        video_codec: video["codec_name"].as_str().unwrap_or("unknown").to_string(),
        audio_codec,
        fps: parse_frame_rate(video["r_frame_rate"].as_str().unwrap_or("")),
    })
}

/// Frame rates arrive as rationals like `30000/1001`.
fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(1.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => raw.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "format": { "duration": "1800.480000" },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1280,
                    "height": 720,
                    "r_frame_rate": "30000/1001"
                },
                { "codec_type": "audio", "codec_name": "aac" }
            ]
        })
    }

    #[test]
    fn parses_full_document() {
        let probe = parse_probe(&sample()).unwrap();
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.height, 720);
        assert_eq!(probe.video_codec, "h264");
        assert_eq!(probe.audio_codec.as_deref(), Some("aac"));
        assert!((probe.duration_secs - 1800.48).abs() < 1e-6);
        assert!((probe.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn missing_video_stream_is_an_error() {
        let doc = json!({
            "format": { "duration": "10.0" },
            "streams": [{ "codec_type": "audio", "codec_name": "aac" }]
        });
        assert!(parse_probe(&doc).is_err());
    }

    #[test]
    fn missing_duration_is_an_error() {
        let doc = json!({
            "format": {},
            "streams": [{
                "codec_type": "video",
                "codec_name": "h264",
                "width": 640,
                "height": 360,
                "r_frame_rate": "25/1"
            }]
        });
        assert!(parse_probe(&doc).is_err());
    }

    #[test]
    fn integer_frame_rates_parse() {
        assert_eq!(parse_frame_rate("25/1"), 25.0);
        assert_eq!(parse_frame_rate("24"), 24.0);
        assert_eq!(parse_frame_rate(""), 0.0);
    }
}
