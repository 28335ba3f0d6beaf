use crate::error::ModelError;

/// One rung of the adaptive HLS ladder.
///
/// The ladder is a closed set; source material above 1080p is still encoded
/// at 1080p and below, the source quality label (see
/// [`source_quality_label`]) only affects the stored `quality` tag.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum Quality {
    #[serde(rename = "360p")]
    Q360p,
    #[serde(rename = "480p")]
    Q480p,
    #[serde(rename = "720p")]
    Q720p,
    #[serde(rename = "1080p")]
    Q1080p,
}

impl Quality {
    pub const ALL: [Quality; 4] =
        [Quality::Q1080p, Quality::Q720p, Quality::Q480p, Quality::Q360p];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Q1080p => "1080p",
            Self::Q720p => "720p",
            Self::Q480p => "480p",
            Self::Q360p => "360p",
        }
    }

    /// Target frame size, even dimensions as required by most encoders.
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            Self::Q1080p => (1920, 1080),
            Self::Q720p => (1280, 720),
            Self::Q480p => (854, 480),
            Self::Q360p => (640, 360),
        }
    }

    pub fn height(&self) -> u32 {
        self.resolution().1
    }

    /// Peak bandwidth advertised in the master playlist, bits per second.
    pub fn bandwidth(&self) -> u64 {
        match self {
            Self::Q1080p => 5_000_000,
            Self::Q720p => 2_500_000,
            Self::Q480p => 1_200_000,
            Self::Q360p => 600_000,
        }
    }

    /// Target video bitrate handed to the encoder, kbps.
    pub fn video_bitrate_kbps(&self) -> u32 {
        match self {
            Self::Q1080p => 5000,
            Self::Q720p => 2500,
            Self::Q480p => 1200,
            Self::Q360p => 600,
        }
    }

    /// Drops ladder rungs taller than the source, preserving request order.
    /// A 480p source against `[1080p, 720p]` yields an empty ladder, which
    /// callers widen to the tallest rung at or below the source height.
    pub fn filter_ladder(requested: &[Quality], source_height: u32) -> Vec<Quality> {
        let mut ladder: Vec<Quality> = requested
            .iter()
            .copied()
            .filter(|q| q.height() <= source_height)
            .collect();
        if ladder.is_empty() {
            if let Some(fallback) = Quality::ALL
                .iter()
                .copied()
                .find(|q| q.height() <= source_height)
            {
                ladder.push(fallback);
            }
        }
        ladder
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Quality {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1080p" => Ok(Self::Q1080p),
            "720p" => Ok(Self::Q720p),
            "480p" => Ok(Self::Q480p),
            "360p" => Ok(Self::Q360p),
            other => Err(ModelError::InvalidQuality(other.to_string())),
        }
    }
}

/// Video codec selection for the encoder.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    H264,
    H265,
    Av1,
}

impl Codec {
    /// The software encoder name handed to the external encoder binary.
    pub fn encoder_name(&self) -> &'static str {
        match self {
            Self::H264 => "libx264",
            Self::H265 => "libx265",
            Self::Av1 => "libaom-av1",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
            Self::H265 => f.write_str("h265"),
            Self::Av1 => f.write_str("av1"),
        }
    }
}

impl std::str::FromStr for Codec {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" => Ok(Self::H264),
            "h265" | "hevc" => Ok(Self::H265),
            "av1" => Ok(Self::Av1),
            other => Err(ModelError::InvalidQuality(other.to_string())),
        }
    }
}

/// Maps a probed source height to the quality tag stored on the row.
pub fn source_quality_label(height: u32) -> &'static str {
    match height {
        h if h >= 2160 => "4K",
        h if h >= 1440 => "1440p",
        h if h >= 1080 => "1080p",
        h if h >= 720 => "720p",
        h if h >= 480 => "480p",
        _ => "SD",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_drops_rungs_above_source() {
        let requested = [Quality::Q1080p, Quality::Q720p, Quality::Q480p];
        let ladder = Quality::filter_ladder(&requested, 720);
        assert_eq!(ladder, vec![Quality::Q720p, Quality::Q480p]);
    }

    #[test]
    fn ladder_falls_back_to_tallest_fitting_rung() {
        // [1080p, 720p] against a 480p source -> single-variant 480p ladder.
        let requested = [Quality::Q1080p, Quality::Q720p];
        let ladder = Quality::filter_ladder(&requested, 480);
        assert_eq!(ladder, vec![Quality::Q480p]);
    }

    #[test]
    fn ladder_empty_for_tiny_sources() {
        let requested = [Quality::Q1080p];
        assert!(Quality::filter_ladder(&requested, 240).is_empty());
    }

    #[test]
    fn source_labels() {
        assert_eq!(source_quality_label(2160), "4K");
        assert_eq!(source_quality_label(1440), "1440p");
        assert_eq!(source_quality_label(1080), "1080p");
        assert_eq!(source_quality_label(720), "720p");
        assert_eq!(source_quality_label(480), "480p");
        assert_eq!(source_quality_label(360), "SD");
    }

    #[test]
    fn labels_round_trip() {
        for q in Quality::ALL {
            assert_eq!(q.label().parse::<Quality>().unwrap(), q);
        }
    }

    #[test]
    fn serde_uses_display_labels() {
        let json = serde_json::to_string(&Quality::Q720p).unwrap();
        assert_eq!(json, "\"720p\"");
        let back: Quality = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Quality::Q720p);
    }
}
