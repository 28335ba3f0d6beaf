/// Lifecycle of the classified still-frame gallery for one video.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "gallery_status", rename_all = "snake_case")]
pub enum GalleryStatus {
    /// No gallery requested or produced.
    #[default]
    None,
    /// Extraction/classification in flight.
    Pending,
    /// Classified buckets uploaded; awaiting operator approval of the
    /// super-safe set before public surfacing.
    PendingReview,
    /// Approved and publicly surfaced.
    Ready,
    /// Classification failed; the transcode itself still succeeded.
    Failed,
}

/// NSFW classification score below which an image is eligible for the
/// super-safe bucket.
pub const SUPER_SAFE_NSFW_MAX: f64 = 0.15;
/// Minimum detected-face score required for the super-safe bucket.
pub const SUPER_SAFE_FACE_MIN: f64 = 0.1;
/// NSFW score below which an image lands in the safe bucket.
pub const SAFE_NSFW_MAX: f64 = 0.30;

/// Disjoint buckets a classified still can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GalleryTier {
    /// Strictly below the NSFW threshold with a detected face. Public SEO
    /// surfaces.
    SuperSafe,
    /// Below the relaxed threshold but not super-safe. Lazy-loaded
    /// secondary views.
    Safe,
    /// At or above the relaxed threshold. Gated behind membership.
    Nsfw,
}

impl GalleryTier {
    /// Buckets an image by its classifier scores.
    pub fn classify(nsfw_score: f64, face_score: f64) -> Self {
        if nsfw_score < SUPER_SAFE_NSFW_MAX && face_score >= SUPER_SAFE_FACE_MIN {
            GalleryTier::SuperSafe
        } else if nsfw_score < SAFE_NSFW_MAX {
            GalleryTier::Safe
        } else {
            GalleryTier::Nsfw
        }
    }

    /// Directory name under `gallery/{code}/`.
    pub fn dir_name(&self) -> &'static str {
        match self {
            GalleryTier::SuperSafe => "super_safe",
            GalleryTier::Safe => "safe",
            GalleryTier::Nsfw => "nsfw",
        }
    }
}

/// Per-tier tallies for one gallery run. `total()` is derived, never
/// stored independently: `gallery_count = super_safe + safe`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GalleryCounts {
    pub source: i32,
    pub super_safe: i32,
    pub safe: i32,
    pub nsfw: i32,
}

impl GalleryCounts {
    /// The publicly countable gallery size. NSFW stills are excluded.
    pub fn total(&self) -> i32 {
        self.super_safe + self.safe
    }

    pub fn record(&mut self, tier: GalleryTier) {
        match tier {
            GalleryTier::SuperSafe => self.super_safe += 1,
            GalleryTier::Safe => self.safe += 1,
            GalleryTier::Nsfw => self.nsfw += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_respects_thresholds() {
        assert_eq!(GalleryTier::classify(0.05, 0.5), GalleryTier::SuperSafe);
        // Low NSFW but no face: safe, not super-safe.
        assert_eq!(GalleryTier::classify(0.05, 0.01), GalleryTier::Safe);
        assert_eq!(GalleryTier::classify(0.2, 0.9), GalleryTier::Safe);
        assert_eq!(GalleryTier::classify(0.30, 0.9), GalleryTier::Nsfw);
        assert_eq!(GalleryTier::classify(0.95, 0.0), GalleryTier::Nsfw);
    }

    #[test]
    fn boundary_scores() {
        // Exactly at the super-safe NSFW cut falls through to safe.
        assert_eq!(GalleryTier::classify(0.15, 0.5), GalleryTier::Safe);
        // Exactly at the face minimum qualifies.
        assert_eq!(GalleryTier::classify(0.0, 0.1), GalleryTier::SuperSafe);
    }

    #[test]
    fn total_is_derived_from_safe_tiers() {
        let mut counts = GalleryCounts::default();
        counts.record(GalleryTier::SuperSafe);
        counts.record(GalleryTier::SuperSafe);
        counts.record(GalleryTier::Safe);
        counts.record(GalleryTier::Nsfw);
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.nsfw, 1);
    }
}
