use crate::error::{ModelError, Result};
use uuid::Uuid;

/// Strongly typed identifier for a video row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
pub struct VideoId(pub Uuid);

impl Default for VideoId {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoId {
    pub fn new() -> Self {
        VideoId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl AsRef<Uuid> for VideoId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

const CODE_MIN_LEN: usize = 4;
const CODE_MAX_LEN: usize = 16;
const CODE_GEN_LEN: usize = 8;
const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Short human-visible token used in storage paths and public URLs.
///
/// Immutable after row creation; every derived storage key (`hls/{code}`,
/// `gallery/{code}`) hangs off this value, which is what makes worker
/// writes path-idempotent across redeliveries.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
pub struct VideoCode(String);

impl VideoCode {
    /// Validates and wraps a code. Accepts `[a-z0-9]{4,16}`.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let len_ok = (CODE_MIN_LEN..=CODE_MAX_LEN).contains(&value.len());
        let chars_ok = value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        if !len_ok || !chars_ok {
            return Err(ModelError::InvalidCode(value));
        }
        Ok(VideoCode(value))
    }

    /// Generates a fresh random code.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::rng();
        let code: String = (0..CODE_GEN_LEN)
            .map(|_| {
                let idx = rng.random_range(0..CODE_ALPHABET.len());
                CODE_ALPHABET[idx] as char
            })
            .collect();
        VideoCode(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for VideoCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Stable identity tag for a worker process.
///
/// Used for heartbeats, progress attribution, and DLQ alerts only; jobs
/// are never addressed to specific workers.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(value: impl Into<String>) -> Self {
        WorkerId(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_accepts_lowercase_alphanumerics() {
        assert!(VideoCode::parse("abc123").is_ok());
        assert!(VideoCode::parse("0000").is_ok());
    }

    #[test]
    fn code_rejects_bad_input() {
        assert!(VideoCode::parse("ab").is_err());
        assert!(VideoCode::parse("ABC123").is_err());
        assert!(VideoCode::parse("abc-123").is_err());
        assert!(VideoCode::parse("a".repeat(17)).is_err());
    }

    #[test]
    fn generated_codes_are_valid_and_distinct() {
        let a = VideoCode::generate();
        let b = VideoCode::generate();
        assert!(VideoCode::parse(a.as_str()).is_ok());
        assert_ne!(a, b);
    }

    #[test]
    fn video_ids_are_time_ordered() {
        let a = VideoId::new();
        let b = VideoId::new();
        assert!(a <= b);
    }
}
