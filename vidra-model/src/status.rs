use crate::error::ModelError;

/// Authoritative lifecycle cursor for a video row.
///
/// ```text
///   pending -> queued -> processing -> ready
///                ^            |------> failed
///                |            '------> dead_letter
///                '-- (supervisor re-enqueues failed/stuck)
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "video_status", rename_all = "snake_case")]
pub enum VideoStatus {
    /// Row exists, job not yet visible on the broker.
    Pending,
    /// Job published, not yet picked by a worker.
    Queued,
    /// A worker has claimed it; `processing_started_at` is set.
    Processing,
    /// Terminal success.
    Ready,
    /// Transient terminal; eligible for re-enqueue.
    Failed,
    /// Hard terminal after the delivery attempt cap.
    DeadLetter,
}

impl VideoStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::DeadLetter)
    }

    /// Whether the worker runtime (or a supervisor) may move a row from
    /// `self` to `next`. `Ready` never leaves through this path.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Processing)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Processing, DeadLetter)
                // Supervisor re-enqueue, or a broker redelivery claiming
                // the row without passing through queued.
                | (Failed, Queued)
                | (Failed, Processing)
                | (Failed, DeadLetter)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }
}

impl std::fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VideoStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "ready" => Ok(Self::Ready),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_is_a_sink() {
        for next in [
            VideoStatus::Pending,
            VideoStatus::Queued,
            VideoStatus::Processing,
            VideoStatus::Failed,
            VideoStatus::DeadLetter,
        ] {
            assert!(!VideoStatus::Ready.can_transition_to(next));
        }
    }

    #[test]
    fn worker_edges_only() {
        assert!(VideoStatus::Pending.can_transition_to(VideoStatus::Queued));
        assert!(VideoStatus::Queued.can_transition_to(VideoStatus::Processing));
        assert!(VideoStatus::Processing.can_transition_to(VideoStatus::Ready));
        assert!(VideoStatus::Processing.can_transition_to(VideoStatus::Failed));
        assert!(
            VideoStatus::Processing.can_transition_to(VideoStatus::DeadLetter)
        );
        // Supervisor re-enqueue and redelivery claim paths.
        assert!(VideoStatus::Failed.can_transition_to(VideoStatus::Queued));
        assert!(VideoStatus::Failed.can_transition_to(VideoStatus::Processing));
        // Jumping the queue is not allowed.
        assert!(!VideoStatus::Pending.can_transition_to(VideoStatus::Processing));
        assert!(!VideoStatus::Queued.can_transition_to(VideoStatus::Ready));
    }

    #[test]
    fn round_trips_through_strings() {
        for status in [
            VideoStatus::Pending,
            VideoStatus::Queued,
            VideoStatus::Processing,
            VideoStatus::Ready,
            VideoStatus::Failed,
            VideoStatus::DeadLetter,
        ] {
            let parsed: VideoStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<VideoStatus>().is_err());
    }
}
