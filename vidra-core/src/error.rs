use thiserror::Error;

/// Infrastructure-level failures from the broker, store, and repository.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure kinds a job execution can end in.
///
/// The worker runtime is the only component translating these into
/// lifecycle transitions and ack/nak decisions; pipeline stages just
/// return them.
#[derive(Error, Debug)]
pub enum JobError {
    /// Missing required fields or an unknown video id in a way that
    /// indicates a bug upstream.
    #[error("Malformed job: {0}")]
    MalformedJob(String),

    /// Source object missing; the asset was likely deleted while the job
    /// waited in the queue.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Encoder failure: {0}")]
    Encoder(String),

    /// Never escapes the gallery stage: the gallery is skipped and the
    /// transcode still succeeds.
    #[error("Classifier failure: {0}")]
    Classifier(String),

    #[error("Scratch disk full")]
    DiskFull,

    #[error("Job timed out")]
    Timeout,

    #[error("Job cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(String),
}

impl JobError {
    /// Whether the broker should redeliver after this failure. Terminal
    /// kinds go straight to `dead_letter` and are acked.
    pub fn retriable(&self) -> bool {
        match self {
            JobError::MalformedJob(_) | JobError::SourceNotFound(_) => false,
            JobError::Classifier(_) => false,
            JobError::Storage(_)
            | JobError::Broker(_)
            | JobError::Encoder(_)
            | JobError::DiskFull
            | JobError::Timeout
            | JobError::Cancelled
            | JobError::Database(_) => true,
        }
    }

    /// Coarse pipeline stage attribution, surfaced in DLQ notifications.
    pub fn stage(&self) -> &'static str {
        match self {
            JobError::MalformedJob(_) => "decode",
            JobError::SourceNotFound(_) => "fetch",
            JobError::Storage(_) => "storage",
            JobError::Broker(_) => "broker",
            JobError::Encoder(_) => "encode",
            JobError::Classifier(_) => "gallery",
            JobError::DiskFull => "scratch",
            JobError::Timeout => "timeout",
            JobError::Cancelled => "cancelled",
            JobError::Database(_) => "database",
        }
    }
}

const ENOSPC: i32 = 28;

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Database(e) => JobError::Database(e.to_string()),
            CoreError::Broker(e) => JobError::Broker(e.to_string()),
            CoreError::Storage(msg) => JobError::Storage(msg),
            CoreError::NotFound(key) => JobError::SourceNotFound(key),
            CoreError::Io(e) if e.raw_os_error() == Some(ENOSPC) => {
                JobError::DiskFull
            }
            CoreError::Io(e) => JobError::Storage(e.to_string()),
            CoreError::Serialization(e) => JobError::MalformedJob(e.to_string()),
            CoreError::InvalidInput(msg) => JobError::MalformedJob(msg),
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::from(CoreError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_per_kind() {
        assert!(!JobError::MalformedJob("x".into()).retriable());
        assert!(!JobError::SourceNotFound("k".into()).retriable());
        assert!(!JobError::Classifier("x".into()).retriable());
        assert!(JobError::Storage("timeout".into()).retriable());
        assert!(JobError::Encoder("exit 1".into()).retriable());
        assert!(JobError::DiskFull.retriable());
        assert!(JobError::Timeout.retriable());
        assert!(JobError::Cancelled.retriable());
        assert!(JobError::Database("conn".into()).retriable());
    }

    #[test]
    fn enospc_maps_to_disk_full() {
        let io = std::io::Error::from_raw_os_error(ENOSPC);
        assert!(matches!(JobError::from(io), JobError::DiskFull));
        let other = std::io::Error::other("boom");
        assert!(matches!(JobError::from(other), JobError::Storage(_)));
    }

    #[test]
    fn missing_object_is_terminal_with_fetch_stage() {
        let err = JobError::from(CoreError::NotFound("videos/x".into()));
        assert!(!err.retriable());
        assert_eq!(err.stage(), "fetch");
    }
}
