//! Broker subject names. Contractual but not load-bearing; only the
//! separation between subjects matters.

pub const JOBS_TRANSCODE: &str = "jobs.transcode";
pub const JOBS_GALLERY: &str = "jobs.gallery";
pub const JOBS_SUBTITLE: &str = "jobs.subtitle";
pub const JOBS_WARMCACHE: &str = "jobs.warmcache";

pub const PROGRESS_VIDEO: &str = "progress.video";
pub const PROGRESS_SUBTITLE: &str = "progress.subtitle";

pub const WORKERS_HEARTBEAT: &str = "workers.heartbeat";

pub const DLQ_PREFIX: &str = "dlq.";

/// Dead-letter subject paired with a work subject.
pub fn dlq_subject(subject: &str) -> String {
    format!("{DLQ_PREFIX}{subject}")
}

/// Every dead-letter subject the alerter watches.
pub fn all_dlq_subjects() -> Vec<String> {
    [JOBS_TRANSCODE, JOBS_GALLERY, JOBS_SUBTITLE, JOBS_WARMCACHE]
        .iter()
        .map(|s| dlq_subject(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_subjects_are_prefixed() {
        assert_eq!(dlq_subject(JOBS_TRANSCODE), "dlq.jobs.transcode");
        assert_eq!(all_dlq_subjects().len(), 4);
    }
}
