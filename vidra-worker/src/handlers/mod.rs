//! Job handlers.
//!
//! A handler owns the success path of one job type: decode, execute,
//! commit its domain writes, and enqueue downstream effects. The runtime
//! owns everything else: the status gate, the claim, failure-to-lifecycle
//! translation, ack/nak, and dead-letter publication. Handlers never ack.

pub mod gallery;
pub mod transcode;
pub mod warmcache;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use vidra_core::error::JobError;
use vidra_core::pipeline::ProgressSink;
use vidra_model::{EventType, VideoCode, VideoId};

pub use gallery::GalleryHandler;
pub use transcode::TranscodeHandler;
pub use warmcache::WarmCacheHandler;

/// Identity pulled from a payload before execution, for gating and
/// progress attribution.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub video_id: VideoId,
    pub video_code: VideoCode,
}

/// What a successful execution reports back to the runtime.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub message: String,
    pub output_path: Option<String>,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Subject this handler consumes.
    fn subject(&self) -> &'static str;

    /// Progress event type attributed to this handler's work.
    fn event_type(&self) -> EventType;

    /// Whether this job drives the video lifecycle columns. Lifecycle
    /// owners get the status gate, the claim, and failure transitions;
    /// auxiliary jobs (cache warming, gallery re-runs) run against
    /// `ready` rows and must not move them.
    fn owns_lifecycle(&self) -> bool {
        true
    }

    /// Cheap payload decode; a failure here is a malformed job.
    fn describe(&self, payload: &[u8]) -> Result<JobDescriptor, JobError>;

    /// Executes the job. Emits monotonic progress into `progress`;
    /// observes `cancel` at every blocking boundary.
    async fn run(
        &self,
        payload: &[u8],
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<HandlerOutcome, JobError>;
}
