//! Process-wide services, initialized once at startup and passed through
//! an explicit dependency container. No hidden globals.

use std::sync::Arc;

use vidra_core::broker::JobBroker;
use vidra_core::repo::VideoRepository;
use vidra_core::storage::ObjectStore;
use vidra_core::upload::{JobDefaults, UploadCoordinator};

use crate::cache::VideoCache;
use crate::fanout::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn VideoRepository>,
    pub broker: Arc<dyn JobBroker>,
    pub store: Arc<dyn ObjectStore>,
    pub coordinator: Arc<UploadCoordinator>,
    pub connections: ConnectionManager,
    pub cache: VideoCache,
    /// Job parameters stamped onto producer-published transcode jobs.
    pub job_defaults: JobDefaults,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
