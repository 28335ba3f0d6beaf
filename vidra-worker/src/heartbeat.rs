//! Periodic worker liveness broadcast.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vidra_core::broker::JobBroker;
use vidra_core::disk::DiskState;
use vidra_model::{WorkerHeartbeat, WorkerId};

use crate::runtime::WorkerRuntime;

pub struct HeartbeatLoop {
    broker: Arc<dyn JobBroker>,
    runtime: Arc<WorkerRuntime>,
    disk_state: watch::Receiver<DiskState>,
    worker_id: WorkerId,
    worker_type: String,
    concurrency: usize,
    gpu_enabled: bool,
    interval: Duration,
}

impl std::fmt::Debug for HeartbeatLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatLoop")
            .field("worker_id", &self.worker_id)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl HeartbeatLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn JobBroker>,
        runtime: Arc<WorkerRuntime>,
        disk_state: watch::Receiver<DiskState>,
        worker_id: WorkerId,
        worker_type: String,
        concurrency: usize,
        gpu_enabled: bool,
        interval: Duration,
    ) -> Self {
        Self {
            broker,
            runtime,
            disk_state,
            worker_id,
            worker_type,
            concurrency,
            gpu_enabled,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.beat().await,
            }
        }
        debug!("Heartbeat loop stopped");
    }

    async fn beat(&self) {
        let disk = *self.disk_state.borrow();
        let heartbeat = WorkerHeartbeat {
            worker_id: self.worker_id.clone(),
            worker_type: self.worker_type.clone(),
            concurrency: self.concurrency,
            in_flight: self.runtime.in_flight(),
            disk_used_percent: disk.used_percent,
            gpu_enabled: self.gpu_enabled,
            paused: disk.paused,
            sent_at: Utc::now(),
        };
        if let Err(e) = self.broker.publish_heartbeat(&heartbeat).await {
            warn!("Heartbeat publish failed: {e}");
        }
    }
}
