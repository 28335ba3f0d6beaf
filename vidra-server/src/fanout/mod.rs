//! Progress fan-out.
//!
//! Subscribes the broker's non-durable progress channel and relays each
//! event to connected browser sessions addressed by video id. Terminal
//! events also invalidate the read cache. Events for rows that no longer
//! exist are discarded.

pub mod connections;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vidra_core::broker::{JobBroker, subjects};
use vidra_core::repo::VideoRepository;

use crate::cache::VideoCache;

pub use connections::ConnectionManager;

pub struct ProgressFanout {
    broker: Arc<dyn JobBroker>,
    repo: Arc<dyn VideoRepository>,
    connections: ConnectionManager,
    cache: VideoCache,
}

impl std::fmt::Debug for ProgressFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressFanout").finish_non_exhaustive()
    }
}

impl ProgressFanout {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        repo: Arc<dyn VideoRepository>,
        connections: ConnectionManager,
        cache: VideoCache,
    ) -> Self {
        Self {
            broker,
            repo,
            connections,
            cache,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut events = match self
            .broker
            .subscribe_events(vec![
                subjects::PROGRESS_VIDEO.to_string(),
                subjects::PROGRESS_SUBTITLE.to_string(),
            ])
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!("Progress subscription failed: {e}");
                return;
            }
        };
        info!("Progress fan-out running");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        warn!("Progress channel closed");
                        break;
                    }
                },
            };

            // Events for deleted assets are dropped.
            match self.repo.get(event.video_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(
                        "Dropping progress for deleted video {}",
                        event.video_id
                    );
                    continue;
                }
                Err(e) => {
                    warn!("Row check failed for {}: {e}", event.video_id);
                    continue;
                }
            }

            if let Ok(json) = serde_json::to_string(&event) {
                self.connections.broadcast(event.video_id, &json);
                debug!(
                    "Relayed {:?}/{:?} for {} to {} watcher(s)",
                    event.event_type,
                    event.status,
                    event.video_id,
                    self.connections.watcher_count(event.video_id)
                );
            }

            if event.is_terminal() {
                self.cache.invalidate(event.video_id).await;
            }
        }
        info!("Progress fan-out stopped");
    }
}
