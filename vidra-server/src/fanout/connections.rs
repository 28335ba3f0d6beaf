//! WebSocket connection registry.
//!
//! Browser sessions subscribe per video; the fan-out pushes serialized
//! progress events into each session's outbound channel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use vidra_model::VideoId;

const OUTBOUND_CAPACITY: usize = 64;

struct Connection {
    video_id: VideoId,
    tx: mpsc::Sender<String>,
}

#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<DashMap<Uuid, Connection>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session watching one video; returns its id and the
    /// outbound message stream.
    pub fn join(&self, video_id: VideoId) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let conn_id = Uuid::new_v4();
        self.connections.insert(conn_id, Connection { video_id, tx });
        (conn_id, rx)
    }

    pub fn leave(&self, conn_id: Uuid) {
        self.connections.remove(&conn_id);
    }

    /// Pushes a message to every session watching `video_id`. Sessions
    /// whose channel is gone are pruned.
    pub fn broadcast(&self, video_id: VideoId, message: &str) {
        let mut dead = Vec::new();
        for entry in self.connections.iter() {
            if entry.video_id != video_id {
                continue;
            }
            if entry.tx.try_send(message.to_string()).is_err() {
                dead.push(*entry.key());
            }
        }
        for conn_id in dead {
            self.connections.remove(&conn_id);
        }
    }

    pub fn watcher_count(&self, video_id: VideoId) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.video_id == video_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_only_watchers() {
        let manager = ConnectionManager::new();
        let video_a = VideoId::new();
        let video_b = VideoId::new();
        let (_id_a, mut rx_a) = manager.join(video_a);
        let (_id_b, mut rx_b) = manager.join(video_b);

        manager.broadcast(video_a, "progress 50");

        assert_eq!(rx_a.recv().await.unwrap(), "progress 50");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_and_prune() {
        let manager = ConnectionManager::new();
        let video = VideoId::new();
        let (conn_id, rx) = manager.join(video);
        assert_eq!(manager.watcher_count(video), 1);

        manager.leave(conn_id);
        assert_eq!(manager.watcher_count(video), 0);

        // A dropped receiver gets pruned at the next broadcast.
        let (_conn_id, rx2) = manager.join(video);
        drop(rx);
        drop(rx2);
        for _ in 0..OUTBOUND_CAPACITY + 1 {
            manager.broadcast(video, "x");
        }
        assert_eq!(manager.watcher_count(video), 0);
    }
}
