//! Redis-backed read cache for video rows.
//!
//! The progress fan-out invalidates entries when a terminal event lands,
//! so browsers polling the API see fresh state within one round trip.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use vidra_model::VideoId;

#[derive(Clone)]
pub struct VideoCache {
    conn: ConnectionManager,
    ttl: Duration,
}

impl std::fmt::Debug for VideoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl VideoCache {
    pub fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    fn video_key(id: VideoId) -> String {
        format!("video:{id}")
    }

    pub async fn get_video<T: DeserializeOwned>(
        &self,
        id: VideoId,
    ) -> Option<T> {
        let mut conn = self.conn.clone();
        let json: Option<String> =
            conn.get(Self::video_key(id)).await.ok().flatten();
        json.and_then(|json| serde_json::from_str(&json).ok())
    }

    pub async fn put_video<T: Serialize>(&self, id: VideoId, value: &T) {
        let Ok(json) = serde_json::to_string(value) else {
            return;
        };
        let mut conn = self.conn.clone();
        // Cache writes are best-effort.
        let _ = conn
            .set_ex::<_, _, ()>(Self::video_key(id), json, self.ttl.as_secs())
            .await;
    }

    /// Drops the asset's entry after a terminal event.
    pub async fn invalidate(&self, id: VideoId) {
        let mut conn = self.conn.clone();
        let _ = conn.del::<_, ()>(Self::video_key(id)).await;
        debug!("Cache invalidated for video {id}");
    }
}
