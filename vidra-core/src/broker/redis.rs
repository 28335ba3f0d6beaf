//! Redis Streams implementation of the broker ports.
//!
//! Durable subjects are streams consumed through a named group; ack maps
//! to `XACK` + `XDEL`, nak to silence (the pending entry is reclaimed via
//! `XAUTOCLAIM` once its idle time exceeds the visibility timeout), and
//! keep-alive to a `JUSTID` claim that resets the idle clock without
//! bumping the delivery counter. The progress channel is plain pub/sub.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamClaimOptions,
    StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vidra_model::{DlqNotification, ProgressEvent, WorkerHeartbeat};

use super::{Delivery, JobBroker, JobConsumer, subjects};
use crate::error::{CoreError, Result};

const PAYLOAD_FIELD: &str = "data";
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker").finish_non_exhaustive()
    }
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to broker at {}", url);
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, conn })
    }

    /// Builds a consumer over one durable subject, creating the group
    /// idempotently from the start of the stream.
    pub async fn consumer(
        &self,
        subject: &str,
        group: &str,
        consumer_name: &str,
        visibility_timeout: Duration,
        poll_window: Duration,
    ) -> Result<RedisConsumer> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> = conn
            .xgroup_create_mkstream(subject, group, "0")
            .await;
        match created {
            Ok(_) => debug!("Created consumer group {group} on {subject}"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }

        Ok(RedisConsumer {
            conn: self.conn.clone(),
            subject: subject.to_string(),
            group: group.to_string(),
            consumer: consumer_name.to_string(),
            visibility_timeout_ms: visibility_timeout.as_millis() as u64,
            poll_window_ms: poll_window.as_millis() as u64,
        })
    }
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(subject, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        debug!("Published {} byte(s) to {subject} as {id}", payload.len());
        Ok(())
    }

    async fn publish_event(
        &self,
        subject: &str,
        event: &ProgressEvent,
    ) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        let mut conn = self.conn.clone();
        let _receivers: usize = conn.publish(subject, payload).await?;
        Ok(())
    }

    async fn publish_dlq(
        &self,
        subject: &str,
        notification: &DlqNotification,
    ) -> Result<()> {
        let payload = serde_json::to_vec(notification)?;
        let dlq = subjects::dlq_subject(subject);
        let mut conn = self.conn.clone();
        let _id: String = conn
            .xadd(&dlq, "*", &[(PAYLOAD_FIELD, payload.as_slice())])
            .await?;
        warn!(
            "Dead-lettered video {} on {dlq} after {} attempt(s)",
            notification.video_id, notification.attempts
        );
        Ok(())
    }

    async fn publish_heartbeat(
        &self,
        heartbeat: &WorkerHeartbeat,
    ) -> Result<()> {
        let payload = serde_json::to_vec(heartbeat)?;
        let mut conn = self.conn.clone();
        let _receivers: usize = conn
            .publish(subjects::WORKERS_HEARTBEAT, payload)
            .await?;
        Ok(())
    }

    async fn subscribe_events(
        &self,
        subjects: Vec<String>,
    ) -> Result<mpsc::Receiver<ProgressEvent>> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for subject in &subjects {
            pubsub.subscribe(subject).await?;
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: Vec<u8> = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable progress payload: {e}");
                        continue;
                    }
                };
                match serde_json::from_slice::<ProgressEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Undecodable progress event: {e}"),
                }
            }
            debug!("Progress subscription closed");
        });

        Ok(rx)
    }
}

/// Consumer-group handle over one stream subject.
pub struct RedisConsumer {
    conn: ConnectionManager,
    subject: String,
    group: String,
    consumer: String,
    visibility_timeout_ms: u64,
    poll_window_ms: u64,
}

impl std::fmt::Debug for RedisConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConsumer")
            .field("subject", &self.subject)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl RedisConsumer {
    fn payload_of(entry: &StreamId) -> Result<Vec<u8>> {
        let value = entry.map.get(PAYLOAD_FIELD).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "stream entry {} has no payload field",
                entry.id
            ))
        })?;
        Ok(redis::from_redis_value_ref(value).map_err(redis::RedisError::from)?)
    }

    async fn delivery_count_of(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
    ) -> Result<u32> {
        let reply: StreamPendingCountReply = conn
            .xpending_count(&self.subject, &self.group, id, id, 1)
            .await?;
        Ok(reply
            .ids
            .first()
            .map(|pending| pending.times_delivered as u32)
            .unwrap_or(1))
    }

    /// Reclaims one delivery whose owner went silent past the visibility
    /// timeout.
    async fn reclaim(&self) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let options = StreamAutoClaimOptions::default().count(1);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.subject,
                &self.group,
                &self.consumer,
                self.visibility_timeout_ms,
                "0-0",
                options,
            )
            .await?;

        let Some(entry) = reply.claimed.into_iter().next() else {
            return Ok(None);
        };
        let payload = Self::payload_of(&entry)?;
        let delivery_count = self.delivery_count_of(&mut conn, &entry.id).await?;
        debug!(
            "Reclaimed {} from {} (delivery {})",
            entry.id, self.subject, delivery_count
        );
        Ok(Some(Delivery {
            message_id: entry.id,
            payload,
            delivery_count,
        }))
    }

    async fn fetch_fresh(&self) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1)
            .block(self.poll_window_ms as usize);
        let reply: StreamReadReply = conn
            .xread_options(&[&self.subject], &[">"], &options)
            .await?;

        for key in reply.keys {
            if let Some(entry) = key.ids.into_iter().next() {
                let payload = Self::payload_of(&entry)?;
                return Ok(Some(Delivery {
                    message_id: entry.id,
                    payload,
                    delivery_count: 1,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl JobConsumer for RedisConsumer {
    async fn fetch(&self) -> Result<Option<Delivery>> {
        // Timed-out redeliveries take priority over fresh work.
        if let Some(delivery) = self.reclaim().await? {
            return Ok(Some(delivery));
        }
        self.fetch_fresh().await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let _acked: i64 = conn
            .xack(&self.subject, &self.group, &[&delivery.message_id])
            .await?;
        let _deleted: i64 = conn
            .xdel(&self.subject, &[&delivery.message_id])
            .await?;
        Ok(())
    }

    async fn nak(&self, delivery: &Delivery) -> Result<()> {
        // The entry stays pending under this consumer; XAUTOCLAIM hands it
        // to the next fetcher once the visibility timeout expires.
        debug!(
            "Nak {} on {} (delivery {})",
            delivery.message_id, self.subject, delivery.delivery_count
        );
        Ok(())
    }

    async fn keep_alive(&self, delivery: &Delivery) -> Result<()> {
        let mut conn = self.conn.clone();
        let options = StreamClaimOptions::default().with_justid();
        let _ids: Vec<String> = conn
            .xclaim_options(
                &self.subject,
                &self.group,
                &self.consumer,
                0,
                &[&delivery.message_id],
                options,
            )
            .await?;
        Ok(())
    }
}
