//! Job broker abstraction.
//!
//! Three capabilities, implementable on any broker that provides them:
//! durable per-subject work streams with named consumer groups and
//! explicit ack/nak, a non-durable pub/sub channel for progress events,
//! and dead-letter subjects for final-failure envelopes.

pub mod redis;
pub mod subjects;

use async_trait::async_trait;
use tokio::sync::mpsc;
use vidra_model::{DlqNotification, ProgressEvent, WorkerHeartbeat};

use crate::error::Result;

pub use self::redis::{RedisBroker, RedisConsumer};

/// One message handed to a consumer.
///
/// `delivery_count` starts at 1 and grows on every redelivery; the
/// consumer routes exhausted messages per the runtime's policy.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub delivery_count: u32,
}

/// Producer-side broker surface.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Publishes a job payload; returns on durable acceptance.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;

    /// Best-effort progress publish. Callers swallow errors; a lost
    /// progress event never aborts a job.
    async fn publish_event(&self, subject: &str, event: &ProgressEvent) -> Result<()>;

    /// Publishes the final-failure envelope on the subject's dead-letter
    /// stream.
    async fn publish_dlq(
        &self,
        subject: &str,
        notification: &DlqNotification,
    ) -> Result<()>;

    /// Best-effort worker liveness broadcast on the non-durable channel.
    async fn publish_heartbeat(&self, heartbeat: &WorkerHeartbeat) -> Result<()>;

    /// Subscribes the non-durable progress channel. Only events arriving
    /// after subscription are seen; the channel closes when the broker
    /// connection drops.
    async fn subscribe_events(
        &self,
        subjects: Vec<String>,
    ) -> Result<mpsc::Receiver<ProgressEvent>>;
}

/// Worker-side consumer handle for one durable subject.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Fetches the next delivery, blocking up to the consumer's poll
    /// window. `None` means the window elapsed with nothing to do.
    async fn fetch(&self) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery; the broker will never redeliver it.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Declines a delivery. No wire traffic: the entry stays pending and
    /// is redelivered once the visibility timeout expires.
    async fn nak(&self, delivery: &Delivery) -> Result<()>;

    /// Resets the delivery's visibility window while a handler is alive.
    async fn keep_alive(&self, delivery: &Delivery) -> Result<()>;
}
