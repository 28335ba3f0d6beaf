//! Dead-letter alerter.
//!
//! Consumes the dead-letter subjects and informs operators through the
//! configured notifier. The row is already in `dead_letter` by the time
//! an envelope lands here; this loop never mutates state.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vidra_core::broker::JobConsumer;
use vidra_core::repo::VideoRepository;
use vidra_model::DlqNotification;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &DlqNotification) -> anyhow::Result<()>;
}

/// Logs and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &DlqNotification) -> anyhow::Result<()> {
        error!(
            "DEAD LETTER: video {} ({}) failed at stage {} after {} attempt(s): {}",
            notification.video_code,
            notification.title,
            notification.stage,
            notification.attempts,
            notification.error
        );
        Ok(())
    }
}

/// Posts the notification JSON to a chat webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &DlqNotification) -> anyhow::Result<()> {
        let text = format!(
            "Video {} ({}) dead-lettered at stage {} after {} attempt(s) on {}: {}",
            notification.video_code,
            notification.title,
            notification.stage,
            notification.attempts,
            notification.worker_id,
            notification.error
        );
        let body = serde_json::json!({
            "text": text,
            "notification": notification,
        });
        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}

pub struct DlqAlerter {
    consumers: Vec<Arc<dyn JobConsumer>>,
    repo: Arc<dyn VideoRepository>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for DlqAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DlqAlerter")
            .field("subjects", &self.consumers.len())
            .finish_non_exhaustive()
    }
}

impl DlqAlerter {
    pub fn new(
        consumers: Vec<Arc<dyn JobConsumer>>,
        repo: Arc<dyn VideoRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            consumers,
            repo,
            notifier,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Dead-letter alerter watching {} subject(s)",
            self.consumers.len()
        );
        let mut loops = Vec::new();
        for consumer in &self.consumers {
            let consumer = Arc::clone(consumer);
            let repo = Arc::clone(&self.repo);
            let notifier = Arc::clone(&self.notifier);
            let cancel = cancel.clone();
            loops.push(tokio::spawn(async move {
                alert_loop(consumer, repo, notifier, cancel).await;
            }));
        }
        for handle in loops {
            let _ = handle.await;
        }
    }
}

async fn alert_loop(
    consumer: Arc<dyn JobConsumer>,
    repo: Arc<dyn VideoRepository>,
    notifier: Arc<dyn Notifier>,
    cancel: CancellationToken,
) {
    loop {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = consumer.fetch() => fetched,
        };
        let delivery = match fetched {
            Ok(Some(delivery)) => delivery,
            Ok(None) => continue,
            Err(e) => {
                warn!("DLQ fetch failed: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        let mut notification: DlqNotification =
            match serde_json::from_slice(&delivery.payload) {
                Ok(notification) => notification,
                Err(e) => {
                    warn!("Undecodable DLQ envelope: {e}");
                    let _ = consumer.ack(&delivery).await;
                    continue;
                }
            };

        // Join the latest row for the title when the envelope lacks it.
        if notification.title.is_empty() {
            if let Ok(Some(video)) = repo.get(notification.video_id).await {
                notification.title = video.title;
            }
        }

        if let Err(e) = notifier.notify(&notification).await {
            // Leave it pending; redelivery retries the alert.
            warn!("Operator notification failed: {e}");
            let _ = consumer.nak(&delivery).await;
            continue;
        }
        if let Err(e) = consumer.ack(&delivery).await {
            warn!("DLQ ack failed: {e}");
        }
    }
}
