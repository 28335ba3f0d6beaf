//! The worker runtime: bounded fetch loops, the per-job protocol, and
//! the only place failures are translated into lifecycle transitions and
//! ack/nak decisions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vidra_core::broker::{Delivery, JobBroker, JobConsumer, subjects};
use vidra_core::disk::DiskState;
use vidra_core::error::JobError;
use vidra_core::pipeline::{PipelineProgress, ProgressSink};
use vidra_core::repo::VideoRepository;
use vidra_model::{
    DlqNotification, EventStatus, EventType, ProgressEvent, VideoStatus,
    WorkerId,
};

use crate::handlers::{JobDescriptor, JobHandler};

const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_id: WorkerId,
    pub concurrency: usize,
    pub max_deliveries: u32,
    pub job_timeout: Duration,
    pub keepalive_interval: Duration,
    pub shutdown_timeout: Duration,
}

/// One subject wired to its handler.
pub struct Registration {
    pub consumer: Arc<dyn JobConsumer>,
    pub handler: Arc<dyn JobHandler>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("subject", &self.handler.subject())
            .finish_non_exhaustive()
    }
}

pub struct WorkerRuntime {
    repo: Arc<dyn VideoRepository>,
    broker: Arc<dyn JobBroker>,
    config: RuntimeConfig,
    semaphore: Arc<Semaphore>,
    disk_state: watch::Receiver<DiskState>,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn progress_subject(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Subtitle => subjects::PROGRESS_SUBTITLE,
        _ => subjects::PROGRESS_VIDEO,
    }
}

impl WorkerRuntime {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        broker: Arc<dyn JobBroker>,
        config: RuntimeConfig,
        disk_state: watch::Receiver<DiskState>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));
        Self {
            repo,
            broker,
            config,
            semaphore,
            disk_state,
        }
    }

    /// Handler slots currently in flight; surfaced in heartbeats.
    pub fn in_flight(&self) -> usize {
        self.config
            .concurrency
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    /// Runs every fetch loop until `shutdown` fires, then drains.
    pub async fn run(
        self: Arc<Self>,
        registrations: Vec<Registration>,
        shutdown: CancellationToken,
    ) {
        // Handlers get their own token so the drain window can expire
        // before they are forcibly cancelled (which naks their jobs).
        let job_cancel = CancellationToken::new();
        let mut loops = Vec::new();
        for registration in registrations {
            let runtime = Arc::clone(&self);
            let loop_shutdown = shutdown.clone();
            let loop_job_cancel = job_cancel.clone();
            loops.push(tokio::spawn(async move {
                runtime
                    .fetch_loop(registration, loop_shutdown, loop_job_cancel)
                    .await;
            }));
        }

        shutdown.cancelled().await;
        info!(
            "Shutdown requested; draining up to {:?}",
            self.config.shutdown_timeout
        );
        for handle in loops {
            let _ = handle.await;
        }

        let drained = tokio::time::timeout(
            self.config.shutdown_timeout,
            self.semaphore.acquire_many(self.config.concurrency as u32),
        )
        .await;
        match drained {
            Ok(_) => info!("All in-flight handlers finished"),
            Err(_) => {
                warn!(
                    "Drain window expired with {} handler(s) in flight; cancelling",
                    self.in_flight()
                );
                job_cancel.cancel();
                // Give cancelled handlers a beat to nak and clean scratch.
                let _ = tokio::time::timeout(
                    Duration::from_secs(5),
                    self.semaphore.acquire_many(self.config.concurrency as u32),
                )
                .await;
            }
        }
    }

    async fn fetch_loop(
        self: Arc<Self>,
        registration: Registration,
        shutdown: CancellationToken,
        job_cancel: CancellationToken,
    ) {
        let Registration { consumer, handler } = registration;
        info!("Consuming {}", handler.subject());

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            // Disk back-pressure: stop fetching while paused, let
            // in-flight handlers finish.
            if self.disk_state.borrow().paused {
                let mut state = self.disk_state.clone();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = state.changed() => continue,
                }
            }

            // One fetch per free handler slot.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };

            let fetched = tokio::select! {
                _ = shutdown.cancelled() => {
                    drop(permit);
                    break;
                }
                fetched = consumer.fetch() => fetched,
            };

            match fetched {
                Ok(Some(delivery)) => {
                    let runtime = Arc::clone(&self);
                    let consumer = Arc::clone(&consumer);
                    let handler = Arc::clone(&handler);
                    let cancel = job_cancel.child_token();
                    tokio::spawn(async move {
                        runtime
                            .handle_delivery(consumer, handler, delivery, cancel)
                            .await;
                        drop(permit);
                    });
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    warn!("Fetch on {} failed: {e}", handler.subject());
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        debug!("Fetch loop for {} stopped", handler.subject());
    }

    /// The per-job protocol.
    pub async fn handle_delivery(
        &self,
        consumer: Arc<dyn JobConsumer>,
        handler: Arc<dyn JobHandler>,
        delivery: Delivery,
        cancel: CancellationToken,
    ) {
        let descriptor = match handler.describe(&delivery.payload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                // No row to attribute the failure to; drop the message so
                // it does not spin through redelivery forever.
                error!("Undecodable job on {}: {e}", handler.subject());
                self.try_ack(&consumer, &delivery).await;
                return;
            }
        };

        // A delivery past the cap means earlier attempts died without a
        // clean failure (crashed worker); dead-letter it up front.
        if delivery.delivery_count > self.config.max_deliveries {
            let error = JobError::Timeout;
            warn!(
                "Job for {} exceeded {} deliveries without completing",
                descriptor.video_code, self.config.max_deliveries
            );
            self.finish_terminal(
                &consumer,
                &handler,
                &delivery,
                &descriptor,
                &error,
                "delivery attempts exhausted without completion",
            )
            .await;
            return;
        }

        if handler.owns_lifecycle() {
            match self.repo.get_status(descriptor.video_id).await {
                Ok(None) => {
                    warn!(
                        "Video {} no longer exists; dropping job",
                        descriptor.video_id
                    );
                    self.try_ack(&consumer, &delivery).await;
                    return;
                }
                Ok(Some(VideoStatus::Ready)) => {
                    // Duplicate delivery after a prior success.
                    debug!(
                        "Video {} already ready; skipping duplicate",
                        descriptor.video_code
                    );
                    self.try_ack(&consumer, &delivery).await;
                    return;
                }
                Ok(Some(VideoStatus::DeadLetter)) => {
                    debug!(
                        "Video {} is dead-lettered; operator owns it now",
                        descriptor.video_code
                    );
                    self.try_ack(&consumer, &delivery).await;
                    return;
                }
                Ok(Some(_)) => {}
                Err(e) => {
                    warn!("Status read for {} failed: {e}", descriptor.video_id);
                    self.try_nak(&consumer, &delivery).await;
                    return;
                }
            }

            match self.repo.mark_processing_started(descriptor.video_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        "Video {} vanished before claim; dropping job",
                        descriptor.video_id
                    );
                    self.try_ack(&consumer, &delivery).await;
                    return;
                }
                Err(e) => {
                    warn!("Claim of {} failed: {e}", descriptor.video_id);
                    self.try_nak(&consumer, &delivery).await;
                    return;
                }
            }
        }

        self.publish_event(
            &handler,
            &descriptor,
            EventStatus::Started,
            0,
            "start",
            "job started",
            None,
            None,
        )
        .await;

        // Keep the visibility window open while the handler is alive.
        let keepalive = {
            let consumer = Arc::clone(&consumer);
            let delivery_ref = delivery.clone();
            let interval = self.config.keepalive_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = consumer.keep_alive(&delivery_ref).await {
                        debug!("Keep-alive failed: {e}");
                    }
                }
            })
        };

        // The pipeline writes progress into a channel; forwarding to the
        // broker stays out of pipeline code.
        let (tx, mut rx) = mpsc::channel::<PipelineProgress>(PROGRESS_CHANNEL_CAPACITY);
        let sink = ProgressSink::new(tx);
        let forwarder = {
            let broker = Arc::clone(&self.broker);
            let descriptor = descriptor.clone();
            let event_type = handler.event_type();
            let worker_id = self.config.worker_id.clone();
            tokio::spawn(async move {
                while let Some(progress) = rx.recv().await {
                    let event = ProgressEvent {
                        video_id: descriptor.video_id,
                        video_code: descriptor.video_code.clone(),
                        event_type,
                        status: EventStatus::Processing,
                        progress: progress.percent,
                        stage: progress.stage.to_string(),
                        message: progress.message,
                        error: None,
                        worker_id: worker_id.clone(),
                        output_path: None,
                        extra: serde_json::Value::Null,
                    };
                    if let Err(e) = broker
                        .publish_event(progress_subject(event_type), &event)
                        .await
                    {
                        debug!("Progress publish failed (ignored): {e}");
                    }
                }
            })
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(JobError::Cancelled),
            outcome = tokio::time::timeout(
                self.config.job_timeout,
                handler.run(&delivery.payload, &sink, &cancel),
            ) => match outcome {
                Ok(inner) => inner,
                Err(_) => Err(JobError::Timeout),
            },
        };

        keepalive.abort();
        drop(sink);
        let _ = forwarder.await;

        match result {
            Ok(outcome) => {
                self.publish_event(
                    &handler,
                    &descriptor,
                    EventStatus::Completed,
                    100,
                    "commit",
                    &outcome.message,
                    None,
                    outcome.output_path.as_deref(),
                )
                .await;
                self.try_ack(&consumer, &delivery).await;
            }
            Err(error) => {
                let attempt = delivery.delivery_count;
                self.publish_event(
                    &handler,
                    &descriptor,
                    EventStatus::Failed,
                    0,
                    error.stage(),
                    "job failed",
                    Some(&error.to_string()),
                    None,
                )
                .await;

                let exhausted = attempt >= self.config.max_deliveries;
                if error.retriable() && !exhausted {
                    if handler.owns_lifecycle() {
                        if let Err(e) = self
                            .repo
                            .mark_failed(
                                descriptor.video_id,
                                &error.to_string(),
                                attempt,
                            )
                            .await
                        {
                            warn!(
                                "mark_failed for {} failed: {e}",
                                descriptor.video_id
                            );
                        }
                    }
                    warn!(
                        "Job for {} failed (attempt {attempt}/{}): {error}",
                        descriptor.video_code, self.config.max_deliveries
                    );
                    self.try_nak(&consumer, &delivery).await;
                } else {
                    let text = error.to_string();
                    self.finish_terminal(
                        &consumer,
                        &handler,
                        &delivery,
                        &descriptor,
                        &error,
                        &text,
                    )
                    .await;
                }
            }
        }
    }

    /// Terminal failure: `dead_letter`, exactly one DLQ notification, ack.
    async fn finish_terminal(
        &self,
        consumer: &Arc<dyn JobConsumer>,
        handler: &Arc<dyn JobHandler>,
        delivery: &Delivery,
        descriptor: &JobDescriptor,
        error: &JobError,
        error_text: &str,
    ) {
        let attempts = delivery.delivery_count.max(self.config.max_deliveries);

        if handler.owns_lifecycle() {
            if let Err(e) = self
                .repo
                .mark_failed(descriptor.video_id, error_text, attempts)
                .await
            {
                warn!("Dead-letter mark for {} failed: {e}", descriptor.video_id);
            }
        }

        let title = match self.repo.get(descriptor.video_id).await {
            Ok(Some(video)) => video.title,
            _ => String::new(),
        };
        let notification = DlqNotification {
            video_id: descriptor.video_id,
            video_code: descriptor.video_code.clone(),
            title,
            error: error_text.to_string(),
            attempts,
            worker_id: self.config.worker_id.clone(),
            stage: error.stage().to_string(),
            failed_at: Utc::now(),
        };
        if let Err(e) = self
            .broker
            .publish_dlq(handler.subject(), &notification)
            .await
        {
            error!(
                "DLQ publish for {} failed: {e}",
                descriptor.video_id
            );
        }

        error!(
            "Job for {} dead-lettered after {attempts} attempt(s): {error_text}",
            descriptor.video_code
        );
        self.try_ack(consumer, delivery).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn publish_event(
        &self,
        handler: &Arc<dyn JobHandler>,
        descriptor: &JobDescriptor,
        status: EventStatus,
        progress: u8,
        stage: &str,
        message: &str,
        error: Option<&str>,
        output_path: Option<&str>,
    ) {
        let mut event = ProgressEvent::new(
            descriptor.video_id,
            descriptor.video_code.clone(),
            handler.event_type(),
            status,
            progress,
            stage,
            message,
            self.config.worker_id.clone(),
        );
        if let Some(error) = error {
            event = event.with_error(error);
        }
        if let Some(path) = output_path {
            event = event.with_output_path(path);
        }
        if let Err(e) = self
            .broker
            .publish_event(progress_subject(handler.event_type()), &event)
            .await
        {
            debug!("Progress publish failed (ignored): {e}");
        }
    }

    async fn try_ack(&self, consumer: &Arc<dyn JobConsumer>, delivery: &Delivery) {
        if let Err(e) = consumer.ack(delivery).await {
            warn!("Ack of {} failed: {e}", delivery.message_id);
        }
    }

    async fn try_nak(&self, consumer: &Arc<dyn JobConsumer>, delivery: &Delivery) {
        if let Err(e) = consumer.nak(delivery).await {
            warn!("Nak of {} failed: {e}", delivery.message_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerOutcome;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vidra_core::broker::{MockJobBroker as MockBroker, MockJobConsumer as MockConsumer};
    use vidra_core::error::JobError;
    use vidra_core::repo::MockVideoRepository as MockRepo;
    use vidra_model::{VideoCode, VideoId};

    /// Scripted handler: returns the queued results in order.
    struct FakeHandler {
        descriptor: JobDescriptor,
        owns_lifecycle: bool,
        results: Mutex<Vec<Result<HandlerOutcome, JobError>>>,
    }

    impl FakeHandler {
        fn new(
            descriptor: JobDescriptor,
            owns_lifecycle: bool,
            results: Vec<Result<HandlerOutcome, JobError>>,
        ) -> Self {
            Self {
                descriptor,
                owns_lifecycle,
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl JobHandler for FakeHandler {
        fn subject(&self) -> &'static str {
            subjects::JOBS_TRANSCODE
        }

        fn event_type(&self) -> EventType {
            EventType::Transcode
        }

        fn owns_lifecycle(&self) -> bool {
            self.owns_lifecycle
        }

        fn describe(&self, payload: &[u8]) -> Result<JobDescriptor, JobError> {
            if payload == b"garbage" {
                return Err(JobError::MalformedJob("garbage".into()));
            }
            Ok(self.descriptor.clone())
        }

        async fn run(
            &self,
            _payload: &[u8],
            progress: &ProgressSink,
            _cancel: &CancellationToken,
        ) -> Result<HandlerOutcome, JobError> {
            progress.emit("encode", 50, "halfway").await;
            self.results
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            video_id: VideoId::new(),
            video_code: VideoCode::parse("abc12345").unwrap(),
        }
    }

    fn delivery(count: u32) -> Delivery {
        Delivery {
            message_id: format!("0-{count}"),
            payload: b"{}".to_vec(),
            delivery_count: count,
        }
    }

    fn runtime(
        repo: MockRepo,
        broker: MockBroker,
    ) -> WorkerRuntime {
        let (_tx, disk_state) = watch::channel(DiskState::default());
        WorkerRuntime::new(
            Arc::new(repo),
            Arc::new(broker),
            RuntimeConfig {
                worker_id: WorkerId::new("w-test"),
                concurrency: 2,
                max_deliveries: 3,
                job_timeout: Duration::from_secs(60),
                keepalive_interval: Duration::from_secs(10),
                shutdown_timeout: Duration::from_secs(5),
            },
            disk_state,
        )
    }

    fn quiet_broker() -> MockBroker {
        let mut broker = MockBroker::new();
        broker.expect_publish_event().returning(|_, _| Ok(()));
        broker
    }

    #[tokio::test]
    async fn success_claims_then_acks() {
        let d = descriptor();
        let id = d.video_id;

        let mut repo = MockRepo::new();
        repo.expect_get_status()
            .returning(|_| Ok(Some(VideoStatus::Queued)));
        repo.expect_mark_processing_started()
            .withf(move |got| *got == id)
            .times(1)
            .returning(|_| Ok(true));

        let mut consumer = MockConsumer::new();
        consumer.expect_keep_alive().returning(|_| Ok(()));
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(
            d,
            true,
            vec![Ok(HandlerOutcome {
                message: "done".into(),
                output_path: Some("hls/abc12345".into()),
            })],
        ));

        runtime(repo, quiet_broker())
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(1),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn ready_row_short_circuits_to_ack() {
        // Republishing a job for a ready video is a no-op: no claim, no
        // handler execution, just an ack.
        let d = descriptor();
        let mut repo = MockRepo::new();
        repo.expect_get_status()
            .returning(|_| Ok(Some(VideoStatus::Ready)));
        // mark_processing_started would panic: no expectation set.

        let mut consumer = MockConsumer::new();
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        // An empty script would panic if the handler ran.
        let handler = Arc::new(FakeHandler::new(d, true, vec![]));

        runtime(repo, MockBroker::new())
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(2),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn missing_row_is_dropped_with_ack() {
        let d = descriptor();
        let mut repo = MockRepo::new();
        repo.expect_get_status().returning(|_| Ok(None));

        let mut consumer = MockConsumer::new();
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(d, true, vec![]));
        runtime(repo, MockBroker::new())
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(1),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn retriable_failure_below_cap_marks_failed_and_naks() {
        let d = descriptor();
        let id = d.video_id;

        let mut repo = MockRepo::new();
        repo.expect_get_status()
            .returning(|_| Ok(Some(VideoStatus::Queued)));
        repo.expect_mark_processing_started().returning(|_| Ok(true));
        repo.expect_mark_failed()
            .withf(move |got, _err, attempt| *got == id && *attempt == 1)
            .times(1)
            .returning(|_, _, _| Ok(VideoStatus::Failed));

        let mut consumer = MockConsumer::new();
        consumer.expect_keep_alive().returning(|_| Ok(()));
        consumer.expect_nak().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(
            d,
            true,
            vec![Err(JobError::Encoder("exit 1".into()))],
        ));

        runtime(repo, quiet_broker())
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(1),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn non_retriable_failure_dead_letters_and_acks() {
        let d = descriptor();
        let id = d.video_id;

        let mut repo = MockRepo::new();
        repo.expect_get_status()
            .returning(|_| Ok(Some(VideoStatus::Queued)));
        repo.expect_mark_processing_started().returning(|_| Ok(true));
        // Non-retriable jumps straight to the cap.
        repo.expect_mark_failed()
            .withf(move |got, _err, attempt| *got == id && *attempt == 3)
            .times(1)
            .returning(|_, _, _| Ok(VideoStatus::DeadLetter));
        repo.expect_get().returning(|_| Ok(None));

        let mut broker = quiet_broker();
        broker
            .expect_publish_dlq()
            .withf(|subject, notification| {
                subject == subjects::JOBS_TRANSCODE
                    && notification.stage == "fetch"
                    && notification.attempts == 3
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let mut consumer = MockConsumer::new();
        consumer.expect_keep_alive().returning(|_| Ok(()));
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(
            d,
            true,
            vec![Err(JobError::SourceNotFound("videos/x".into()))],
        ));

        runtime(repo, broker)
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(1),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn retriable_failure_at_cap_dead_letters() {
        let d = descriptor();

        let mut repo = MockRepo::new();
        repo.expect_get_status()
            .returning(|_| Ok(Some(VideoStatus::Failed)));
        repo.expect_mark_processing_started().returning(|_| Ok(true));
        repo.expect_mark_failed()
            .withf(|_, _, attempt| *attempt == 3)
            .times(1)
            .returning(|_, _, _| Ok(VideoStatus::DeadLetter));
        repo.expect_get().returning(|_| Ok(None));

        let mut broker = quiet_broker();
        broker
            .expect_publish_dlq()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut consumer = MockConsumer::new();
        consumer.expect_keep_alive().returning(|_| Ok(()));
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(
            d,
            true,
            vec![Err(JobError::Encoder("exit 1".into()))],
        ));

        // Third delivery of a job that keeps failing retriably.
        runtime(repo, broker)
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(3),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn exhausted_delivery_count_dead_letters_without_running() {
        let d = descriptor();

        let mut repo = MockRepo::new();
        repo.expect_mark_failed()
            .withf(|_, _, attempt| *attempt == 4)
            .times(1)
            .returning(|_, _, _| Ok(VideoStatus::DeadLetter));
        repo.expect_get().returning(|_| Ok(None));

        let mut broker = MockBroker::new();
        broker
            .expect_publish_dlq()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut consumer = MockConsumer::new();
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        // Handler must not run: empty script would panic.
        let handler = Arc::new(FakeHandler::new(d, true, vec![]));

        runtime(repo, broker)
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(4),
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn undecodable_payload_is_acked_and_dropped() {
        let d = descriptor();
        let mut consumer = MockConsumer::new();
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(d, true, vec![]));
        let mut delivery = delivery(1);
        delivery.payload = b"garbage".to_vec();

        runtime(MockRepo::new(), MockBroker::new())
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery,
                CancellationToken::new(),
            )
            .await;
    }

    #[tokio::test]
    async fn auxiliary_jobs_skip_the_lifecycle_entirely() {
        let d = descriptor();

        // No lifecycle writes: a cache-warm failure must never move the
        // video row. Only the title join for the DLQ alert reads it.
        let mut repo = MockRepo::new();
        repo.expect_get().returning(|_| Ok(None));

        let mut broker = quiet_broker();
        broker
            .expect_publish_dlq()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut consumer = MockConsumer::new();
        consumer.expect_keep_alive().returning(|_| Ok(()));
        consumer.expect_ack().times(1).returning(|_| Ok(()));

        let handler = Arc::new(FakeHandler::new(
            d,
            false,
            vec![Err(JobError::Storage("edge 503".into()))],
        ));

        // At the cap so the failure is terminal.
        runtime(repo, broker)
            .handle_delivery(
                Arc::new(consumer),
                handler,
                delivery(3),
                CancellationToken::new(),
            )
            .await;
    }
}
