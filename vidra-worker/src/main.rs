//! # Vidra Worker
//!
//! Stateless worker process: pulls jobs off the broker's durable
//! streams, runs the media pipelines, keeps the `video` row honest, and
//! publishes progress and heartbeats. Concurrency is bounded per
//! process; the disk monitor pauses fetching when scratch fills.

mod handlers;
mod heartbeat;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidra_core::broker::{JobConsumer, RedisBroker};
use vidra_core::disk::{DiskMonitor, FsProbe, select_scratch_root};
use vidra_core::pipeline::{
    FfmpegRunner, FfprobeRunner, GalleryPipeline, TranscodePipeline,
    gallery::CommandClassifier,
};
use vidra_core::repo::PgVideoRepository;
use vidra_core::storage::S3Store;
use vidra_model::WorkerId;

use crate::handlers::{
    GalleryHandler, JobHandler, TranscodeHandler, WarmCacheHandler,
};
use crate::heartbeat::HeartbeatLoop;
use crate::runtime::{Registration, RuntimeConfig, WorkerRuntime};

/// Consumer-group name shared by the worker fleet; each process joins
/// it under its own consumer name.
const CONSUMER_GROUP: &str = "vidra-workers";

const FETCH_POLL_WINDOW: Duration = Duration::from_secs(2);
const PRESIGN_TTL: Duration = Duration::from_secs(6 * 3600);

#[derive(Debug, Parser)]
#[command(name = "vidra-worker", about = "Vidra transcoding worker")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "VIDRA_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => vidra_config::load_from_path(path)?,
        None => vidra_config::load()?,
    };

    let worker_id = WorkerId::new(config.worker.resolved_worker_id());
    info!(
        "Starting worker {worker_id} ({}, concurrency {})",
        config.worker.worker_type, config.worker.concurrency
    );

    let scratch_root =
        select_scratch_root(&config.worker.temp_path, &config.ramdisk);
    tokio::fs::create_dir_all(&scratch_root)
        .await
        .with_context(|| format!("creating scratch root {scratch_root:?}"))?;

    // Shared infrastructure.
    let broker = Arc::new(
        RedisBroker::connect(&config.broker.url)
            .await
            .context("connecting to broker")?,
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to database")?;
    let repo = Arc::new(PgVideoRepository::new(
        pool,
        config.broker.max_deliveries,
    ));
    let store = Arc::new(S3Store::connect(&config.storage).await);

    // Pipelines.
    let prober = FfprobeRunner::new(&config.encoder.ffprobe_path);
    let encoder = FfmpegRunner::new(
        &config.encoder.ffmpeg_path,
        &config.encoder.preset,
        config.encoder.hls_time_secs,
        config.encoder.gop_alignment,
    );
    let make_gallery = || {
        GalleryPipeline::new(
            store.clone(),
            Arc::new(CommandClassifier::new(&config.gallery.classifier_path)),
            encoder.clone(),
            config.gallery.min_duration_secs,
        )
    };
    let pipeline = Arc::new(TranscodePipeline::new(
        store.clone(),
        prober.clone(),
        encoder.clone(),
        config.gallery.enabled.then(&make_gallery),
        scratch_root.clone(),
        PRESIGN_TTL,
    ));

    // Disk monitor drives the consumer pause flag.
    let (disk_monitor, disk_state) = DiskMonitor::new(
        config.disk.clone(),
        Arc::new(FsProbe),
        scratch_root.clone(),
    );

    let runtime_config = RuntimeConfig {
        worker_id: worker_id.clone(),
        concurrency: config.worker.concurrency,
        max_deliveries: config.broker.max_deliveries,
        job_timeout: Duration::from_secs(config.worker.job_timeout_secs),
        keepalive_interval: Duration::from_secs(config.broker.keepalive_secs),
        shutdown_timeout: Duration::from_secs(
            config.worker.shutdown_timeout_secs,
        ),
    };
    let runtime = Arc::new(WorkerRuntime::new(
        repo.clone(),
        broker.clone(),
        runtime_config,
        disk_state.clone(),
    ));

    // Handlers and their consumers.
    let transcode: Arc<dyn JobHandler> = Arc::new(TranscodeHandler::new(
        pipeline,
        repo.clone(),
        broker.clone(),
        config.warmcache.enabled,
        config.subtitle.auto.then(|| config.subtitle.language.clone()),
    ));
    let gallery_handler: Arc<dyn JobHandler> = Arc::new(GalleryHandler::new(
        Arc::new(make_gallery()),
        prober.clone(),
        store.clone(),
        repo.clone(),
        scratch_root.clone(),
        PRESIGN_TTL,
    ));
    let warmcache: Arc<dyn JobHandler> = Arc::new(WarmCacheHandler::new(
        reqwest::Client::new(),
        config.storage.public_url.clone(),
    ));

    let visibility = Duration::from_secs(config.broker.visibility_timeout_secs);
    let mut registrations = Vec::new();
    for handler in [transcode, gallery_handler, warmcache] {
        let consumer: Arc<dyn JobConsumer> = Arc::new(
            broker
                .consumer(
                    handler.subject(),
                    CONSUMER_GROUP,
                    worker_id.as_str(),
                    visibility,
                    FETCH_POLL_WINDOW,
                )
                .await
                .with_context(|| {
                    format!("creating consumer for {}", handler.subject())
                })?,
        );
        registrations.push(Registration { consumer, handler });
    }

    // Background loops.
    let shutdown = CancellationToken::new();
    let monitor_handle = tokio::spawn(disk_monitor.run(shutdown.clone()));
    let heartbeat = HeartbeatLoop::new(
        broker.clone(),
        runtime.clone(),
        disk_state,
        worker_id,
        config.worker.worker_type.clone(),
        config.worker.concurrency,
        config.encoder.gpu_enabled,
        Duration::from_secs(config.worker.heartbeat_interval_secs),
    );
    let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.clone()));

    // Signals: stop fetching, drain, then exit.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                )
                .expect("installing SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        });
    }

    runtime.run(registrations, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = monitor_handle.await {
        warn!("Disk monitor task ended abnormally: {e}");
    }
    if let Err(e) = heartbeat_handle.await {
        warn!("Heartbeat task ended abnormally: {e}");
    }
    info!("Worker stopped");
    Ok(())
}
