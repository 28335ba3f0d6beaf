//! # Vidra Server
//!
//! The producer node: validates incoming requests, owns the `video`
//! rows, publishes jobs to the broker, and keeps operators and browsers
//! informed. Runs three background loops alongside the HTTP surface:
//! the stuck-job detector, the dead-letter alerter, and the progress
//! fan-out.

mod api;
mod cache;
mod errors;
mod fanout;
mod state;
mod supervisor;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vidra_config::Config;
use vidra_core::broker::{JobConsumer, RedisBroker, subjects};
use vidra_core::repo::PgVideoRepository;
use vidra_core::storage::S3Store;
use vidra_core::upload::{JobDefaults, RedisSessionStore, UploadCoordinator};
use vidra_model::{Codec, Quality};

use crate::cache::VideoCache;
use crate::fanout::{ConnectionManager as Connections, ProgressFanout};
use crate::state::AppState;
use crate::supervisor::{
    DlqAlerter, NoopNotifier, Notifier, StuckDetectorConfig, StuckJobDetector,
    WebhookNotifier,
};

const ALERT_GROUP: &str = "vidra-alerts";
const DLQ_POLL_WINDOW: Duration = Duration::from_secs(5);
const DLQ_VISIBILITY: Duration = Duration::from_secs(60);
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "vidra-server", about = "Vidra producer API server")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, env = "VIDRA_CONFIG")]
    config: Option<PathBuf>,
}

fn job_defaults(config: &Config) -> anyhow::Result<JobDefaults> {
    let codec = Codec::from_str(&config.encoder.codec)
        .map_err(|e| anyhow::anyhow!("encoder.codec: {e}"))?;
    let qualities = config
        .encoder
        .ladder()
        .iter()
        .map(|label| {
            Quality::from_str(label)
                .map_err(|e| anyhow::anyhow!("encoder.qualities: {e}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(JobDefaults {
        codec,
        qualities,
        use_byte_range: false,
        generate_gallery: config.gallery.enabled,
    })
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

    // Durable state.
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("../vidra-core/migrations")
        .run(&pool)
        .await
        .context("running migrations")?;
    let repo = Arc::new(PgVideoRepository::new(
        pool,
        config.broker.max_deliveries,
    ));

    // Broker and object store.
    let broker = Arc::new(
        RedisBroker::connect(&config.broker.url)
            .await
            .context("connecting to broker")?,
    );
    let store = Arc::new(S3Store::connect(&config.storage).await);

    // Redis-side helpers share one managed connection.
    let redis_client = redis::Client::open(config.broker.url.as_str())
        .context("opening redis client")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("connecting redis helper channel")?;
    let sessions = Arc::new(RedisSessionStore::new(
        redis_conn.clone(),
        Duration::from_secs(config.upload.session_ttl_secs),
    ));
    let cache = VideoCache::new(redis_conn, CACHE_TTL);

    let defaults = job_defaults(&config)?;
    let coordinator = Arc::new(UploadCoordinator::new(
        store.clone(),
        repo.clone(),
        broker.clone(),
        sessions,
        config.upload.part_size_bytes,
        Duration::from_secs(config.upload.presign_ttl_secs),
        defaults.clone(),
    ));

    let connections = Connections::new();
    let state = AppState {
        repo: repo.clone(),
        broker: broker.clone(),
        store: store.clone(),
        coordinator,
        connections: connections.clone(),
        cache: cache.clone(),
        job_defaults: defaults.clone(),
    };

    let cancel = CancellationToken::new();

    // Supervisor: stuck-job detector.
    let detector = StuckJobDetector::new(
        repo.clone(),
        broker.clone(),
        store.clone(),
        StuckDetectorConfig {
            codec: defaults.codec,
            qualities: defaults.qualities.clone(),
            generate_gallery: defaults.generate_gallery,
            ..Default::default()
        },
    );
    let detector_handle = tokio::spawn(detector.run(cancel.clone()));

    // Supervisor: dead-letter alerter.
    let notifier: Arc<dyn Notifier> = match (
        config.alerts.enabled,
        config.alerts.webhook.clone(),
    ) {
        (true, Some(url)) => {
            Arc::new(WebhookNotifier::new(reqwest::Client::new(), url))
        }
        _ => Arc::new(NoopNotifier),
    };
    let alert_consumer_name = hostname();
    let mut dlq_consumers: Vec<Arc<dyn JobConsumer>> = Vec::new();
    for subject in subjects::all_dlq_subjects() {
        let consumer = broker
            .consumer(
                &subject,
                ALERT_GROUP,
                &alert_consumer_name,
                DLQ_VISIBILITY,
                DLQ_POLL_WINDOW,
            )
            .await
            .with_context(|| format!("creating DLQ consumer for {subject}"))?;
        dlq_consumers.push(Arc::new(consumer));
    }
    let alerter = DlqAlerter::new(dlq_consumers, repo.clone(), notifier);
    let alerter_handle = tokio::spawn(alerter.run(cancel.clone()));

    // Progress fan-out to browsers.
    let fanout = ProgressFanout::new(
        broker.clone(),
        repo.clone(),
        connections,
        cache,
    );
    let fanout_handle = tokio::spawn(fanout.run(cancel.clone()));

    // HTTP surface.
    let router = api::router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Vidra server listening on {addr}");

    let serve_cancel = cancel.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            serve_cancel.cancel();
        })
        .await
        .context("serving HTTP")?;

    cancel.cancel();
    for (name, handle) in [
        ("stuck detector", detector_handle),
        ("dlq alerter", alerter_handle),
        ("progress fan-out", fanout_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("{name} ended abnormally: {e}");
        }
    }
    info!("Server stopped");
    Ok(())
}

fn hostname() -> String {
    ::hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "vidra-server".to_string())
}

async fn shutdown_signal() {
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
}
