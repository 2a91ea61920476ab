//! sitekb worker process.
//!
//! Claims knowledge build tasks from PostgreSQL and runs them until Ctrl-C or
//! SIGTERM. Configuration is read from the environment only.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitekb_core::ClaimTarget;
use sitekb_crawler::{AdapterResolver, CrawlOrchestrator, FetcherConfig, HtmdConverter, HttpFetcher};
use sitekb_db::{log_pool_metrics, BuildTaskRepository, Database, PoolConfig};
use sitekb_inference::{build_embedder, EmbedderConfig};
use sitekb_jobs::{
    BuildPipeline, BuildTaskQueue, KnowledgeBuildHandler, TaskWorker, WorkerConfig, WorkerEvent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "sitekb_worker=debug,sitekb_jobs=debug,sitekb_crawler=info,sitekb_inference=info,sitekb_db=info"
            .into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sitekb-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        subsystem = "worker",
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    info!(subsystem = "worker", "Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to database")?;
    info!(subsystem = "worker", "Database connected");

    info!(subsystem = "worker", "Running database migrations...");
    db.migrate().await.context("failed to apply migrations")?;
    info!(subsystem = "worker", "Database migrations complete");

    let embedder = build_embedder(&EmbedderConfig::from_env()?)
        .context("failed to configure embedder")?;
    if let Some(embedder) = &embedder {
        info!(
            subsystem = "worker",
            model = embedder.model_name(),
            dimension = embedder.dimension(),
            "Embedder configured"
        );
    }

    let fetcher = HttpFetcher::new(FetcherConfig::from_env()).context("failed to build HTTP client")?;
    let adapters = AdapterResolver::from_env().context("failed to load site adapters")?;
    let orchestrator = Arc::new(CrawlOrchestrator::new(Arc::new(fetcher), Arc::new(adapters)));

    let pipeline = Arc::new(BuildPipeline::new(
        orchestrator,
        Arc::new(db.versions.clone()),
        Arc::new(db.documents.clone()),
        Arc::new(HtmdConverter::new()),
        embedder,
    ));
    let handler = KnowledgeBuildHandler::new(Arc::new(db.sources.clone()), pipeline)
        .with_recordings(Arc::new(db.recording_tasks.clone()));

    let config = WorkerConfig::from_env();
    let queue = Arc::new(BuildTaskQueue::new(
        Arc::new(db.build_tasks.clone()),
        config.claim_filter(ClaimTarget::KnowledgeBuild),
        config.claim_settings(),
    ));

    match db.build_tasks.count_ready(queue.filter()).await {
        Ok(ready) => info!(subsystem = "worker", ready, "Build tasks ready at startup"),
        Err(e) => warn!(subsystem = "worker", error = %e, "Failed to count ready build tasks"),
    }

    let handle = TaskWorker::new(queue.clone(), Arc::new(handler), config)
        .with_progress_store(queue)
        .start();
    let events = handle.events();

    tokio::select! {
        _ = shutdown_signal() => {
            info!(subsystem = "worker", "Shutdown signal received, stopping worker");
            handle.shutdown().await?;
        }
        _ = watch_events(events, &db) => {}
    }

    handle.join().await?;
    db.pool.close().await;
    info!(subsystem = "worker", "Worker exited");
    Ok(())
}

/// Log worker events until the worker stops. Pool health is sampled after each task.
async fn watch_events(mut events: broadcast::Receiver<WorkerEvent>, db: &Database) {
    loop {
        match events.recv().await {
            Ok(WorkerEvent::WorkerStopped) | Err(RecvError::Closed) => return,
            Ok(
                event @ (WorkerEvent::TaskCompleted { .. }
                | WorkerEvent::TaskFailed { .. }
                | WorkerEvent::TaskStopped { .. }),
            ) => {
                debug!(subsystem = "worker", event = ?event, "Worker event");
                log_pool_metrics(&db.pool);
            }
            Ok(event) => debug!(subsystem = "worker", event = ?event, "Worker event"),
            Err(RecvError::Lagged(skipped)) => {
                debug!(subsystem = "worker", skipped, "Worker event receiver lagged")
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(subsystem = "worker", error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(subsystem = "worker", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
