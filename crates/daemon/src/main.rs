//! stocksync daemon entry point.
//!
//! Loads configuration, opens the database, starts the sync worker and the
//! periodic scheduler, and handles graceful shutdown.

mod scheduler;
mod signals;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use stocksync_core::catalog::CatalogRegistry;
use stocksync_core::config::AppConfig;
use stocksync_core::db::Database;
use stocksync_core::jobs::sync_channel;
use stocksync_core::notify::Notifier;
use stocksync_core::sync_engine::SyncEngine;

/// Jobs that may wait on the queue before `enqueue` applies backpressure.
const QUEUE_CAPACITY: usize = 32;

/// How long the worker gets to finish its current job on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// stocksync synchronization daemon.
#[derive(Parser, Debug)]
#[command(
    name = "stocksync-daemon",
    version,
    about = "Periodically reconciles supplier catalogs into the product store"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_and_resolve(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level)
        .to_string();
    let _log_guard = init_tracing(&log_level, config.daemon.log_dir.as_deref())?;

    // Startup banner
    info!("========================================");
    info!("  stocksync daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", args.config.display());
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("Suppliers     : {}", config.suppliers.len());
    info!("Interval      : {}s", config.schedule.interval_secs);
    info!("Concurrency   : {}", config.schedule.max_concurrent_syncs);
    info!(
        "Events        : {}",
        config
            .events
            .as_ref()
            .filter(|e| e.enabled)
            .map(|e| e.api_url.as_str())
            .unwrap_or("disabled")
    );
    info!("Log level     : {}", log_level);
    info!("========================================");

    std::fs::create_dir_all(&config.daemon.data_dir).context("failed to create data directory")?;

    let db_path = config.daemon.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize()
        .context("failed to initialize database schema")?;
    info!("Database initialized at {}", db_path.display());

    let registry =
        CatalogRegistry::from_config(&config).context("failed to build supplier API clients")?;
    let notifier = Notifier::new(config.events.as_ref());
    let engine = Arc::new(SyncEngine::new(&config, Arc::new(db), registry, notifier));
    info!("Sync engine initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (queue, worker) = sync_channel(engine, QUEUE_CAPACITY);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let sched = scheduler::Scheduler::new(
        queue,
        Duration::from_secs(config.schedule.interval_secs),
        config.schedule.run_on_startup,
    );
    let stats = sched.stats();
    let scheduler_handle = tokio::spawn(sched.run(shutdown_rx));

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    if shutdown_tx.send(true).is_err() {
        warn!("scheduler and worker already stopped");
    }

    if let Err(e) = scheduler_handle.await {
        warn!("scheduler task error: {}", e);
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, worker_handle).await {
        Ok(Ok(())) => info!("sync worker stopped gracefully"),
        Ok(Err(e)) => warn!("sync worker task error: {}", e),
        Err(_) => warn!(
            "sync worker did not stop within {}s, forcing shutdown",
            SHUTDOWN_GRACE.as_secs()
        ),
    }

    info!(
        cycles = stats.total_cycles.load(Ordering::SeqCst),
        completed = stats.completed_cycles.load(Ordering::SeqCst),
        skipped = stats.skipped_cycles.load(Ordering::SeqCst),
        failed_syncs = stats.failed_syncs.load(Ordering::SeqCst),
        "scheduler summary"
    );
    info!("stocksync daemon stopped.");
    Ok(())
}

/// Install the stdout subscriber, plus a daily-rolling file when `log_dir`
/// is set. The returned guard flushes the file writer when dropped.
fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "stocksync-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(file_layer)
        .init();

    Ok(guard)
}
