//! Periodic "sync all suppliers" scheduler.
//!
//! Every `interval_secs` the scheduler enqueues one scheduled sync of all
//! suppliers on the job queue. If the previous cycle is still running the
//! tick is skipped rather than queued up behind it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use stocksync_core::jobs::{JobHandle, SyncQueue, SyncTarget};
use stocksync_core::models::SyncType;

/// Tracks aggregate statistics across scheduled cycles.
#[derive(Default)]
pub struct SchedulerStats {
    pub total_cycles: AtomicU64,
    pub completed_cycles: AtomicU64,
    pub skipped_cycles: AtomicU64,
    pub failed_syncs: AtomicU64,
}

/// The sync scheduler.
pub struct Scheduler {
    queue: SyncQueue,
    interval: Duration,
    run_on_startup: bool,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
}

impl Scheduler {
    pub fn new(queue: SyncQueue, interval: Duration, run_on_startup: bool) -> Self {
        Self {
            queue,
            interval,
            run_on_startup,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    /// Main scheduler loop. Returns once `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            run_on_startup = self.run_on_startup,
            "scheduler started"
        );

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately.
        if !self.run_on_startup {
            interval.tick().await;
        }

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.maybe_run_cycle().await;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Enqueue a sync cycle unless one is already in flight.
    async fn maybe_run_cycle(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.stats.skipped_cycles.fetch_add(1, Ordering::SeqCst);
            warn!("skipping scheduled sync: previous cycle still running");
            return;
        }

        let cycle = self.stats.total_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!(cycle, "starting scheduled sync");

        match self
            .queue
            .enqueue(SyncTarget::All, false, SyncType::Scheduled)
            .await
        {
            Ok(handle) => {
                let running = self.running.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    await_cycle(cycle, handle, &stats).await;
                    running.store(false, Ordering::SeqCst);
                });
            }
            Err(e) => {
                error!(cycle, error = %e, "could not enqueue scheduled sync");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }
}

async fn await_cycle(cycle: u64, handle: JobHandle, stats: &SchedulerStats) {
    let job_id = handle.id();
    match handle.wait().await {
        Ok(results) => {
            let failed = results.iter().filter(|r| !r.is_success()).count();
            stats.completed_cycles.fetch_add(1, Ordering::SeqCst);
            stats.failed_syncs.fetch_add(failed as u64, Ordering::SeqCst);
            for result in results.iter().filter(|r| !r.is_success()) {
                warn!(
                    cycle,
                    supplier_id = %result.supplier_id,
                    error = result.error_message.as_deref().unwrap_or(""),
                    "scheduled supplier sync failed"
                );
            }
            info!(
                cycle,
                %job_id,
                suppliers = results.len(),
                failed,
                "scheduled sync completed"
            );
        }
        Err(e) => error!(cycle, %job_id, error = %e, "scheduled sync failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stocksync_core::catalog::CatalogRegistry;
    use stocksync_core::config::AppConfig;
    use stocksync_core::db::Database;
    use stocksync_core::jobs::sync_channel;
    use stocksync_core::notify::Notifier;
    use stocksync_core::sync_engine::SyncEngine;

    fn queue() -> (SyncQueue, watch::Sender<bool>, watch::Receiver<bool>) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let engine = Arc::new(SyncEngine::new(
            &AppConfig::default(),
            db,
            CatalogRegistry::new(),
            Notifier::disabled(),
        ));
        let (queue, worker) = sync_channel(engine, 4);
        let (tx, rx) = watch::channel(false);
        tokio::spawn(worker.run(rx.clone()));
        (queue, tx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_on_startup_and_every_interval() {
        let (queue, shutdown_tx, shutdown_rx) = queue();
        let scheduler = Scheduler::new(queue, Duration::from_secs(60), true);
        let stats = scheduler.stats();
        let task = tokio::spawn(scheduler.run(shutdown_rx));

        time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(stats.total_cycles.load(Ordering::SeqCst), 3);
        assert_eq!(stats.completed_cycles.load(Ordering::SeqCst), 3);
        assert_eq!(stats.failed_syncs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_first_interval_by_default() {
        let (queue, shutdown_tx, shutdown_rx) = queue();
        let scheduler = Scheduler::new(queue, Duration::from_secs(60), false);
        let stats = scheduler.stats();
        let task = tokio::spawn(scheduler.run(shutdown_rx));

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(stats.total_cycles.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(45)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        assert_eq!(stats.total_cycles.load(Ordering::SeqCst), 1);
    }
}
