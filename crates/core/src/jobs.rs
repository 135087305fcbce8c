//! Background sync jobs.
//!
//! A [`SyncQueue`] hands [`SyncJob`]s to a long-lived [`SyncWorker`] over a
//! bounded channel. The worker calls the same [`SyncEngine`] methods as a
//! direct caller would, so queued and inline syncs share one code path.
//! The worker stops when the shutdown watch flips to `true`, after finishing
//! the job it is running.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::SyncError;
use crate::models::{SyncResult, SyncType};
use crate::sync_engine::SyncEngine;

/// Which suppliers a job syncs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    One(String),
    All,
}

/// One queued unit of work.
#[derive(Debug)]
pub struct SyncJob {
    pub id: Uuid,
    pub target: SyncTarget,
    pub force: bool,
    pub sync_type: SyncType,
    reply: oneshot::Sender<Result<Vec<SyncResult>, SyncError>>,
}

/// Returned by [`SyncQueue::enqueue`]; resolves to the job's final results.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    target: SyncTarget,
    rx: oneshot::Receiver<Result<Vec<SyncResult>, SyncError>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// What a caller reports before the job has run: a `queued` result for
    /// a single-supplier job, nothing for a batch.
    pub fn queued_result(&self) -> Option<SyncResult> {
        match &self.target {
            SyncTarget::One(id) => Some(SyncResult::queued(id.clone())),
            SyncTarget::All => None,
        }
    }

    /// Wait for the worker to finish the job.
    pub async fn wait(self) -> Result<Vec<SyncResult>, SyncError> {
        self.rx.await.map_err(|_| SyncError::QueueClosed)?
    }
}

/// Sending side of the job channel. Cheap to clone.
#[derive(Clone)]
pub struct SyncQueue {
    tx: mpsc::Sender<SyncJob>,
}

impl SyncQueue {
    /// Queue a sync and return a handle to its eventual results.
    pub async fn enqueue(
        &self,
        target: SyncTarget,
        force: bool,
        sync_type: SyncType,
    ) -> Result<JobHandle, SyncError> {
        let (reply, rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let job = SyncJob {
            id,
            target: target.clone(),
            force,
            sync_type,
            reply,
        };
        self.tx.send(job).await.map_err(|_| SyncError::QueueClosed)?;
        debug!(job_id = %id, ?target, %sync_type, "sync job queued");
        Ok(JobHandle { id, target, rx })
    }
}

/// Receives jobs and runs them one at a time.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    rx: mpsc::Receiver<SyncJob>,
}

/// Create a connected queue and worker.
pub fn sync_channel(engine: Arc<SyncEngine>, capacity: usize) -> (SyncQueue, SyncWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (SyncQueue { tx }, SyncWorker { engine, rx })
}

impl SyncWorker {
    /// Process jobs until shutdown is signalled or every queue handle is
    /// dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("sync worker started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sync worker received shutdown signal");
                        break;
                    }
                }
                job = self.rx.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => {
                        info!("sync queue closed");
                        break;
                    }
                },
            }
        }
        info!("sync worker stopped");
    }

    async fn process(&self, job: SyncJob) {
        info!(job_id = %job.id, target = ?job.target, force = job.force, "running sync job");
        let results = match &job.target {
            SyncTarget::One(id) => Ok(vec![
                self.engine.sync_supplier(id, job.force, job.sync_type).await,
            ]),
            SyncTarget::All => self.engine.sync_all(job.force, job.sync_type).await,
        };
        if let Err(ref e) = results {
            warn!(job_id = %job.id, error = %e, "sync job failed");
        }
        if job.reply.send(results).is_err() {
            debug!(job_id = %job.id, "job handle dropped before completion");
        }
    }
}
