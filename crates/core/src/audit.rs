//! Sync audit log.
//!
//! Every sync attempt gets a log row *before* any remote call, so a crash
//! during fetch or reconciliation still leaves an `in_progress` record
//! behind. Completion happens exactly once and moves the row to `success`
//! or `failed`.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::sync_logs::{self, LogCompletion};
use crate::db::{suppliers, Database};
use crate::errors::DatabaseError;
use crate::models::{SyncLog, SyncLogStatus, SyncType};
use crate::reconcile::ReconcileStats;

/// Terminal outcome of one sync attempt.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    Success {
        stats: ReconcileStats,
        metadata: serde_json::Value,
    },
    Failed {
        error: String,
    },
}

impl SyncOutcome {
    pub fn status(&self) -> SyncLogStatus {
        match self {
            Self::Success { .. } => SyncLogStatus::Success,
            Self::Failed { .. } => SyncLogStatus::Failed,
        }
    }
}

/// Audit log facade over the `supplier_sync_logs` table.
pub struct SyncAudit {
    db: Arc<Database>,
    history_limit_max: u32,
}

impl SyncAudit {
    pub fn new(db: Arc<Database>, history_limit_max: u32) -> Self {
        Self {
            db,
            history_limit_max: history_limit_max.max(1),
        }
    }

    /// Record the start of a sync attempt and return the new log id.
    pub fn begin(&self, supplier_id: &str, sync_type: SyncType) -> Result<String, DatabaseError> {
        let log_id =
            sync_logs::insert_started(&self.db.conn(), supplier_id, sync_type, &Utc::now())?;
        info!(log_id = %log_id, supplier_id, %sync_type, "sync started");
        Ok(log_id)
    }

    /// Complete a log on its own connection lock.
    pub fn complete(&self, log_id: &str, outcome: &SyncOutcome) -> Result<(), DatabaseError> {
        complete_on(&self.db.conn(), log_id, outcome)
    }

    /// Most recent sync logs of a supplier, newest first.
    ///
    /// `limit` is clamped to `1..=history_limit_max`.
    pub fn history(&self, supplier_id: &str, limit: u32) -> Result<Vec<SyncLog>, DatabaseError> {
        let limit = limit.clamp(1, self.history_limit_max);
        let conn = self.db.conn();
        if !suppliers::exists(&conn, supplier_id)? {
            return Err(DatabaseError::NotFound {
                entity: "supplier".into(),
                id: supplier_id.to_string(),
            });
        }
        sync_logs::list_for_supplier(&conn, supplier_id, limit)
    }
}

/// Complete a log on an existing connection, typically inside the
/// transaction that applied the reconciliation.
pub fn complete_on(
    conn: &Connection,
    log_id: &str,
    outcome: &SyncOutcome,
) -> Result<(), DatabaseError> {
    let completed_at = Utc::now();
    let completion = match outcome {
        SyncOutcome::Success { stats, metadata } => LogCompletion {
            status: SyncLogStatus::Success,
            completed_at,
            added: stats.added,
            updated: stats.updated,
            deactivated: stats.deactivated,
            error_message: None,
            metadata: Some(metadata),
        },
        SyncOutcome::Failed { error } => LogCompletion {
            status: SyncLogStatus::Failed,
            completed_at,
            added: 0,
            updated: 0,
            deactivated: 0,
            error_message: Some(error.as_str()),
            metadata: None,
        },
    };
    sync_logs::complete(conn, log_id, &completion)?;
    debug!(log_id, status = %outcome.status(), "sync log completed");
    Ok(())
}
