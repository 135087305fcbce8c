//! Queries for the `supplier_sync_logs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_json, Database};
use crate::errors::DatabaseError;
use crate::models::{SyncLog, SyncLogStatus, SyncType};

const LOG_COLUMNS: &str = "id, supplier_id, sync_type, status, started_at, completed_at,
     products_added, products_updated, products_deactivated, error_message, metadata";

struct SyncLogRow {
    id: String,
    supplier_id: String,
    sync_type: String,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    products_added: i64,
    products_updated: i64,
    products_deactivated: i64,
    error_message: Option<String>,
    metadata: Option<String>,
}

impl SyncLogRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            supplier_id: row.get(1)?,
            sync_type: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            completed_at: row.get(5)?,
            products_added: row.get(6)?,
            products_updated: row.get(7)?,
            products_deactivated: row.get(8)?,
            error_message: row.get(9)?,
            metadata: row.get(10)?,
        })
    }

    fn into_log(self) -> Result<SyncLog, DatabaseError> {
        let started_at =
            parse_datetime(&self.started_at).ok_or_else(|| DatabaseError::InvalidTimestamp {
                column: "started_at".into(),
                value: self.started_at.clone(),
            })?;
        Ok(SyncLog {
            metadata: parse_json("metadata", self.metadata)?,
            started_at,
            completed_at: self.completed_at.as_deref().and_then(parse_datetime),
            sync_type: SyncType::from_str_val(&self.sync_type),
            status: SyncLogStatus::from_str_val(&self.status),
            products_added: self.products_added.max(0) as u64,
            products_updated: self.products_updated.max(0) as u64,
            products_deactivated: self.products_deactivated.max(0) as u64,
            id: self.id,
            supplier_id: self.supplier_id,
            error_message: self.error_message,
        })
    }
}

/// Terminal fields written when a sync log is completed.
#[derive(Debug, Clone)]
pub struct LogCompletion<'a> {
    pub status: SyncLogStatus,
    pub completed_at: DateTime<Utc>,
    pub added: u64,
    pub updated: u64,
    pub deactivated: u64,
    pub error_message: Option<&'a str>,
    pub metadata: Option<&'a serde_json::Value>,
}

/// Insert an `in_progress` log and return its id.
pub fn insert_started(
    conn: &Connection,
    supplier_id: &str,
    sync_type: SyncType,
    started_at: &DateTime<Utc>,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO supplier_sync_logs (id, supplier_id, sync_type, status, started_at)
         VALUES (?1, ?2, ?3, 'in_progress', ?4)",
        params![
            id,
            supplier_id,
            sync_type.to_string(),
            format_datetime(started_at)
        ],
    )?;
    debug!(id = %id, supplier_id, %sync_type, "inserted sync log");
    Ok(id)
}

/// Move an `in_progress` log to its terminal state.
///
/// The update only matches rows still `in_progress`, so a log is completed
/// at most once.
pub fn complete(
    conn: &Connection,
    id: &str,
    completion: &LogCompletion<'_>,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE supplier_sync_logs
         SET status = ?1, completed_at = ?2, products_added = ?3, products_updated = ?4,
             products_deactivated = ?5, error_message = ?6, metadata = ?7
         WHERE id = ?8 AND status = 'in_progress'",
        params![
            completion.status.to_string(),
            format_datetime(&completion.completed_at),
            completion.added as i64,
            completion.updated as i64,
            completion.deactivated as i64,
            completion.error_message,
            completion.metadata.map(|m| m.to_string()),
            id
        ],
    )?;

    if changed == 0 {
        return match get(conn, id)? {
            Some(existing) => Err(DatabaseError::InvalidStateTransition {
                id: id.to_string(),
                from: existing.status.to_string(),
                to: completion.status.to_string(),
            }),
            None => Err(DatabaseError::NotFound {
                entity: "sync_log".into(),
                id: id.to_string(),
            }),
        };
    }

    debug!(id, status = %completion.status, "completed sync log");
    Ok(())
}

/// Fetch one log by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<SyncLog>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM supplier_sync_logs WHERE id = ?1", LOG_COLUMNS),
            params![id],
            SyncLogRow::from_row,
        )
        .optional()?;
    row.map(SyncLogRow::into_log).transpose()
}

/// Most recent logs of a supplier, newest first.
pub fn list_for_supplier(
    conn: &Connection,
    supplier_id: &str,
    limit: u32,
) -> Result<Vec<SyncLog>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM supplier_sync_logs
         WHERE supplier_id = ?1
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?2",
        LOG_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![supplier_id, limit], SyncLogRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SyncLogRow::into_log).collect()
}

/// Count logs of a supplier, optionally filtered by status.
#[cfg(test)]
pub fn count(
    conn: &Connection,
    supplier_id: &str,
    status: Option<SyncLogStatus>,
) -> Result<i64, DatabaseError> {
    let count: i64 = match status {
        Some(s) => conn.query_row(
            "SELECT COUNT(*) FROM supplier_sync_logs WHERE supplier_id = ?1 AND status = ?2",
            params![supplier_id, s.to_string()],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM supplier_sync_logs WHERE supplier_id = ?1",
            params![supplier_id],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

impl Database {
    /// Get one sync log by id.
    pub fn get_sync_log(&self, id: &str) -> Result<Option<SyncLog>, DatabaseError> {
        get(&self.conn(), id)
    }

    /// Most recent sync logs of a supplier, newest first.
    #[cfg(test)]
    pub fn list_sync_logs(
        &self,
        supplier_id: &str,
        limit: u32,
    ) -> Result<Vec<SyncLog>, DatabaseError> {
        list_for_supplier(&self.conn(), supplier_id, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewSupplier;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> (Database, String) {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let sid = db
            .insert_supplier(&NewSupplier {
                name: "s".into(),
                contact_email: "s@x".into(),
                ..Default::default()
            })
            .unwrap();
        (db, sid)
    }

    fn success(added: u64) -> LogCompletion<'static> {
        LogCompletion {
            status: SyncLogStatus::Success,
            completed_at: Utc::now(),
            added,
            updated: 2,
            deactivated: 1,
            error_message: None,
            metadata: None,
        }
    }

    #[test]
    fn test_insert_and_complete() {
        let (db, sid) = setup();
        let id = insert_started(&db.conn(), &sid, SyncType::Manual, &Utc::now()).unwrap();

        let log = db.get_sync_log(&id).unwrap().unwrap();
        assert_eq!(log.status, SyncLogStatus::InProgress);
        assert_eq!(log.sync_type, SyncType::Manual);
        assert!(log.completed_at.is_none());

        let meta = json!({"catalog_size": 3});
        let completion = LogCompletion {
            metadata: Some(&meta),
            ..success(3)
        };
        complete(&db.conn(), &id, &completion).unwrap();

        let log = db.get_sync_log(&id).unwrap().unwrap();
        assert_eq!(log.status, SyncLogStatus::Success);
        assert_eq!(log.products_added, 3);
        assert_eq!(log.products_updated, 2);
        assert_eq!(log.products_deactivated, 1);
        assert!(log.completed_at.unwrap() >= log.started_at);
        assert_eq!(log.metadata.unwrap()["catalog_size"], 3);
    }

    #[test]
    fn test_complete_twice_is_rejected() {
        let (db, sid) = setup();
        let id = insert_started(&db.conn(), &sid, SyncType::Scheduled, &Utc::now()).unwrap();
        complete(&db.conn(), &id, &success(1)).unwrap();

        let failed = LogCompletion {
            status: SyncLogStatus::Failed,
            error_message: Some("late"),
            ..success(0)
        };
        let err = complete(&db.conn(), &id, &failed).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidStateTransition { .. }));

        let log = db.get_sync_log(&id).unwrap().unwrap();
        assert_eq!(log.status, SyncLogStatus::Success);
        assert!(log.error_message.is_none());
    }

    #[test]
    fn test_complete_unknown_log() {
        let (db, _) = setup();
        let err = complete(&db.conn(), "missing", &success(0)).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn test_list_newest_first_with_limit() {
        let (db, sid) = setup();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..3 {
            let at = base + Duration::seconds(i);
            ids.push(insert_started(&db.conn(), &sid, SyncType::Scheduled, &at).unwrap());
        }

        let logs = db.list_sync_logs(&sid, 2).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].id, ids[2]);
        assert_eq!(logs[1].id, ids[1]);

        assert_eq!(count(&db.conn(), &sid, None).unwrap(), 3);
        assert_eq!(
            count(&db.conn(), &sid, Some(SyncLogStatus::InProgress)).unwrap(),
            3
        );
        assert!(db.list_sync_logs("other", 10).unwrap().is_empty());
    }

    #[test]
    fn test_log_requires_existing_supplier() {
        let (db, _) = setup();
        let result = insert_started(&db.conn(), "ghost", SyncType::Manual, &Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_started_at_is_an_invalid_timestamp() {
        let (db, sid) = setup();
        let id = insert_started(&db.conn(), &sid, SyncType::Manual, &Utc::now()).unwrap();
        db.conn()
            .execute(
                "UPDATE supplier_sync_logs SET started_at = 'yesterday' WHERE id = ?1",
                params![id],
            )
            .unwrap();

        let err = get(&db.conn(), &id).unwrap_err();
        match err {
            DatabaseError::InvalidTimestamp { column, value } => {
                assert_eq!(column, "started_at");
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected InvalidTimestamp, got {:?}", other),
        }
    }
}
