//! Queries for the `suppliers` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_json, Database};
use crate::errors::DatabaseError;
use crate::models::{NewSupplier, Supplier};

const SUPPLIER_COLUMNS: &str =
    "id, name, contact_email, external_id, api_code, last_sync_at, sync_metadata";

/// Raw row before JSON decoding (row closures cannot return our error type).
struct SupplierRow {
    id: String,
    name: String,
    contact_email: String,
    external_id: Option<String>,
    api_code: Option<String>,
    last_sync_at: Option<String>,
    sync_metadata: Option<String>,
}

impl SupplierRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            contact_email: row.get(2)?,
            external_id: row.get(3)?,
            api_code: row.get(4)?,
            last_sync_at: row.get(5)?,
            sync_metadata: row.get(6)?,
        })
    }

    fn into_supplier(self) -> Result<Supplier, DatabaseError> {
        Ok(Supplier {
            sync_metadata: parse_json("sync_metadata", self.sync_metadata)?,
            last_sync_at: self.last_sync_at.as_deref().and_then(parse_datetime),
            id: self.id,
            name: self.name,
            contact_email: self.contact_email,
            external_id: self.external_id,
            api_code: self.api_code,
        })
    }
}

/// Insert a supplier and return its generated id.
pub fn insert(conn: &Connection, supplier: &NewSupplier) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO suppliers (id, name, contact_email, external_id, api_code)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            supplier.name,
            supplier.contact_email,
            supplier.external_id,
            supplier.api_code
        ],
    )?;
    debug!(id = %id, name = %supplier.name, "inserted supplier");
    Ok(id)
}

/// Fetch one supplier by id.
pub fn get(conn: &Connection, id: &str) -> Result<Option<Supplier>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM suppliers WHERE id = ?1", SUPPLIER_COLUMNS),
            params![id],
            SupplierRow::from_row,
        )
        .optional()?;
    row.map(SupplierRow::into_supplier).transpose()
}

/// All suppliers ordered by name.
pub fn list(conn: &Connection) -> Result<Vec<Supplier>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM suppliers ORDER BY name, id",
        SUPPLIER_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], SupplierRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SupplierRow::into_supplier).collect()
}

/// Whether a supplier row exists.
pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM suppliers WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Record a successful sync: advances `last_sync_at` and replaces the
/// sync metadata.
pub fn mark_synced(
    conn: &Connection,
    id: &str,
    at: &DateTime<Utc>,
    metadata: &serde_json::Value,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE suppliers SET last_sync_at = ?1, sync_metadata = ?2 WHERE id = ?3",
        params![format_datetime(at), metadata.to_string(), id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "supplier".into(),
            id: id.to_string(),
        });
    }
    debug!(id, "recorded supplier sync success");
    Ok(())
}

/// Replace the sync metadata only; `last_sync_at` keeps pointing at the
/// last successful sync.
pub fn set_sync_metadata(
    conn: &Connection,
    id: &str,
    metadata: &serde_json::Value,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE suppliers SET sync_metadata = ?1 WHERE id = ?2",
        params![metadata.to_string(), id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "supplier".into(),
            id: id.to_string(),
        });
    }
    debug!(id, "updated supplier sync metadata");
    Ok(())
}

impl Database {
    /// Register a new supplier.
    pub fn insert_supplier(&self, supplier: &NewSupplier) -> Result<String, DatabaseError> {
        insert(&self.conn(), supplier)
    }

    /// Get a supplier by id, `None` if it does not exist.
    pub fn get_supplier(&self, id: &str) -> Result<Option<Supplier>, DatabaseError> {
        get(&self.conn(), id)
    }

    /// List every supplier.
    pub fn list_suppliers(&self) -> Result<Vec<Supplier>, DatabaseError> {
        list(&self.conn())
    }
}
