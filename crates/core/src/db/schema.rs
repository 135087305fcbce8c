//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "suppliers and products",
        r#"
        CREATE TABLE IF NOT EXISTS suppliers (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            contact_email   TEXT NOT NULL,
            external_id     TEXT,
            api_code        TEXT,
            last_sync_at    TEXT,
            sync_metadata   TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_suppliers_external_id ON suppliers (external_id);

        CREATE TABLE IF NOT EXISTS products (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            stock           INTEGER NOT NULL DEFAULT 0 CHECK (stock >= 0),
            supplier_id     TEXT REFERENCES suppliers (id),
            external_id     TEXT,
            is_active       INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_products_supplier ON products (supplier_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_products_supplier_external
            ON products (supplier_id, external_id)
            WHERE external_id IS NOT NULL;
        "#,
    ),
    (
        2,
        "supplier sync logs",
        r#"
        CREATE TABLE IF NOT EXISTS supplier_sync_logs (
            id                   TEXT PRIMARY KEY,
            supplier_id          TEXT NOT NULL REFERENCES suppliers (id),
            sync_type            TEXT NOT NULL CHECK (sync_type IN ('scheduled', 'manual')),
            status               TEXT NOT NULL CHECK (status IN ('in_progress', 'success', 'failed')),
            started_at           TEXT NOT NULL,
            completed_at         TEXT,
            products_added       INTEGER NOT NULL DEFAULT 0,
            products_updated     INTEGER NOT NULL DEFAULT 0,
            products_deactivated INTEGER NOT NULL DEFAULT 0,
            error_message        TEXT,
            metadata             TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_sync_logs_supplier_started
            ON supplier_sync_logs (supplier_id, started_at);
        CREATE INDEX IF NOT EXISTS idx_sync_logs_status ON supplier_sync_logs (status);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
