//! Error types for the stocksync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// The supplier's auth scheme is not one of header, query or basic.
    #[error("unknown auth type '{auth_type}' for supplier '{supplier_code}'")]
    UnknownAuthType {
        supplier_code: String,
        auth_type: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A stored JSON column could not be encoded or decoded.
    #[error("invalid JSON in column '{column}': {detail}")]
    InvalidJson { column: String, detail: String },

    /// A stored timestamp column is not RFC 3339.
    #[error("invalid timestamp in column '{column}': {value}")]
    InvalidTimestamp { column: String, value: String },

    /// A sync log was asked to leave a state it is not in.
    #[error("sync log {id} cannot move from {from} to {to}")]
    InvalidStateTransition { id: String, from: String, to: String },
}

// ---------------------------------------------------------------------------
// Catalog fetch errors
// ---------------------------------------------------------------------------

/// Errors from fetching a supplier catalog.
///
/// A fetch either returns the whole catalog or fails; there is no partial
/// result.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog fetch failed for supplier '{supplier_code}': {cause}")]
    FetchFailed {
        supplier_code: String,
        cause: FetchCause,
    },
}

impl CatalogError {
    pub fn fetch_failed(supplier_code: impl Into<String>, cause: FetchCause) -> Self {
        Self::FetchFailed {
            supplier_code: supplier_code.into(),
            cause,
        }
    }

    /// The supplier code the failed fetch was made for.
    pub fn supplier_code(&self) -> &str {
        match self {
            Self::FetchFailed { supplier_code, .. } => supplier_code,
        }
    }
}

/// Underlying reason a catalog fetch failed.
#[derive(Debug, Error)]
pub enum FetchCause {
    /// Connection refused, DNS failure, TLS error and similar.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The fetch did not finish within the configured timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// The supplier API answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The body was not the JSON document the supplier format expects.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The request could not be built from the supplier configuration.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

/// Errors from applying a catalog diff to the local product store.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The supplier being reconciled does not exist.
    #[error("supplier not found: {0}")]
    SupplierNotFound(String),

    /// The diff could not be committed; nothing was applied.
    #[error("reconciliation rolled back: {0}")]
    Persistence(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification publisher.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// HTTP error talking to the broker.
    #[error("broker HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The broker rejected the request.
    #[error("broker rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// The broker accepted the message but no queue was bound to receive it.
    #[error("message to '{routing_key}' was not routed")]
    NotRouted { routing_key: String },

    /// The publisher URL could not be built.
    #[error("invalid broker URL: {0}")]
    InvalidUrl(String),

    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Sync orchestration errors
// ---------------------------------------------------------------------------

/// Errors raised while running a single supplier sync.
///
/// The orchestrator converts these into a failed `SyncResult`; they never
/// escape a batch run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The supplier id does not exist.
    #[error("Supplier not found: {0}")]
    SupplierNotFound(String),

    /// The supplier has no api_code, or the code has no registered adapter.
    #[error("Supplier has no valid API code configured")]
    NoAdapter { supplier_id: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),

    /// The background worker is gone and can no longer accept jobs.
    #[error("sync queue is closed")]
    QueueClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ConfigError::UnknownAuthType {
            supplier_code: "supplier9".into(),
            auth_type: "oauth".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown auth type 'oauth' for supplier 'supplier9'"
        );

        let err = CatalogError::fetch_failed(
            "supplier1",
            FetchCause::HttpStatus {
                status: 503,
                body: "maintenance".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "catalog fetch failed for supplier 'supplier1': HTTP 503: maintenance"
        );
        assert_eq!(err.supplier_code(), "supplier1");

        let err = SyncError::SupplierNotFound("abc".into());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let db_err = DatabaseError::NotFound {
            entity: "supplier".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = db_err.into();
        assert!(matches!(core_err, CoreError::Database(_)));

        let sync_err: SyncError = ReconcileError::SupplierNotFound("x".into()).into();
        assert!(matches!(sync_err, SyncError::Reconcile(_)));
    }
}
