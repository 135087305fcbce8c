//! Domain model types used throughout stocksync.
//!
//! These types bridge the sync engine, the database layer and the binaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Supplier
// ---------------------------------------------------------------------------

/// A supplier whose catalog is reconciled into the product table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub contact_email: String,
    pub external_id: Option<String>,
    /// Selects the catalog adapter; `None` means the supplier cannot sync.
    pub api_code: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_metadata: Option<serde_json::Value>,
}

/// Fields needed to register a new supplier.
#[derive(Debug, Clone, Default)]
pub struct NewSupplier {
    pub name: String,
    pub contact_email: String,
    pub external_id: Option<String>,
    pub api_code: Option<String>,
}

// ---------------------------------------------------------------------------
// Product
// ---------------------------------------------------------------------------

/// A locally stored product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub stock: i64,
    pub supplier_id: Option<String>,
    /// The supplier's identifier; products without one are never synced.
    pub external_id: Option<String>,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// Canonical catalog item
// ---------------------------------------------------------------------------

/// One catalog item after supplier-specific normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalProduct {
    pub external_id: String,
    pub name: String,
    pub stock: i64,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CanonicalProduct {
    /// Minimal item with just the fields reconciliation writes.
    pub fn new(external_id: impl Into<String>, name: impl Into<String>, stock: i64) -> Self {
        Self {
            external_id: external_id.into(),
            name: name.into(),
            stock,
            price: None,
            description: None,
            metadata: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync log
// ---------------------------------------------------------------------------

/// What started a sync attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Scheduled,
    Manual,
}

impl std::fmt::Display for SyncType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl SyncType {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "scheduled" => Self::Scheduled,
            _ => Self::Manual,
        }
    }
}

/// Lifecycle state of a sync log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogStatus {
    InProgress,
    Success,
    Failed,
}

impl std::fmt::Display for SyncLogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl SyncLogStatus {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failed" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

/// A row from the `supplier_sync_logs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: String,
    pub supplier_id: String,
    pub sync_type: SyncType,
    pub status: SyncLogStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub products_added: u64,
    pub products_updated: u64,
    pub products_deactivated: u64,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Sync result
// ---------------------------------------------------------------------------

/// Status reported to whoever triggered a sync.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncResultStatus {
    Queued,
    Success,
    Failed,
}

impl std::fmt::Display for SyncResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one supplier sync as seen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub supplier_id: String,
    pub status: SyncResultStatus,
    pub products_added: u64,
    pub products_updated: u64,
    pub products_deactivated: u64,
    pub error_message: Option<String>,
    pub sync_log_id: Option<String>,
}

impl SyncResult {
    pub fn queued(supplier_id: impl Into<String>) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            status: SyncResultStatus::Queued,
            products_added: 0,
            products_updated: 0,
            products_deactivated: 0,
            error_message: None,
            sync_log_id: None,
        }
    }

    pub fn failed(
        supplier_id: impl Into<String>,
        error_message: impl Into<String>,
        sync_log_id: Option<String>,
    ) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            status: SyncResultStatus::Failed,
            products_added: 0,
            products_updated: 0,
            products_deactivated: 0,
            error_message: Some(error_message.into()),
            sync_log_id,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncResultStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Downstream event
// ---------------------------------------------------------------------------

/// Event type string published after a successful sync.
pub const SUPPLIER_DATA_UPDATED: &str = "supplier_data_updated";

/// Event emitted after a supplier's products were reconciled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplierEvent {
    pub supplier_id: String,
    pub event_type: String,
    pub timestamp: String,
}

impl SupplierEvent {
    pub fn data_updated(supplier_id: impl Into<String>) -> Self {
        Self {
            supplier_id: supplier_id.into(),
            event_type: SUPPLIER_DATA_UPDATED.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            SyncLogStatus::InProgress,
            SyncLogStatus::Success,
            SyncLogStatus::Failed,
        ] {
            assert_eq!(SyncLogStatus::from_str_val(&status.to_string()), status);
        }
        assert_eq!(SyncType::from_str_val("scheduled"), SyncType::Scheduled);
        assert_eq!(SyncType::Manual.to_string(), "manual");
    }

    #[test]
    fn test_sync_result_serializes_snake_case() {
        let result = SyncResult::queued("s-1");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["supplier_id"], "s-1");
    }

    #[test]
    fn test_supplier_event_shape() {
        let event = SupplierEvent::data_updated("s-1");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "supplier_data_updated");
        assert_eq!(json["supplier_id"], "s-1");
        assert!(DateTime::parse_from_rfc3339(json["timestamp"].as_str().unwrap()).is_ok());
    }
}
