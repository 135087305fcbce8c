//! stocksync core library.
//!
//! This crate reconciles supplier catalogs into a local product store:
//! configuration, SQLite persistence, catalog adapters, the reconciliation
//! engine, the sync audit log, downstream event publishing, the sync
//! orchestrator and its background job queue.

pub mod audit;
pub mod catalog;
pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod notify;
pub mod reconcile;
pub mod sync_engine;

// Re-exports for convenience.
pub use audit::SyncAudit;
pub use catalog::{CatalogRegistry, CatalogSource};
pub use config::AppConfig;
pub use db::Database;
pub use jobs::{sync_channel, JobHandle, SyncQueue, SyncTarget, SyncWorker};
pub use notify::Notifier;
pub use reconcile::{ReconcileStats, Reconciler};
pub use sync_engine::SyncEngine;
