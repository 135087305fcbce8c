//! Supplier sync orchestrator.
//!
//! The [`SyncEngine`] runs one supplier sync as a fixed sequence:
//!
//! 1. Resolve the supplier and its catalog source. Failures here return a
//!    failed result without writing a sync log.
//! 2. Open an `in_progress` sync log.
//! 3. Fetch the catalog, bounded by the fetch timeout.
//! 4. Apply the reconciliation and complete the log as `success` in one
//!    transaction.
//! 5. Publish the "supplier data updated" event (best-effort).
//!
//! A failed fetch or commit completes the log as `failed` and records the
//! error in the supplier's sync metadata. Syncs of the same supplier are
//! serialized through step 4; the publish runs after the supplier lock is
//! released. Different suppliers run independently.
//!
//! Dropping a sync mid-fetch commits nothing and leaves its log
//! `in_progress`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::audit::{self, SyncAudit, SyncOutcome};
use crate::catalog::{CatalogRegistry, CatalogSource};
use crate::config::AppConfig;
use crate::db::{suppliers, Database};
use crate::errors::{CatalogError, DatabaseError, FetchCause, SyncError};
use crate::models::{CanonicalProduct, SyncResult, SyncResultStatus, SyncType};
use crate::notify::Notifier;
use crate::reconcile::{self, ReconcileStats};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Coordinates catalog fetch, reconciliation, audit and notification.
pub struct SyncEngine {
    db: Arc<Database>,
    registry: CatalogRegistry,
    notifier: Notifier,
    audit: SyncAudit,
    fetch_timeout: Duration,
    max_concurrent_syncs: usize,
    /// One async lock per supplier id.
    supplier_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SyncEngine {
    pub fn new(
        config: &AppConfig,
        db: Arc<Database>,
        registry: CatalogRegistry,
        notifier: Notifier,
    ) -> Self {
        info!(
            sources = registry.len(),
            events = notifier.is_enabled(),
            "initializing sync engine"
        );
        Self {
            audit: SyncAudit::new(db.clone(), config.sync.history_limit_max),
            db,
            registry,
            notifier,
            fetch_timeout: Duration::from_secs(config.sync.fetch_timeout_secs),
            max_concurrent_syncs: config.schedule.max_concurrent_syncs.max(1),
            supplier_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn audit(&self) -> &SyncAudit {
        &self.audit
    }

    pub fn registry(&self) -> &CatalogRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Single supplier
    // -----------------------------------------------------------------------

    /// Sync one supplier and return its final result.
    ///
    /// Never returns an error: every failure becomes a `failed` result whose
    /// status matches what was written to the sync log.
    pub async fn sync_supplier(
        &self,
        supplier_id: &str,
        force: bool,
        sync_type: SyncType,
    ) -> SyncResult {
        let source = match self.resolve_source(supplier_id) {
            Ok(source) => source,
            Err(e) => {
                warn!(supplier_id, error = %e, "sync not started");
                return SyncResult::failed(supplier_id, e.to_string(), None);
            }
        };

        let lock = self.supplier_lock(supplier_id);
        let guard = lock.lock().await;

        let log_id = match self.audit.begin(supplier_id, sync_type) {
            Ok(id) => id,
            Err(e) => {
                error!(supplier_id, error = %e, "could not open sync log");
                return SyncResult::failed(supplier_id, e.to_string(), None);
            }
        };

        let catalog = match self.fetch(source.as_ref()).await {
            Ok(catalog) => catalog,
            Err(e) => {
                let message = e.to_string();
                warn!(supplier_id, log_id = %log_id, error = %message, "catalog fetch failed");
                self.record_failure(supplier_id, &log_id, &message);
                return SyncResult::failed(supplier_id, message, Some(log_id));
            }
        };

        let committed = self.commit(supplier_id, &log_id, source.code(), force, &catalog);
        match committed {
            Ok(stats) => {
                info!(
                    supplier_id,
                    log_id = %log_id,
                    added = stats.added,
                    updated = stats.updated,
                    deactivated = stats.deactivated,
                    "supplier sync succeeded"
                );
                drop(guard);
                self.notifier.supplier_updated(supplier_id).await;
                success_result(supplier_id, &stats, log_id)
            }
            Err(e) => {
                let message = e.to_string();
                error!(supplier_id, log_id = %log_id, error = %message, "reconciliation failed");
                self.record_failure(supplier_id, &log_id, &message);
                SyncResult::failed(supplier_id, message, Some(log_id))
            }
        }
    }

    fn resolve_source(&self, supplier_id: &str) -> Result<Arc<dyn CatalogSource>, SyncError> {
        let supplier = self
            .db
            .get_supplier(supplier_id)?
            .ok_or_else(|| SyncError::SupplierNotFound(supplier_id.to_string()))?;

        supplier
            .api_code
            .as_deref()
            .filter(|code| !code.is_empty())
            .and_then(|code| self.registry.get(code))
            .ok_or_else(|| SyncError::NoAdapter {
                supplier_id: supplier_id.to_string(),
            })
    }

    fn supplier_lock(&self, supplier_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.supplier_locks.lock().unwrap_or_else(|poisoned| {
            warn!("supplier lock table was poisoned, recovering");
            poisoned.into_inner()
        });
        locks
            .entry(supplier_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn fetch(
        &self,
        source: &dyn CatalogSource,
    ) -> Result<Vec<CanonicalProduct>, CatalogError> {
        debug!(supplier_code = %source.code(), "fetching catalog");
        match tokio::time::timeout(self.fetch_timeout, source.fetch_catalog()).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::fetch_failed(
                source.code(),
                FetchCause::Timeout(self.fetch_timeout.as_secs()),
            )),
        }
    }

    /// Apply the diff and complete the log as `success` atomically.
    fn commit(
        &self,
        supplier_id: &str,
        log_id: &str,
        supplier_code: &str,
        force: bool,
        catalog: &[CanonicalProduct],
    ) -> Result<ReconcileStats, SyncError> {
        self.db.transaction(|conn| {
            let stats = reconcile::apply_reconciliation(conn, supplier_id, catalog)?;
            let outcome = SyncOutcome::Success {
                stats,
                metadata: json!({
                    "supplier_code": supplier_code,
                    "catalog_size": catalog.len(),
                    "force": force,
                    "changed": stats.changed,
                    "reactivated": stats.reactivated,
                }),
            };
            audit::complete_on(conn, log_id, &outcome)?;
            Ok(stats)
        })
    }

    /// Complete the log as `failed` and note the error on the supplier.
    ///
    /// Runs in its own transaction so a rolled-back reconciliation cannot
    /// take the failure record down with it.
    fn record_failure(&self, supplier_id: &str, log_id: &str, message: &str) {
        let outcome = SyncOutcome::Failed {
            error: message.to_string(),
        };
        let result: Result<(), DatabaseError> = self.db.transaction(|conn| {
            audit::complete_on(conn, log_id, &outcome)?;
            suppliers::set_sync_metadata(
                conn,
                supplier_id,
                &json!({"last_sync_status": "failed", "last_error": message}),
            )?;
            Ok(())
        });
        if let Err(e) = result {
            error!(supplier_id, log_id, error = %e, "could not record sync failure");
        }
    }

    // -----------------------------------------------------------------------
    // All suppliers
    // -----------------------------------------------------------------------

    /// Sync every supplier with bounded parallelism.
    ///
    /// Results come back in supplier listing order, one per supplier. One
    /// supplier failing never affects the others.
    pub async fn sync_all(
        self: &Arc<Self>,
        force: bool,
        sync_type: SyncType,
    ) -> Result<Vec<SyncResult>, SyncError> {
        let ids: Vec<String> = self
            .db
            .list_suppliers()?
            .into_iter()
            .map(|s| s.id)
            .collect();
        info!(
            suppliers = ids.len(),
            max_concurrent = self.max_concurrent_syncs,
            %sync_type,
            "syncing all suppliers"
        );

        let permits = Arc::new(Semaphore::new(self.max_concurrent_syncs));
        let mut tasks = JoinSet::new();
        for (idx, id) in ids.iter().cloned().enumerate() {
            let engine = Arc::clone(self);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, engine.sync_supplier(&id, force, sync_type).await)
            });
        }

        let mut results: Vec<Option<SyncResult>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => error!(error = %e, "supplier sync task failed"),
            }
        }

        let results: Vec<SyncResult> = results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|| SyncResult::failed(id, "sync task aborted", None))
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            total = results.len(),
            succeeded,
            failed = results.len() - succeeded,
            "sync of all suppliers finished"
        );
        Ok(results)
    }
}

fn success_result(supplier_id: &str, stats: &ReconcileStats, log_id: String) -> SyncResult {
    SyncResult {
        supplier_id: supplier_id.to_string(),
        status: SyncResultStatus::Success,
        products_added: stats.added,
        products_updated: stats.updated,
        products_deactivated: stats.deactivated,
        error_message: None,
        sync_log_id: Some(log_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::NotificationError;
    use crate::models::{NewSupplier, SupplierEvent, SyncLogStatus};
    use crate::notify::EventPublisher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Catalog source with a scripted response.
    struct ScriptedSource {
        code: &'static str,
        catalog: Mutex<Result<Vec<CanonicalProduct>, u16>>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(code: &'static str, catalog: Vec<CanonicalProduct>) -> Self {
            Self {
                code,
                catalog: Mutex::new(Ok(catalog)),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing(code: &'static str, status: u16) -> Self {
            let source = Self::new(code, Vec::new());
            *source.catalog.lock().unwrap() = Err(status);
            source
        }

        fn set_catalog(&self, catalog: Vec<CanonicalProduct>) {
            *self.catalog.lock().unwrap() = Ok(catalog);
        }
    }

    #[async_trait]
    impl CatalogSource for ScriptedSource {
        fn code(&self) -> &str {
            self.code
        }

        async fn fetch_catalog(&self) -> Result<Vec<CanonicalProduct>, CatalogError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match &*self.catalog.lock().unwrap() {
                Ok(catalog) => Ok(catalog.clone()),
                Err(status) => Err(CatalogError::fetch_failed(
                    self.code,
                    FetchCause::HttpStatus {
                        status: *status,
                        body: "unavailable".into(),
                    },
                )),
            }
        }
    }

    #[derive(Default)]
    struct CountingPublisher {
        published: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl EventPublisher for CountingPublisher {
        async fn publish(&self, _event: &SupplierEvent) -> Result<(), NotificationError> {
            self.published.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(NotificationError::Rejected {
                    status: 503,
                    body: "broker down".into(),
                });
            }
            Ok(())
        }
    }

    struct Harness {
        engine: Arc<SyncEngine>,
        publisher: Arc<CountingPublisher>,
    }

    fn harness(sources: Vec<Arc<ScriptedSource>>, publisher: CountingPublisher) -> Harness {
        harness_with_timeout(sources, publisher, Duration::from_secs(5))
    }

    fn harness_with_timeout(
        sources: Vec<Arc<ScriptedSource>>,
        publisher: CountingPublisher,
        publish_timeout: Duration,
    ) -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let mut registry = CatalogRegistry::new();
        for source in sources {
            registry.register(source);
        }
        let publisher = Arc::new(publisher);
        let notifier =
            Notifier::with_publisher(publisher.clone()).with_publish_timeout(publish_timeout);
        let engine = SyncEngine::new(&AppConfig::default(), db, registry, notifier);
        Harness {
            engine: Arc::new(engine),
            publisher,
        }
    }

    fn add_supplier(engine: &SyncEngine, name: &str, api_code: Option<&str>) -> String {
        engine
            .db()
            .insert_supplier(&NewSupplier {
                name: name.into(),
                contact_email: format!("{}@example.com", name),
                external_id: None,
                api_code: api_code.map(str::to_string),
            })
            .unwrap()
    }

    fn catalog(ids: &[&str]) -> Vec<CanonicalProduct> {
        ids.iter()
            .map(|id| CanonicalProduct::new(*id, format!("Product {}", id), 5))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_sync() {
        let h = harness(
            vec![Arc::new(ScriptedSource::new("abc", catalog(&["A", "B"])))],
            CountingPublisher::default(),
        );
        let sid = add_supplier(&h.engine, "acme", Some("abc"));

        let result = h.engine.sync_supplier(&sid, true, SyncType::Manual).await;
        assert_eq!(result.status, SyncResultStatus::Success);
        assert_eq!(result.products_added, 2);
        assert_eq!(h.publisher.published.load(Ordering::SeqCst), 1);

        let logs = h.engine.audit().history(&sid, 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(Some(&logs[0].id), result.sync_log_id.as_ref());
        assert_eq!(logs[0].status, SyncLogStatus::Success);
        assert_eq!(logs[0].products_added, 2);
        let meta = logs[0].metadata.as_ref().unwrap();
        assert_eq!(meta["force"], true);
        assert_eq!(meta["supplier_code"], "abc");
        assert_eq!(meta["catalog_size"], 2);
    }

    #[tokio::test]
    async fn test_unknown_supplier_creates_no_log() {
        let h = harness(Vec::new(), CountingPublisher::default());
        let result = h.engine.sync_supplier("ghost", false, SyncType::Manual).await;
        assert_eq!(result.status, SyncResultStatus::Failed);
        assert!(result.error_message.unwrap().contains("not found"));
        assert!(result.sync_log_id.is_none());

        let count: i64 = h
            .engine
            .db()
            .conn()
            .query_row("SELECT COUNT(*) FROM supplier_sync_logs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_missing_adapter_creates_no_log() {
        let h = harness(Vec::new(), CountingPublisher::default());
        let no_code = add_supplier(&h.engine, "nocode", None);
        let unknown = add_supplier(&h.engine, "unknown", Some("missing"));

        for sid in [&no_code, &unknown] {
            let result = h.engine.sync_supplier(sid, false, SyncType::Manual).await;
            assert_eq!(
                result.error_message.as_deref(),
                Some("Supplier has no valid API code configured")
            );
            assert!(h.engine.audit().history(sid, 10).unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_fetch_failure_logs_failed_and_keeps_products() {
        let source = Arc::new(ScriptedSource::new("abc", catalog(&["A", "B"])));
        let h = harness(vec![source.clone()], CountingPublisher::default());
        let sid = add_supplier(&h.engine, "acme", Some("abc"));
        h.engine.sync_supplier(&sid, false, SyncType::Manual).await;
        let before = h.engine.db().list_products(&sid).unwrap();
        let synced_at = h.engine.db().get_supplier(&sid).unwrap().unwrap().last_sync_at;

        *source.catalog.lock().unwrap() = Err(502);
        let result = h.engine.sync_supplier(&sid, false, SyncType::Scheduled).await;
        assert_eq!(result.status, SyncResultStatus::Failed);
        assert!(result.sync_log_id.is_some());

        assert_eq!(h.engine.db().list_products(&sid).unwrap(), before);
        let logs = h.engine.audit().history(&sid, 1).unwrap();
        assert_eq!(logs[0].status, SyncLogStatus::Failed);
        assert_eq!(logs[0].error_message, result.error_message);
        assert!(!logs[0].error_message.as_ref().unwrap().is_empty());

        let supplier = h.engine.db().get_supplier(&sid).unwrap().unwrap();
        assert_eq!(supplier.last_sync_at, synced_at);
        let meta = supplier.sync_metadata.unwrap();
        assert_eq!(meta["last_sync_status"], "failed");
        assert!(meta["last_error"].as_str().unwrap().contains("502"));
        assert_eq!(h.publisher.published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_still_succeeds() {
        let h = harness(
            vec![Arc::new(ScriptedSource::new("abc", catalog(&["A"])))],
            CountingPublisher {
                fail: true,
                ..Default::default()
            },
        );
        let sid = add_supplier(&h.engine, "acme", Some("abc"));

        let result = h.engine.sync_supplier(&sid, false, SyncType::Manual).await;
        assert!(result.is_success());
        assert_eq!(result.products_added, 1);
        assert_eq!(h.publisher.published.load(Ordering::SeqCst), 1);
        assert_eq!(
            h.engine.audit().history(&sid, 1).unwrap()[0].status,
            SyncLogStatus::Success
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_a_failure() {
        let mut source = ScriptedSource::new("slow", catalog(&["A"]));
        source.delay = Duration::from_secs(3600);
        let h = harness(vec![Arc::new(source)], CountingPublisher::default());
        let sid = add_supplier(&h.engine, "slowpoke", Some("slow"));

        let result = h.engine.sync_supplier(&sid, false, SyncType::Manual).await;
        assert_eq!(result.status, SyncResultStatus::Failed);
        assert!(result.error_message.unwrap().contains("timed out"));
        assert!(h.engine.db().list_products(&sid).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_supplier_syncs_are_serialized() {
        let mut source = ScriptedSource::new("abc", catalog(&["A"]));
        source.delay = Duration::from_millis(50);
        let source = Arc::new(source);
        let h = harness(vec![source.clone()], CountingPublisher::default());
        let sid = add_supplier(&h.engine, "acme", Some("abc"));

        let (first, second) = tokio::join!(
            h.engine.sync_supplier(&sid, false, SyncType::Manual),
            h.engine.sync_supplier(&sid, true, SyncType::Manual),
        );
        assert!(first.is_success() && second.is_success());
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(first.products_added + second.products_added, 1);
        assert_eq!(first.products_updated + second.products_updated, 1);
    }

    #[tokio::test]
    async fn test_sync_all_keeps_going_after_failures() {
        let good = Arc::new(ScriptedSource::new("good", catalog(&["A", "B", "C"])));
        let bad = Arc::new(ScriptedSource::failing("bad", 500));
        let h = harness(vec![good.clone(), bad], CountingPublisher::default());
        let s1 = add_supplier(&h.engine, "a-good", Some("good"));
        let s2 = add_supplier(&h.engine, "b-bad", Some("bad"));
        let s3 = add_supplier(&h.engine, "c-nocode", None);

        let results = h.engine.sync_all(false, SyncType::Scheduled).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.supplier_id.as_str()).collect();
        assert_eq!(ids, vec![s1.as_str(), s2.as_str(), s3.as_str()]);
        assert_eq!(results[0].status, SyncResultStatus::Success);
        assert_eq!(results[0].products_added, 3);
        assert_eq!(results[1].status, SyncResultStatus::Failed);
        assert_eq!(results[2].status, SyncResultStatus::Failed);

        let logs = h.engine.audit().history(&s1, 1).unwrap();
        assert_eq!(logs[0].sync_type, SyncType::Scheduled);

        good.set_catalog(catalog(&["A"]));
        let results = h.engine.sync_all(false, SyncType::Scheduled).await.unwrap();
        assert_eq!(results[0].products_updated, 1);
        assert_eq!(results[0].products_deactivated, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_publish_does_not_hold_the_supplier() {
        let h = harness_with_timeout(
            vec![Arc::new(ScriptedSource::new("abc", catalog(&["A"])))],
            CountingPublisher {
                delay: Duration::from_secs(3600),
                ..Default::default()
            },
            Duration::from_secs(1),
        );
        let sid = add_supplier(&h.engine, "acme", Some("abc"));

        let started = tokio::time::Instant::now();
        let (first, second) = tokio::join!(
            h.engine.sync_supplier(&sid, false, SyncType::Manual),
            h.engine.sync_supplier(&sid, false, SyncType::Manual),
        );
        assert!(first.is_success() && second.is_success());
        assert_eq!(h.publisher.published.load(Ordering::SeqCst), 2);
        // Both publishes time out together; neither sync waits on the other's.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_sync_leaves_log_in_progress() {
        let mut source = ScriptedSource::new("slow", catalog(&["A", "B"]));
        source.delay = Duration::from_secs(3600);
        let source = Arc::new(source);
        let h = harness(vec![source.clone()], CountingPublisher::default());
        let sid = add_supplier(&h.engine, "slowpoke", Some("slow"));

        let engine = Arc::clone(&h.engine);
        let task_sid = sid.clone();
        let task = tokio::spawn(async move {
            engine
                .sync_supplier(&task_sid, false, SyncType::Manual)
                .await
        });
        while source.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        let logs = h.engine.audit().history(&sid, 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, SyncLogStatus::InProgress);
        assert!(logs[0].completed_at.is_none());
        assert!(h.engine.db().list_products(&sid).unwrap().is_empty());
        assert_eq!(h.publisher.published.load(Ordering::SeqCst), 0);
    }
}
