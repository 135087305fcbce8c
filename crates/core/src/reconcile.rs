//! Catalog reconciliation engine.
//!
//! Reconciliation runs in two steps: [`plan_reconciliation`] computes the
//! add/update/deactivate diff between the stored products of a supplier and
//! a freshly fetched catalog without touching the database, and
//! [`apply_reconciliation`] writes that diff on a connection that the caller
//! has placed inside a transaction.
//!
//! Only products with a non-empty `external_id` take part. Manually created
//! products are never read or written here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::db::{products, suppliers, Database};
use crate::errors::ReconcileError;
use crate::models::{CanonicalProduct, Product};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counts produced by one reconciliation.
///
/// `added`, `updated` and `deactivated` are authoritative. `updated` counts
/// every stored product matched by external id, whether or not a field
/// changed. `changed` and `reactivated` are subsets of `updated` kept for
/// monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub added: u64,
    pub updated: u64,
    pub deactivated: u64,
    pub changed: u64,
    pub reactivated: u64,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A product to create for the supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInsert {
    pub external_id: String,
    pub name: String,
    pub stock: i64,
}

/// A stored product to overwrite and mark active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpdate {
    pub product_id: String,
    pub external_id: String,
    pub name: String,
    pub stock: i64,
    /// Name, stock or active flag differ from the stored row.
    pub changed: bool,
    /// The stored row was inactive.
    pub reactivated: bool,
}

/// The full diff for one supplier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub inserts: Vec<PlannedInsert>,
    pub updates: Vec<PlannedUpdate>,
    /// Ids of active products missing from the catalog.
    pub deactivations: Vec<String>,
    /// Number of distinct external ids in the catalog.
    pub catalog_size: usize,
}

impl ReconcilePlan {
    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            added: self.inserts.len() as u64,
            updated: self.updates.len() as u64,
            deactivated: self.deactivations.len() as u64,
            changed: self.updates.iter().filter(|u| u.changed).count() as u64,
            reactivated: self.updates.iter().filter(|u| u.reactivated).count() as u64,
        }
    }
}

/// Compute the diff between `existing` products and an incoming catalog.
///
/// Products in `existing` without an external id are ignored. When the
/// catalog repeats an external id the last occurrence wins and the id is
/// counted once. Catalog items with an empty external id are skipped.
pub fn plan_reconciliation(existing: &[Product], catalog: &[CanonicalProduct]) -> ReconcilePlan {
    let index: HashMap<&str, &Product> = existing
        .iter()
        .filter_map(|p| match p.external_id.as_deref() {
            Some(ext) if !ext.is_empty() => Some((ext, p)),
            _ => None,
        })
        .collect();

    // Distinct items in first-seen order, values from the last occurrence.
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &CanonicalProduct> = HashMap::new();
    for item in catalog {
        let ext = item.external_id.as_str();
        if ext.is_empty() {
            warn!(name = %item.name, "skipping catalog item without external id");
            continue;
        }
        if latest.insert(ext, item).is_none() {
            order.push(ext);
        } else {
            debug!(external_id = ext, "duplicate external id in catalog, last one wins");
        }
    }

    let mut plan = ReconcilePlan {
        catalog_size: order.len(),
        ..Default::default()
    };
    let mut seen: HashSet<&str> = HashSet::with_capacity(order.len());

    for ext in order {
        let item = latest[ext];
        let stock = item.stock.max(0);
        seen.insert(ext);

        match index.get(ext) {
            Some(stored) => plan.updates.push(PlannedUpdate {
                product_id: stored.id.clone(),
                external_id: ext.to_string(),
                name: item.name.clone(),
                stock,
                changed: stored.name != item.name || stored.stock != stock || !stored.is_active,
                reactivated: !stored.is_active,
            }),
            None => plan.inserts.push(PlannedInsert {
                external_id: ext.to_string(),
                name: item.name.clone(),
                stock,
            }),
        }
    }

    let mut missing: Vec<&Product> = index
        .iter()
        .filter(|(ext, p)| p.is_active && !seen.contains(*ext))
        .map(|(_, p)| *p)
        .collect();
    missing.sort_by(|a, b| a.external_id.cmp(&b.external_id));
    plan.deactivations = missing.into_iter().map(|p| p.id.clone()).collect();

    plan
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Reconcile `catalog` into the supplier's products on `conn`.
///
/// The caller owns the transaction. On success the supplier's
/// `last_sync_at` and `sync_metadata` are updated through the same
/// connection, so they commit or roll back together with the product
/// changes.
pub fn apply_reconciliation(
    conn: &Connection,
    supplier_id: &str,
    catalog: &[CanonicalProduct],
) -> Result<ReconcileStats, ReconcileError> {
    if !suppliers::exists(conn, supplier_id)? {
        return Err(ReconcileError::SupplierNotFound(supplier_id.to_string()));
    }

    let existing = products::list_syncable(conn, supplier_id)?;
    let plan = plan_reconciliation(&existing, catalog);

    for insert in &plan.inserts {
        products::insert_synced(
            conn,
            supplier_id,
            &insert.external_id,
            &insert.name,
            insert.stock,
        )?;
    }
    for update in &plan.updates {
        products::update_synced(conn, &update.product_id, &update.name, update.stock)?;
    }
    for product_id in &plan.deactivations {
        products::deactivate(conn, product_id)?;
    }

    suppliers::mark_synced(
        conn,
        supplier_id,
        &Utc::now(),
        &json!({
            "products_count": plan.catalog_size,
            "last_sync_status": "success",
        }),
    )?;

    let stats = plan.stats();
    info!(
        supplier_id,
        added = stats.added,
        updated = stats.updated,
        deactivated = stats.deactivated,
        changed = stats.changed,
        reactivated = stats.reactivated,
        "reconciliation applied"
    );
    Ok(stats)
}

/// Standalone reconciler that runs each call in its own transaction.
pub struct Reconciler {
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Apply `catalog` for `supplier_id` atomically.
    pub fn reconcile(
        &self,
        supplier_id: &str,
        catalog: &[CanonicalProduct],
    ) -> Result<ReconcileStats, ReconcileError> {
        self.db
            .transaction(|conn| apply_reconciliation(conn, supplier_id, catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DatabaseError;
    use crate::models::NewSupplier;

    fn setup() -> (Arc<Database>, Reconciler, String) {
        let db = Arc::new(Database::in_memory().unwrap());
        db.initialize().unwrap();
        let sid = db
            .insert_supplier(&NewSupplier {
                name: "ABC Suppliers".into(),
                contact_email: "ops@abc.test".into(),
                api_code: Some("supplier1".into()),
                ..Default::default()
            })
            .unwrap();
        (db.clone(), Reconciler::new(db), sid)
    }

    fn item(ext: &str, name: &str, stock: i64) -> CanonicalProduct {
        CanonicalProduct::new(ext, name, stock)
    }

    fn by_external_id(db: &Database, sid: &str, ext: &str) -> Product {
        db.list_products(sid)
            .unwrap()
            .into_iter()
            .find(|p| p.external_id.as_deref() == Some(ext))
            .unwrap()
    }

    #[test]
    fn test_all_new_items_are_added() {
        let (db, reconciler, sid) = setup();
        let catalog = vec![item("A", "Alpha", 1), item("B", "Beta", 2), item("C", "Gamma", 3)];

        let stats = reconciler.reconcile(&sid, &catalog).unwrap();
        assert_eq!(stats.added, 3);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.deactivated, 0);
        assert_eq!(db.count_active_products(&sid).unwrap(), 3);

        let supplier = db.get_supplier(&sid).unwrap().unwrap();
        assert!(supplier.last_sync_at.is_some());
        let meta = supplier.sync_metadata.unwrap();
        assert_eq!(meta["products_count"], 3);
        assert_eq!(meta["last_sync_status"], "success");
    }

    #[test]
    fn test_identical_catalog_is_idempotent() {
        let (db, reconciler, sid) = setup();
        let catalog = vec![item("A", "Alpha", 1), item("B", "Beta", 2)];
        reconciler.reconcile(&sid, &catalog).unwrap();
        let before = db.list_products(&sid).unwrap();

        let stats = reconciler.reconcile(&sid, &catalog).unwrap();
        assert_eq!(stats.added, 0);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.deactivated, 0);
        assert_eq!(stats.changed, 0);
        assert_eq!(db.list_products(&sid).unwrap(), before);
    }

    #[test]
    fn test_add_update_deactivate() {
        let (db, reconciler, sid) = setup();
        reconciler
            .reconcile(&sid, &[item("A", "Alpha", 1), item("B", "Beta", 2)])
            .unwrap();

        let stats = reconciler
            .reconcile(&sid, &[item("A", "Alpha Prime", 4), item("C", "Gamma", 7)])
            .unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.deactivated, 1);
        assert_eq!(stats.changed, 1);

        let a = by_external_id(&db, &sid, "A");
        assert_eq!(a.name, "Alpha Prime");
        assert_eq!(a.stock, 4);
        assert!(a.is_active);
        assert!(!by_external_id(&db, &sid, "B").is_active);
        assert!(by_external_id(&db, &sid, "C").is_active);
    }

    #[test]
    fn test_empty_catalog_deactivates_everything() {
        let (db, reconciler, sid) = setup();
        reconciler
            .reconcile(&sid, &[item("A", "Alpha", 1), item("B", "Beta", 2)])
            .unwrap();

        let stats = reconciler.reconcile(&sid, &[]).unwrap();
        assert_eq!(stats, ReconcileStats { deactivated: 2, ..Default::default() });
        assert_eq!(db.count_active_products(&sid).unwrap(), 0);
        assert_eq!(db.list_products(&sid).unwrap().len(), 2);
    }

    #[test]
    fn test_inactive_products_not_counted_twice() {
        let (_, reconciler, sid) = setup();
        reconciler.reconcile(&sid, &[item("A", "Alpha", 1)]).unwrap();
        assert_eq!(reconciler.reconcile(&sid, &[]).unwrap().deactivated, 1);
        assert_eq!(reconciler.reconcile(&sid, &[]).unwrap().deactivated, 0);
    }

    #[test]
    fn test_reappearing_product_is_reactivated() {
        let (db, reconciler, sid) = setup();
        reconciler.reconcile(&sid, &[item("A", "Alpha", 1)]).unwrap();
        reconciler.reconcile(&sid, &[]).unwrap();

        let stats = reconciler.reconcile(&sid, &[item("A", "Alpha", 1)]).unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.reactivated, 1);
        assert_eq!(stats.changed, 1);
        assert!(by_external_id(&db, &sid, "A").is_active);
    }

    #[test]
    fn test_duplicate_external_id_last_wins() {
        let (db, reconciler, sid) = setup();
        let stats = reconciler
            .reconcile(&sid, &[item("A", "First", 1), item("A", "Second", 9)])
            .unwrap();
        assert_eq!(stats.added, 1);
        let a = by_external_id(&db, &sid, "A");
        assert_eq!(a.name, "Second");
        assert_eq!(a.stock, 9);
        let meta = db.get_supplier(&sid).unwrap().unwrap().sync_metadata.unwrap();
        assert_eq!(meta["products_count"], 1);
    }

    #[test]
    fn test_manual_products_untouched() {
        let (db, reconciler, sid) = setup();
        let manual_id = products::insert_manual(&db.conn(), Some(&sid), "Custom", 3).unwrap();

        reconciler.reconcile(&sid, &[item("A", "Alpha", 1)]).unwrap();
        reconciler.reconcile(&sid, &[]).unwrap();

        let manual = db
            .list_products(&sid)
            .unwrap()
            .into_iter()
            .find(|p| p.id == manual_id)
            .unwrap();
        assert!(manual.is_active);
        assert_eq!(manual.stock, 3);
    }

    #[test]
    fn test_other_supplier_products_untouched() {
        let (db, reconciler, sid) = setup();
        let other = db
            .insert_supplier(&NewSupplier {
                name: "XYZ".into(),
                contact_email: "x@y.test".into(),
                ..Default::default()
            })
            .unwrap();
        reconciler.reconcile(&other, &[item("A", "Other A", 5)]).unwrap();

        let stats = reconciler.reconcile(&sid, &[item("A", "Mine", 1)]).unwrap();
        assert_eq!(stats.added, 1);
        assert_eq!(by_external_id(&db, &other, "A").name, "Other A");
    }

    #[test]
    fn test_negative_stock_clamped() {
        let (db, reconciler, sid) = setup();
        reconciler.reconcile(&sid, &[item("A", "Alpha", -5)]).unwrap();
        assert_eq!(by_external_id(&db, &sid, "A").stock, 0);
    }

    #[test]
    fn test_unknown_supplier() {
        let (_, reconciler, _) = setup();
        let err = reconciler.reconcile("ghost", &[item("A", "a", 1)]).unwrap_err();
        assert!(matches!(err, ReconcileError::SupplierNotFound(_)));
    }

    #[test]
    fn test_failed_apply_rolls_back() {
        let (db, _, sid) = setup();
        let catalog = vec![item("A", "Alpha", 1)];

        let result: Result<ReconcileStats, ReconcileError> = db.transaction(|conn| {
            apply_reconciliation(conn, &sid, &catalog)?;
            Err(DatabaseError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            }
            .into())
        });
        assert!(result.is_err());
        assert!(db.list_products(&sid).unwrap().is_empty());
        assert!(db.get_supplier(&sid).unwrap().unwrap().last_sync_at.is_none());
    }

    #[test]
    fn test_plan_ignores_products_without_external_id() {
        let existing = vec![
            Product {
                id: "p1".into(),
                name: "Manual".into(),
                stock: 1,
                supplier_id: Some("s".into()),
                external_id: None,
                is_active: true,
            },
            Product {
                id: "p2".into(),
                name: "Blank".into(),
                stock: 1,
                supplier_id: Some("s".into()),
                external_id: Some(String::new()),
                is_active: true,
            },
        ];
        let plan = plan_reconciliation(&existing, &[item("", "nameless", 1)]);
        assert_eq!(plan, ReconcilePlan::default());
    }
}
