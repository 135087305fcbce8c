//! Queries for the `products` table.

use rusqlite::{params, Connection, Row};
use tracing::debug;
use uuid::Uuid;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::Product;

const PRODUCT_COLUMNS: &str = "id, name, stock, supplier_id, external_id, is_active";

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        stock: row.get(2)?,
        supplier_id: row.get(3)?,
        external_id: row.get(4)?,
        is_active: row.get(5)?,
    })
}

/// Products of a supplier that carry a non-empty external id.
///
/// Manually created products (no external id) are never returned, so the
/// reconciler can neither read nor modify them.
pub fn list_syncable(conn: &Connection, supplier_id: &str) -> Result<Vec<Product>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products
         WHERE supplier_id = ?1 AND external_id IS NOT NULL AND external_id != ''
         ORDER BY external_id",
        PRODUCT_COLUMNS
    ))?;
    let products = stmt
        .query_map(params![supplier_id], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(products)
}

/// Every product of a supplier, including manually created ones.
pub fn list_for_supplier(
    conn: &Connection,
    supplier_id: &str,
) -> Result<Vec<Product>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products WHERE supplier_id = ?1 ORDER BY name, id",
        PRODUCT_COLUMNS
    ))?;
    let products = stmt
        .query_map(params![supplier_id], product_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(products)
}

/// Insert an active product bound to a supplier and return its id.
pub fn insert_synced(
    conn: &Connection,
    supplier_id: &str,
    external_id: &str,
    name: &str,
    stock: i64,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO products (id, name, stock, supplier_id, external_id, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, 1)",
        params![id, name, stock, supplier_id, external_id],
    )?;
    debug!(id = %id, supplier_id, external_id, "inserted product");
    Ok(id)
}

/// Overwrite name and stock of a product and mark it active.
pub fn update_synced(
    conn: &Connection,
    id: &str,
    name: &str,
    stock: i64,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE products SET name = ?1, stock = ?2, is_active = 1 WHERE id = ?3",
        params![name, stock, id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "product".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Mark a product inactive. Products are never hard-deleted by sync.
pub fn deactivate(conn: &Connection, id: &str) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE products SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "product".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Insert a product that is not managed by sync (no external id).
pub fn insert_manual(
    conn: &Connection,
    supplier_id: Option<&str>,
    name: &str,
    stock: i64,
) -> Result<String, DatabaseError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO products (id, name, stock, supplier_id, external_id, is_active)
         VALUES (?1, ?2, ?3, ?4, NULL, 1)",
        params![id, name, stock, supplier_id],
    )?;
    Ok(id)
}

impl Database {
    /// All products of a supplier, synced or not.
    pub fn list_products(&self, supplier_id: &str) -> Result<Vec<Product>, DatabaseError> {
        list_for_supplier(&self.conn(), supplier_id)
    }

    /// Count active products of a supplier.
    pub fn count_active_products(&self, supplier_id: &str) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM products WHERE supplier_id = ?1 AND is_active = 1",
            params![supplier_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::suppliers;
    use crate::models::NewSupplier;

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

    #[test]
    fn test_list_syncable_skips_manual_products() {
        let (db, sid) = setup();
        {
            let conn = db.conn();
            insert_synced(&conn, &sid, "E1", "Widget", 5).unwrap();
            insert_manual(&conn, Some(&sid), "Hand made", 1).unwrap();
            conn.execute(
                "INSERT INTO products (id, name, supplier_id, external_id) VALUES ('blank', 'b', ?1, '')",
                params![sid],
            )
            .unwrap();
        }

        let syncable = list_syncable(&db.conn(), &sid).unwrap();
        assert_eq!(syncable.len(), 1);
        assert_eq!(syncable[0].external_id.as_deref(), Some("E1"));
        assert_eq!(db.list_products(&sid).unwrap().len(), 3);
    }

    #[test]
    fn test_update_and_deactivate() {
        let (db, sid) = setup();
        let conn = db.conn();
        let id = insert_synced(&conn, &sid, "E1", "Widget", 5).unwrap();

        deactivate(&conn, &id).unwrap();
        let products = list_syncable(&conn, &sid).unwrap();
        assert!(!products[0].is_active);

        update_synced(&conn, &id, "Widget v2", 9).unwrap();
        let products = list_syncable(&conn, &sid).unwrap();
        assert!(products[0].is_active);
        assert_eq!(products[0].name, "Widget v2");
        assert_eq!(products[0].stock, 9);

        assert!(matches!(
            deactivate(&conn, "missing"),
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(suppliers::exists(&conn, &sid).unwrap());
    }
}
