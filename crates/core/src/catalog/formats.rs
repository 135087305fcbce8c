//! Supplier-specific catalog response formats.
//!
//! Each format knows where a supplier keeps its item array and how its item
//! fields map onto [`CanonicalProduct`]. A malformed top-level body fails the
//! whole fetch; a defect in a single item's optional field does not.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::FetchCause;
use crate::models::CanonicalProduct;

/// Name given to items that arrive without one.
pub const UNKNOWN_PRODUCT_NAME: &str = "Unknown Product";

/// Normalizes one supplier's response body.
pub trait CatalogFormat: Send + Sync {
    /// Format name as written in the configuration.
    fn name(&self) -> &'static str;

    /// Keys tried, in order, for the item array.
    fn list_keys(&self) -> &'static [&'static str];

    /// Map one item object. `None` means the item has no usable id.
    fn normalize_item(&self, item: &Map<String, Value>) -> Option<CanonicalProduct>;

    /// Map a whole response body.
    ///
    /// A body without the item array is malformed, not an empty catalog, so
    /// it can never deactivate a supplier's products.
    fn normalize(&self, body: &Value) -> Result<Vec<CanonicalProduct>, FetchCause> {
        let obj = body.as_object().ok_or_else(|| {
            FetchCause::MalformedPayload(format!("expected a JSON object, got {}", kind(body)))
        })?;

        let keys = self.list_keys();
        let items = match keys.iter().find_map(|k| obj.get(*k).map(|v| (*k, v))) {
            Some((_, Value::Array(items))) => items,
            Some((key, other)) => {
                return Err(FetchCause::MalformedPayload(format!(
                    "'{}' must be an array, got {}",
                    key,
                    kind(other)
                )))
            }
            None => {
                return Err(FetchCause::MalformedPayload(format!(
                    "missing item array (expected one of: {})",
                    keys.join(", ")
                )))
            }
        };

        let mut products = Vec::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            let Some(fields) = item.as_object() else {
                warn!(format = self.name(), pos, "skipping non-object catalog item");
                continue;
            };
            match self.normalize_item(fields) {
                Some(product) => products.push(product),
                None => warn!(format = self.name(), pos, "skipping catalog item without id"),
            }
        }
        Ok(products)
    }
}

/// Look up a format by its configured name.
pub fn format_for(name: &str) -> Option<Arc<dyn CatalogFormat>> {
    match name {
        "abc" => Some(Arc::new(AbcFormat)),
        "xyz" => Some(Arc::new(XyzFormat)),
        "generic" => Some(Arc::new(GenericFormat)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// ABC
// ---------------------------------------------------------------------------

/// `{"products": [{"id", "name", "inventory", "price", "description", ...}]}`
pub struct AbcFormat;

impl CatalogFormat for AbcFormat {
    fn name(&self) -> &'static str {
        "abc"
    }

    fn list_keys(&self) -> &'static [&'static str] {
        &["products"]
    }

    fn normalize_item(&self, item: &Map<String, Value>) -> Option<CanonicalProduct> {
        Some(CanonicalProduct {
            external_id: id_field(item, "id")?,
            name: name_field(item, "name"),
            stock: stock_field(item, &["inventory"]),
            price: price_field(item, "price"),
            description: text_field(item, "description"),
            metadata: Some(pick(item, &[
                ("category", "category"),
                ("sku", "sku"),
                ("last_updated", "updated_at"),
            ])),
        })
    }
}

// ---------------------------------------------------------------------------
// XYZ
// ---------------------------------------------------------------------------

/// `{"items": [{"product_id", "product_name", "stock_count", ...}]}`
pub struct XyzFormat;

impl CatalogFormat for XyzFormat {
    fn name(&self) -> &'static str {
        "xyz"
    }

    fn list_keys(&self) -> &'static [&'static str] {
        &["items"]
    }

    fn normalize_item(&self, item: &Map<String, Value>) -> Option<CanonicalProduct> {
        Some(CanonicalProduct {
            external_id: id_field(item, "product_id")?,
            name: name_field(item, "product_name"),
            stock: stock_field(item, &["stock_count"]),
            price: price_field(item, "wholesale_price"),
            description: text_field(item, "product_description"),
            metadata: Some(pick(item, &[
                ("category", "category"),
                ("manufacturer", "manufacturer"),
                ("updated", "last_update"),
            ])),
        })
    }
}

// ---------------------------------------------------------------------------
// Generic
// ---------------------------------------------------------------------------

/// Best-effort fallback using the most common key names.
pub struct GenericFormat;

impl CatalogFormat for GenericFormat {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn list_keys(&self) -> &'static [&'static str] {
        &["products", "items"]
    }

    fn normalize_item(&self, item: &Map<String, Value>) -> Option<CanonicalProduct> {
        Some(CanonicalProduct {
            external_id: id_field(item, "id")?,
            name: name_field(item, "name"),
            stock: stock_field(item, &["stock", "inventory"]),
            price: price_field(item, "price"),
            description: text_field(item, "description"),
            metadata: Some(Value::Object(item.clone())),
        })
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ids may be strings or numbers; numbers are stringified.
fn id_field(item: &Map<String, Value>, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn name_field(item: &Map<String, Value>, key: &str) -> String {
    text_field(item, key)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_PRODUCT_NAME.to_string())
}

fn text_field(item: &Map<String, Value>, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

/// First key holding a usable quantity; missing or unparsable is 0 and
/// negative quantities are clamped to 0.
fn stock_field(item: &Map<String, Value>, keys: &[&str]) -> i64 {
    keys.iter()
        .filter_map(|k| item.get(*k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
        .unwrap_or(0)
        .max(0)
}

fn price_field(item: &Map<String, Value>, key: &str) -> Option<f64> {
    match item.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Copy `(target, source)` fields into a metadata object; absent sources
/// become `null`.
fn pick(item: &Map<String, Value>, fields: &[(&str, &str)]) -> Value {
    let mut out = Map::new();
    for (target, source) in fields {
        out.insert(
            (*target).to_string(),
            item.get(*source).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(out)
}
