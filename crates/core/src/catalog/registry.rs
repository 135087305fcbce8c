//! Supplier code to catalog source mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{CatalogSource, SupplierApi};
use crate::config::AppConfig;
use crate::errors::ConfigError;

/// Catalog sources keyed by supplier API code.
///
/// Adding a supplier means registering another source; nothing dispatches
/// on the code itself.
#[derive(Default, Clone)]
pub struct CatalogRegistry {
    sources: BTreeMap<String, Arc<dyn CatalogSource>>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an HTTP source for every `[suppliers.<code>]` table.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for (code, supplier) in &config.suppliers {
            let api = SupplierApi::from_config(code, supplier, config.sync.fetch_timeout_secs)?;
            registry.register(Arc::new(api));
        }
        info!(sources = registry.len(), "catalog registry built");
        Ok(registry)
    }

    /// Add or replace the source for its code.
    pub fn register(&mut self, source: Arc<dyn CatalogSource>) {
        let code = source.code().to_string();
        debug!(code = %code, "registering catalog source");
        self.sources.insert(code, source);
    }

    pub fn get(&self, code: &str) -> Option<Arc<dyn CatalogSource>> {
        self.sources.get(code).cloned()
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for CatalogRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogRegistry")
            .field("codes", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}
