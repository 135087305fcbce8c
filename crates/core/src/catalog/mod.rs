//! Supplier catalog sources.
//!
//! A [`CatalogSource`] returns a supplier's complete current catalog in
//! canonical form, or fails as a whole. The HTTP implementation,
//! [`SupplierApi`], pairs a [`CatalogClient`] with the supplier's
//! [`CatalogFormat`]. Sources are looked up by supplier API code through the
//! [`CatalogRegistry`].

pub mod client;
pub mod formats;
pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SupplierApiConfig;
use crate::errors::{CatalogError, ConfigError};
use crate::models::CanonicalProduct;

pub use client::CatalogClient;
pub use formats::{format_for, AbcFormat, CatalogFormat, GenericFormat, XyzFormat};
pub use registry::CatalogRegistry;

/// Anything that can produce a supplier's full catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Supplier API code this source serves.
    fn code(&self) -> &str;

    /// Fetch and normalize the whole catalog. No partial results.
    async fn fetch_catalog(&self) -> Result<Vec<CanonicalProduct>, CatalogError>;
}

/// Catalog source backed by a supplier's HTTP API.
pub struct SupplierApi {
    client: CatalogClient,
    format: Arc<dyn CatalogFormat>,
}

impl SupplierApi {
    pub fn new(client: CatalogClient, format: Arc<dyn CatalogFormat>) -> Self {
        Self { client, format }
    }

    /// Build from the `[suppliers.<code>]` configuration table.
    pub fn from_config(
        code: &str,
        config: &SupplierApiConfig,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let format = format_for(&config.format).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("suppliers.{}.format", code),
            detail: format!("unknown format '{}'", config.format),
        })?;
        let client = CatalogClient::from_config(code, config, timeout_secs)?;
        debug!(
            supplier_code = code,
            url = %client.url(),
            format = format.name(),
            "supplier API configured"
        );
        Ok(Self::new(client, format))
    }
}

#[async_trait]
impl CatalogSource for SupplierApi {
    fn code(&self) -> &str {
        self.client.supplier_code()
    }

    async fn fetch_catalog(&self) -> Result<Vec<CanonicalProduct>, CatalogError> {
        let body = self.client.fetch_json().await?;
        let products = self
            .format
            .normalize(&body)
            .map_err(|cause| CatalogError::fetch_failed(self.code(), cause))?;
        info!(
            supplier_code = %self.code(),
            format = self.format.name(),
            items = products.len(),
            "catalog fetched"
        );
        Ok(products)
    }
}
