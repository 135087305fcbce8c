//! Authenticated HTTP access to a supplier catalog endpoint.

use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{AuthScheme, SupplierApiConfig};
use crate::errors::{CatalogError, ConfigError, FetchCause};

/// Longest response body excerpt kept in an HTTP status error.
const MAX_ERROR_BODY: usize = 512;

/// Fetches the raw catalog document of one supplier API.
pub struct CatalogClient {
    supplier_code: String,
    url: Url,
    auth: AuthScheme,
    api_key: Option<String>,
    timeout_secs: u64,
    http: reqwest::Client,
}

impl CatalogClient {
    /// Build a client from a supplier's configuration.
    ///
    /// Fails on an unknown auth type, a missing auth companion field or an
    /// unparsable catalog URL.
    pub fn from_config(
        supplier_code: &str,
        config: &SupplierApiConfig,
        timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let auth = config.auth_scheme(supplier_code)?;
        let url = Url::parse(&config.catalog_url()).map_err(|e| ConfigError::InvalidValue {
            field: format!("suppliers.{}.base_url", supplier_code),
            detail: e.to_string(),
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: format!("suppliers.{}", supplier_code),
                detail: format!("failed to build HTTP client: {}", e),
            })?;

        if config.api_key.is_none() {
            debug!(supplier_code, "no API key resolved, requests are sent unauthenticated");
        }

        Ok(Self {
            supplier_code: supplier_code.to_string(),
            url,
            auth,
            api_key: config.api_key.clone(),
            timeout_secs,
            http,
        })
    }

    pub fn supplier_code(&self) -> &str {
        &self.supplier_code
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// GET the catalog and decode it as JSON.
    pub async fn fetch_json(&self) -> Result<Value, CatalogError> {
        let fail = |cause| CatalogError::fetch_failed(&self.supplier_code, cause);

        let mut request = self.http.get(self.url.clone());
        if let Some(ref key) = self.api_key {
            request = match &self.auth {
                AuthScheme::Header { name } => request.header(name.as_str(), key.as_str()),
                AuthScheme::Query { param } => request.query(&[(param.as_str(), key.as_str())]),
                AuthScheme::Basic { username } => request.basic_auth(username, Some(key)),
            };
        } else if let AuthScheme::Basic { username } = &self.auth {
            request = request.basic_auth(username, None::<&str>);
        }

        debug!(supplier_code = %self.supplier_code, url = %self.url, "fetching catalog");
        let resp = request.send().await.map_err(|e| fail(self.transport_cause(e)))?;

        let status = resp.status();
        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
            warn!(
                supplier_code = %self.supplier_code,
                status = %status,
                "supplier API returned error status"
            );
            return Err(fail(FetchCause::HttpStatus {
                status: status.as_u16(),
                body,
            }));
        }

        let text = resp.text().await.map_err(|e| fail(self.transport_cause(e)))?;
        serde_json::from_str(&text)
            .map_err(|e| fail(FetchCause::MalformedPayload(format!("invalid JSON: {}", e))))
    }

    fn transport_cause(&self, err: reqwest::Error) -> FetchCause {
        if err.is_timeout() {
            FetchCause::Timeout(self.timeout_secs)
        } else if err.is_builder() {
            FetchCause::InvalidRequest(err.to_string())
        } else {
            FetchCause::Transport(err)
        }
    }
}

fn truncate_at_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
