//! TOML-based configuration system for stocksync.
//!
//! All sensitive values (supplier API keys, broker passwords) are stored as
//! `_env` fields that reference environment variable names. The actual
//! secrets are resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Process-level settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Periodic sync settings.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Downstream event publishing. Absent means no events are published.
    #[serde(default)]
    pub events: Option<EventsConfig>,

    /// Supplier catalog APIs keyed by supplier API code.
    #[serde(default)]
    pub suppliers: BTreeMap<String, SupplierApiConfig>,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Process-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persistent data (the SQLite database).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Optional directory for daily-rolling log files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/stocksync")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
            log_dir: None,
        }
    }
}

impl DaemonConfig {
    /// Path of the SQLite database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("stocksync.db")
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Periodic "sync all suppliers" settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between scheduled syncs (default 86400, once a day).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Maximum number of suppliers synced at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_syncs: usize,

    /// Run a scheduled sync immediately when the daemon starts.
    #[serde(default)]
    pub run_on_startup: bool,
}

fn default_interval() -> u64 {
    86_400
}
fn default_max_concurrent() -> usize {
    4
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            max_concurrent_syncs: default_max_concurrent(),
            run_on_startup: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on a single catalog fetch, in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Largest number of sync logs a history query may return.
    #[serde(default = "default_history_limit_max")]
    pub history_limit_max: u32,
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_history_limit_max() -> u32 {
    100
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout(),
            history_limit_max: default_history_limit_max(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// RabbitMQ settings for the "supplier data updated" event.
///
/// Events are published through the broker's management HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Set to false to keep the section but stop publishing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Management API root, e.g. `http://rabbitmq:15672`.
    pub api_url: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    #[serde(default = "default_exchange")]
    pub exchange: String,

    #[serde(default = "default_routing_key")]
    pub routing_key: String,

    #[serde(default = "default_broker_user")]
    pub username: String,

    /// Environment variable holding the broker password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Bound on establishing the broker connection, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_vhost() -> String {
    "/".into()
}
fn default_exchange() -> String {
    "inventory".into()
}
fn default_routing_key() -> String {
    "supplier-data-updated".into()
}
fn default_broker_user() -> String {
    "guest".into()
}
fn default_connect_timeout() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Supplier APIs
// ---------------------------------------------------------------------------

/// How a supplier API expects its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// Send the key in the named request header.
    Header { name: String },
    /// Send the key as the named query parameter.
    Query { param: String },
    /// HTTP basic auth with the key as the password.
    Basic { username: String },
}

/// Catalog endpoint settings for one supplier API code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierApiConfig {
    /// Human-readable supplier API name.
    pub name: String,

    /// API root, e.g. `https://api.abcsuppliers.com/v1`.
    pub base_url: String,

    /// Path appended to `base_url` for the catalog listing.
    #[serde(default = "default_catalog_endpoint")]
    pub catalog_endpoint: String,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// One of `header`, `query`, `basic`.
    pub auth_type: String,

    /// Header name used when `auth_type = "header"`.
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Query parameter used when `auth_type = "query"`.
    #[serde(default)]
    pub auth_param: Option<String>,

    /// Username used when `auth_type = "basic"`.
    #[serde(default)]
    pub auth_username: Option<String>,

    /// Response format: `abc`, `xyz` or `generic`.
    #[serde(default = "default_format")]
    pub format: String,

    /// Resolved API key (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub api_key: Option<String>,
}

fn default_catalog_endpoint() -> String {
    "/catalog".into()
}
fn default_format() -> String {
    "generic".into()
}

impl SupplierApiConfig {
    /// Interpret `auth_type` and its companion field.
    pub fn auth_scheme(&self, supplier_code: &str) -> Result<AuthScheme, ConfigError> {
        let missing = |field: &str| ConfigError::InvalidValue {
            field: format!("suppliers.{}.{}", supplier_code, field),
            detail: format!("required when auth_type is '{}'", self.auth_type),
        };
        match self.auth_type.as_str() {
            "header" => self
                .auth_header
                .clone()
                .filter(|h| !h.is_empty())
                .map(|name| AuthScheme::Header { name })
                .ok_or_else(|| missing("auth_header")),
            "query" => self
                .auth_param
                .clone()
                .filter(|p| !p.is_empty())
                .map(|param| AuthScheme::Query { param })
                .ok_or_else(|| missing("auth_param")),
            "basic" => self
                .auth_username
                .clone()
                .filter(|u| !u.is_empty())
                .map(|username| AuthScheme::Basic { username })
                .ok_or_else(|| missing("auth_username")),
            other => Err(ConfigError::UnknownAuthType {
                supplier_code: supplier_code.to_string(),
                auth_type: other.to_string(),
            }),
        }
    }

    /// Full catalog URL.
    pub fn catalog_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.catalog_endpoint
        )
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(suppliers = config.suppliers.len(), "configuration parsed");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    ///
    /// Missing variables log a warning and leave the secret unset; a
    /// supplier without a key still syncs if its API allows it.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        for (code, supplier) in self.suppliers.iter_mut() {
            if let Some(ref env_name) = supplier.api_key_env {
                supplier.api_key =
                    resolve_optional_env(env_name, &format!("suppliers.{}.api_key_env", code));
            }
        }

        if let Some(ref mut events) = self.events {
            if let Some(ref env_name) = events.password_env {
                events.password = resolve_optional_env(env_name, "events.password_env");
            }
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "schedule.interval_secs".into(),
                detail: "interval must be > 0".into(),
            });
        }
        if self.schedule.max_concurrent_syncs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "schedule.max_concurrent_syncs".into(),
                detail: "at least one concurrent sync is required".into(),
            });
        }
        if self.sync.fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.fetch_timeout_secs".into(),
                detail: "fetch timeout must be > 0".into(),
            });
        }
        if self.sync.history_limit_max == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.history_limit_max".into(),
                detail: "history limit must be > 0".into(),
            });
        }

        if let Some(ref events) = self.events {
            if events.api_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "events.api_url".into(),
                    detail: "broker API URL must not be empty".into(),
                });
            }
            if events.connect_timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "events.connect_timeout_secs".into(),
                    detail: "connect timeout must be > 0".into(),
                });
            }
        }

        for (code, supplier) in &self.suppliers {
            if supplier.base_url.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("suppliers.{}.base_url", code),
                    detail: "base URL must not be empty".into(),
                });
            }
            supplier.auth_scheme(code)?;
            if crate::catalog::formats::format_for(&supplier.format).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("suppliers.{}.format", code),
                    detail: format!(
                        "unknown format '{}' (expected abc, xyz or generic)",
                        supplier.format
                    ),
                });
            }
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
