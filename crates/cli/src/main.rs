//! stocksync command-line management tool.
//!
//! Provides subcommands for generating and validating configuration files,
//! registering suppliers, running syncs by hand, and inspecting products and
//! sync history.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use stocksync_core::audit::SyncAudit;
use stocksync_core::catalog::CatalogRegistry;
use stocksync_core::config::AppConfig;
use stocksync_core::db::Database;
use stocksync_core::models::{NewSupplier, SyncLogStatus, SyncResult, SyncResultStatus, SyncType};
use stocksync_core::notify::Notifier;
use stocksync_core::sync_engine::SyncEngine;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// stocksync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "stocksync",
    version,
    about = "Manage suppliers and reconcile their catalogs into the product store"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/stocksync/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./stocksync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Manage registered suppliers.
    Suppliers {
        #[command(subcommand)]
        action: SuppliersAction,
    },

    /// List the products stored for a supplier.
    Products {
        /// Supplier ID.
        supplier_id: String,
    },

    /// Sync one supplier, or every supplier when no ID is given.
    Sync {
        /// Supplier ID.
        #[arg(short, long)]
        supplier: Option<String>,

        /// Record the sync as forced.
        #[arg(short, long)]
        force: bool,
    },

    /// Show recent sync attempts for a supplier.
    History {
        /// Supplier ID.
        supplier_id: String,

        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum SuppliersAction {
    /// List all suppliers.
    List,
    /// Register a new supplier.
    Add {
        /// Display name.
        #[arg(long)]
        name: String,

        /// Contact email address.
        #[arg(long)]
        email: String,

        /// Supplier API code; must match a `[suppliers.<code>]` table.
        #[arg(long)]
        api_code: Option<String>,

        /// The supplier's own identifier for this account.
        #[arg(long)]
        external_id: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        Commands::Suppliers { action } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_suppliers(&db, &config, action)
        }
        Commands::Products { supplier_id } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_products(&db, &supplier_id)
        }
        Commands::Sync { supplier, force } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_sync(db, &config, supplier, force).await
        }
        Commands::History { supplier_id, limit } => {
            let config = load_config(&cli.config)?;
            let db = open_database(&config)?;
            cmd_history(db, &config, &supplier_id, limit)
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn open_database(config: &AppConfig) -> Result<Database> {
    std::fs::create_dir_all(&config.daemon.data_dir).context("failed to create data directory")?;
    let db = Database::new(config.daemon.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// init / validate
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"# stocksync configuration
# Secrets are read from the environment variables named by *_env fields.

[daemon]
log_level = "info"
data_dir = "/var/lib/stocksync"
# log_dir = "/var/log/stocksync"

[schedule]
interval_secs = 86400
max_concurrent_syncs = 4
run_on_startup = false

[sync]
fetch_timeout_secs = 30
history_limit_max = 100

[events]
api_url = "http://localhost:15672"
vhost = "/"
exchange = "inventory"
routing_key = "supplier-data-updated"
username = "guest"
password_env = "RABBITMQ_PASSWORD"

[suppliers.supplier1]
name = "ABC Suppliers"
base_url = "https://api.abcsuppliers.com/v1"
catalog_endpoint = "/products"
api_key_env = "SUPPLIER1_API_KEY"
auth_type = "header"
auth_header = "X-API-Key"
format = "abc"

[suppliers.supplier2]
name = "XYZ Distributors"
base_url = "https://xyzdistributors.com/api"
catalog_endpoint = "/inventory"
api_key_env = "SUPPLIER2_API_KEY"
auth_type = "query"
auth_param = "api_key"
format = "xyz"
"#;

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [suppliers.*] tables with your supplier API details");
    println!("  2. Set the referenced environment variables (SUPPLIER1_API_KEY, etc.)");
    println!(
        "  3. Validate with: stocksync validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: stocksync-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  [OK] Environment variable references processed");

    if let Err(e) = config.validate() {
        println!("  [FAIL] Validation error: {}", e);
        anyhow::bail!("configuration validation failed");
    }
    println!("  [OK] All required fields are valid");

    let registry = match CatalogRegistry::from_config(&config) {
        Ok(registry) => registry,
        Err(e) => {
            println!("  [FAIL] Supplier API clients: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    };
    if registry.is_empty() {
        println!("  [OK] Catalog sources: none");
    } else {
        println!(
            "  [OK] Catalog sources: {}",
            registry.codes().collect::<Vec<_>>().join(", ")
        );
    }

    println!();
    println!("Configuration summary:");
    println!("  Data directory: {}", config.daemon.data_dir.display());
    println!("  Interval      : {}s", config.schedule.interval_secs);
    println!("  Fetch timeout : {}s", config.sync.fetch_timeout_secs);
    match config.events {
        Some(ref events) if events.enabled => {
            println!("  Events        : {}", events.api_url);
            println!(
                "  Broker pass   : {}",
                if events.password.is_some() { "set" } else { "NOT SET" }
            );
        }
        _ => println!("  Events        : disabled"),
    }
    for (code, supplier) in &config.suppliers {
        println!(
            "  Supplier API  : {} ({}, {} format, key {})",
            code,
            supplier.name,
            supplier.format,
            if supplier.api_key.is_some() { "set" } else { "NOT SET" }
        );
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

// ---------------------------------------------------------------------------
// suppliers / products
// ---------------------------------------------------------------------------

fn cmd_suppliers(db: &Database, config: &AppConfig, action: SuppliersAction) -> Result<()> {
    match action {
        SuppliersAction::List => {
            let suppliers = db.list_suppliers().context("failed to list suppliers")?;
            if suppliers.is_empty() {
                println!("No suppliers registered.");
                return Ok(());
            }

            let mut table = new_table();
            table.set_header(vec!["ID", "Name", "Email", "API code", "Last sync", "Products"]);
            for s in &suppliers {
                let products = db
                    .count_active_products(&s.id)
                    .context("failed to count products")?;
                table.add_row(vec![
                    Cell::new(&s.id),
                    Cell::new(truncate(&s.name, 30)),
                    Cell::new(&s.contact_email),
                    Cell::new(s.api_code.as_deref().unwrap_or("-")),
                    Cell::new(format_time(s.last_sync_at)),
                    Cell::new(products),
                ]);
            }
            println!("{}", table);
            println!("{} supplier(s)", suppliers.len());
            Ok(())
        }

        SuppliersAction::Add {
            name,
            email,
            api_code,
            external_id,
        } => {
            if let Some(ref code) = api_code {
                if !config.suppliers.contains_key(code) {
                    eprintln!(
                        "Warning: no [suppliers.{}] table in the configuration; \
                         this supplier cannot sync until one is added",
                        code
                    );
                }
            }
            let id = db
                .insert_supplier(&NewSupplier {
                    name,
                    contact_email: email,
                    external_id,
                    api_code,
                })
                .context("failed to add supplier")?;
            println!("Supplier added: {}", id);
            Ok(())
        }
    }
}

fn cmd_products(db: &Database, supplier_id: &str) -> Result<()> {
    db.get_supplier(supplier_id)
        .context("database error")?
        .ok_or_else(|| anyhow::anyhow!("supplier '{}' not found", supplier_id))?;

    let products = db
        .list_products(supplier_id)
        .context("failed to list products")?;
    if products.is_empty() {
        println!("No products stored for this supplier.");
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec!["External ID", "Name", "Stock", "Active"]);
    for p in &products {
        let active = if p.is_active {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(p.external_id.as_deref().unwrap_or("-")),
            Cell::new(truncate(&p.name, 40)),
            Cell::new(p.stock),
            active,
        ]);
    }
    println!("{}", table);
    println!(
        "{} product(s), {} active",
        products.len(),
        products.iter().filter(|p| p.is_active).count()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// sync / history
// ---------------------------------------------------------------------------

async fn cmd_sync(
    db: Database,
    config: &AppConfig,
    supplier: Option<String>,
    force: bool,
) -> Result<()> {
    let registry =
        CatalogRegistry::from_config(config).context("failed to build supplier API clients")?;
    let notifier = Notifier::new(config.events.as_ref());
    let engine = Arc::new(SyncEngine::new(config, Arc::new(db), registry, notifier));

    let results = match supplier {
        Some(id) => {
            println!("Syncing supplier {}...", id);
            vec![engine.sync_supplier(&id, force, SyncType::Manual).await]
        }
        None => {
            println!("Syncing all suppliers...");
            engine
                .sync_all(force, SyncType::Manual)
                .await
                .context("failed to sync suppliers")?
        }
    };
    println!();

    if results.is_empty() {
        println!("No suppliers registered.");
        return Ok(());
    }

    print_results(&results);

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} sync(s) failed", failed, results.len());
    }
    Ok(())
}

fn print_results(results: &[SyncResult]) {
    let mut table = new_table();
    table.set_header(vec!["Supplier", "Status", "Added", "Updated", "Deactivated", "Error"]);
    for r in results {
        let status = match r.status {
            SyncResultStatus::Success => Cell::new("✓ success").fg(Color::Green),
            SyncResultStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
            SyncResultStatus::Queued => Cell::new("⧗ queued").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&r.supplier_id),
            status,
            Cell::new(r.products_added),
            Cell::new(r.products_updated),
            Cell::new(r.products_deactivated),
            Cell::new(truncate(r.error_message.as_deref().unwrap_or(""), 60)),
        ]);
    }
    println!("{}", table);
}

fn cmd_history(db: Database, config: &AppConfig, supplier_id: &str, limit: u32) -> Result<()> {
    let audit = SyncAudit::new(Arc::new(db), config.sync.history_limit_max);
    let logs = audit
        .history(supplier_id, limit)
        .context("failed to read sync history")?;

    if logs.is_empty() {
        println!("No sync history for this supplier.");
        return Ok(());
    }

    let mut table = new_table();
    table.set_header(vec![
        "Started", "Type", "Status", "Added", "Updated", "Deactivated", "Error",
    ]);
    for log in &logs {
        let status = match log.status {
            SyncLogStatus::Success => Cell::new("✓ success").fg(Color::Green),
            SyncLogStatus::Failed => Cell::new("✗ failed").fg(Color::Red),
            SyncLogStatus::InProgress => Cell::new("⧗ in progress").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(format_time(Some(log.started_at))),
            Cell::new(log.sync_type),
            status,
            Cell::new(log.products_added),
            Cell::new(log.products_updated),
            Cell::new(log.products_deactivated),
            Cell::new(truncate(log.error_message.as_deref().unwrap_or(""), 50)),
        ]);
    }
    println!("{}", table);
    println!("{} entries shown", logs.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
