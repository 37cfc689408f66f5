//! Blockplane dock daemon
//!
//! Boots one backend driver, discovers its pools, and serves lifecycle
//! dispatch until shutdown. The northbound API hands validated requests to
//! the control plane; the authoritative state is always the persisted
//! resource status.

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blockplane::config::{self, DEFAULT_BACKUP_ROOT, DEFAULT_LVM_CONFIG_PATH};
use blockplane::{
    new_backup, DriverConfig, DriverFactory, MemoryStore, Orchestrator, Result, ShellRunner,
    StaticDriverProvider,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Blockplane - software-defined block storage control plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend driver type
    #[arg(long, env = "BACKEND", default_value = "lvm")]
    backend: String,

    /// Driver configuration file
    #[arg(long, env = "DRIVER_CONFIG", default_value = DEFAULT_LVM_CONFIG_PATH)]
    driver_config: String,

    /// Backup store kind
    #[arg(long, env = "BACKUP_KIND", default_value = "file")]
    backup_kind: String,

    /// Root directory of the file backup store
    #[arg(long, env = "BACKUP_ROOT", default_value = DEFAULT_BACKUP_ROOT)]
    backup_root: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("Starting blockplane dock");
    info!("  Version: {}", blockplane::VERSION);
    info!("  Backend: {}", args.backend);
    info!("  Driver config: {}", args.driver_config);

    let mut driver_config = DriverConfig::default();
    match config::load_config(&args.driver_config).await {
        Ok(lvm) => driver_config.lvm = lvm,
        Err(e) => warn!("Using default driver configuration: {}", e),
    }

    let runner = ShellRunner::new();
    let backup = new_backup(&args.backup_kind, &args.backup_root)?;
    let driver = DriverFactory::create(&args.backend, driver_config, runner, backup)?;
    driver.setup().await?;

    let provider = StaticDriverProvider::new();
    provider.register_driver(driver.clone()).await?;

    let store = MemoryStore::new();
    let orchestrator = Orchestrator::new(store, provider);

    let pools = orchestrator.sync_pools(driver.as_ref()).await?;
    info!("Dock ready, serving {} pools", pools.len());

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| blockplane::Error::Internal(format!("signal handler failed: {}", e)))?;

    info!("Shutting down");
    driver.unset().await?;
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
