//! catalog-sync - Reliable marketplace catalog synchronization
//!
//! Command-line driver that syncs file-backed catalog sources and reports
//! progress the way an HTTP poller would.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::signal;
use tracing::{error, info, warn};

use catalog_sync::config::Config;
use catalog_sync::logging::init_tracing;
use catalog_sync::sync::{
    CatalogSyncService, FileCatalogClient, MarketplaceClient, MemoryCatalogStore, SyncStatus,
};

/// catalog-sync - Reliable marketplace catalog synchronization
#[derive(Parser, Debug)]
#[command(name = "catalog-sync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "CATALOG_SYNC_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full catalog sync for one scope and print the final job
    Sync {
        /// Scope (marketplace account) to synchronize
        scope: String,

        /// Bypass the local cache of the source
        #[arg(long)]
        force_refresh: bool,
    },
    /// Read previously synchronized data for every scope
    Cached {
        /// Maximum items per scope
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting catalog-sync");

    let mut clients: Vec<Arc<dyn MarketplaceClient>> = Vec::new();
    for (scope, source) in &config.sources {
        if !source.enabled {
            info!(scope = %scope, "Source disabled, skipping");
            continue;
        }
        let client = FileCatalogClient::load(scope.clone(), &source.catalog_path).await?;
        info!(
            scope = %scope,
            path = %source.catalog_path,
            items = client.len(),
            "Catalog source loaded"
        );
        clients.push(Arc::new(client));
    }

    let store = Arc::new(MemoryCatalogStore::new());
    let service = CatalogSyncService::new(&config, clients, store);

    let result = match args.command {
        Command::Sync {
            scope,
            force_refresh,
        } => run_sync(&service, &config, &scope, force_refresh).await,
        Command::Cached { limit } => read_cached(&service, limit).await,
    };

    service.shutdown();
    info!("catalog-sync finished");
    result
}

/// Start a sync and poll it until it reaches a terminal state
async fn run_sync(
    service: &CatalogSyncService,
    config: &Config,
    scope: &str,
    force_refresh: bool,
) -> anyhow::Result<()> {
    service.start_sync(scope, force_refresh).await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cancelling = false;
    let mut ticker = tokio::time::interval(config.tracker.poll_interval());

    let job = loop {
        tokio::select! {
            _ = &mut shutdown, if !cancelling => {
                warn!(scope, "Cancelling sync");
                service.cancel_sync(scope);
                cancelling = true;
            }
            _ = ticker.tick() => {
                let job = service.get_sync_progress(scope).await?;
                info!(
                    scope,
                    status = %job.status,
                    current = job.progress.current,
                    total = job.progress.total,
                    stage = %job.progress.stage,
                    "Sync progress"
                );
                if job.status.is_terminal() {
                    break job;
                }
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    if job.status == SyncStatus::Error {
        anyhow::bail!(
            "Sync failed: {}",
            job.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

/// Bulk read every scope and print a per-scope summary
async fn read_cached(service: &CatalogSyncService, limit: Option<usize>) -> anyhow::Result<()> {
    let results = service.read_cached_all(limit).await;
    let mut failures = 0;

    let report: Vec<serde_json::Value> = results
        .into_iter()
        .map(|(scope, result)| match result {
            Ok(catalog) => json!({
                "scope": scope,
                "items": catalog.items.len(),
                "fromCache": catalog.from_cache,
            }),
            Err(e) => {
                failures += 1;
                error!(scope = %scope, error = %e, "Cached read failed");
                json!({ "scope": scope, "error": e.to_string() })
            }
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&report)?);
    if failures > 0 {
        anyhow::bail!("{} cached reads failed", failures);
    }
    Ok(())
}

/// Load configuration from file or environment
fn load_config(args: &Args) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => {
            // tracing is not initialized yet
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
        }
    }
}

/// Resolve when Ctrl+C or SIGTERM is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
