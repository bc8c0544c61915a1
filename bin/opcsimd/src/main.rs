//! ---
//! opcsim_section: "01-core-functionality"
//! opcsim_subsection: "binary"
//! opcsim_type: "source"
//! opcsim_scope: "code"
//! opcsim_description: "Binary entrypoint for the OPC-Sim daemon."
//! opcsim_version: "v0.0.0-prealpha"
//! opcsim_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use opcsim_common::config::AppConfig;
use opcsim_common::logging::init_tracing;
use opcsim_core::InstanceRegistry;
use opcsim_model::validate_unique_endpoints;
use opcsim_store::{JsonNodeStore, NodeStore};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "OPC-Sim daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulation daemon")]
    Run,
    #[command(about = "Validate the configuration and catalog, then exit")]
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/opcsim.toml"));
    candidates.push(PathBuf::from("configs/opcsim.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;

    init_tracing("opcsimd", &config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Check => check(config),
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let store = Arc::new(JsonNodeStore::open(&config.catalog_path)?);
    let registry = InstanceRegistry::new(store, config.simulation.clone());

    let outcome = registry.start_flagged().await?;
    for (server_id, err) in &outcome.failed {
        warn!(server = %server_id, error = %err, "autostart failed; server left stopped");
    }
    info!(
        started = outcome.succeeded.len(),
        failed = outcome.failed.len(),
        "daemon running; waiting for termination signal"
    );

    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    registry.shutdown_all().await;
    Ok(())
}

fn check(config: AppConfig) -> Result<()> {
    let store = JsonNodeStore::open(&config.catalog_path)?;
    let servers = store.servers()?;
    validate_unique_endpoints(&servers)?;
    let mut nodes = 0usize;
    for server in &servers {
        server.validate()?;
        for node in store.nodes(&server.id)? {
            node.validate()?;
            nodes += 1;
        }
    }
    info!(servers = servers.len(), nodes, "catalog check passed");
    println!("catalog ok: {} servers, {} nodes", servers.len(), nodes);
    Ok(())
}
