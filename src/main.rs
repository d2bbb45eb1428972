//! Instance ingestion server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                  INGESTION SERVER                    │
//!                 │                                                      │
//!   Raw request   │  ┌─────────┐   ┌─────────┐   ┌──────────┐            │
//!   ──────────────┼─▶│   net   │──▶│  http   │──▶│ routing  │            │
//!                 │  │listener │   │ framer  │   │  host    │            │
//!                 │  └─────────┘   └─────────┘   └────┬─────┘            │
//!                 │                                   ▼                  │
//!                 │                             ┌──────────┐             │
//!                 │                             │  store   │             │
//!                 │                             └────┬─────┘             │
//!                 │                 ┌────────────────┼──────────────┐    │
//!                 │                 ▼                ▼              ▼    │
//!   Response      │          ┌──────────┐     ┌──────────┐   ┌─────────┐ │
//!   ◀─────────────┼──────────│ response │     │   live   │   │ webhook │ │
//!                 │          │synthesis │     │broadcast │   │  queue  │ │
//!                 │          └──────────┘     └──────────┘   └─────────┘ │
//!                 │                                                      │
//!                 │  config · observability · lifecycle · maintenance    │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use instance_ingest::config::load_config;
use instance_ingest::lifecycle::{start, wait_for_signal};
use instance_ingest::observability::{init_logging, metrics};
use instance_ingest::store::MemoryStore;

#[derive(Parser)]
#[command(name = "instance-ingest")]
#[command(about = "Captures raw HTTP requests sent to instance subdomains", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    if cli.check {
        println!("Configuration OK");
        return Ok(());
    }

    init_logging(&config.observability);
    tracing::info!("instance-ingest v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        domain = %config.domain.base,
        hosted = config.expiry.hosted,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let store = match &config.storage.data_path {
        Some(path) => MemoryStore::load_from_file(path, config.limits.max_static_bytes)?,
        None => {
            tracing::warn!("No data path configured, instances are kept in memory only");
            MemoryStore::new(config.limits.max_static_bytes)
        }
    };

    let running = start(&config, Arc::new(store)).await?;

    wait_for_signal().await;
    running.shutdown().await;

    Ok(())
}
