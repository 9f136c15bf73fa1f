//! meld-node — one gossip replica.
//!
//! Usage:
//!   meld-node <config.json>
//!
//! Exit codes: 0 on clean stop, 1 on configuration or bind failure. The
//! process installs interrupt and terminate handlers that trigger a clean
//! shutdown with a final snapshot flush.

use anyhow::{Context, Result};
use clap::Parser;
use meld_node::{Node, NodeConfig, shutdown_signal};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meld-node")]
#[command(about = "State-based CRDT gossip replica")]
struct Args {
    /// Path to the node configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = NodeConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    init_logging(config.logging_config.as_deref());

    info!(
        "starting {} replica {} on {}",
        config.crdt_type,
        config.node_id,
        config.bind_addr()
    );

    let mut node = Node::new(config).context("initialising node")?;
    node.start().await.context("starting node")?;

    shutdown_signal().await;
    node.stop().await;
    Ok(())
}

/// Initialises tracing. The optional logging config file carries a filter
/// directive on its first line (e.g. `meld_node=debug,info`); anything
/// else falls back to the `RUST_LOG` environment or plain `info`.
fn init_logging(logging_config: Option<&Path>) {
    let filter = logging_config
        .and_then(|path| match std::fs::read_to_string(path) {
            Ok(contents) => contents.lines().next().map(str::trim).and_then(|line| {
                match EnvFilter::try_new(line) {
                    Ok(filter) => Some(filter),
                    Err(e) => {
                        eprintln!("ignoring bad filter in {}: {e}", path.display());
                        None
                    }
                }
            }),
            Err(e) => {
                eprintln!("cannot read logging config {}: {e}", path.display());
                None
            }
        })
        .unwrap_or_else(|| {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
