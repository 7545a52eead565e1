//! tunrelay-node: overlay node with a WebSocket tunnel gateway.
//!
//! Resolves tunnel and control requests for a named group to overlay peers,
//! opens direct or relay-chained streams to them, and pumps client traffic
//! across the overlay.

mod config;
mod gateway;
mod groups;
mod node;
mod overlay;
mod relay;
mod tunnel;

#[cfg(test)]
mod testutil;

use anyhow::Context;
use clap::Parser;
use config::{CliOverrides, NodeConfig};
use node::TunrelayNode;
use std::path::PathBuf;
use tracing::info;

/// tunrelay-node: overlay tunnel relay
#[derive(Parser, Debug)]
#[command(name = "tunrelay-node", version, about = "Overlay tunnel relay node")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.tunrelay/config.toml")]
    config: String,

    /// Gateway listen address (host:port)
    #[arg(long)]
    gateway_addr: Option<String>,

    /// Overlay listen address (host:port)
    #[arg(long)]
    overlay_addr: Option<String>,

    /// This node's overlay address (hex)
    #[arg(long)]
    peer_id: Option<String>,

    /// Run without the HTTP/WebSocket gateway
    #[arg(long)]
    disable_gateway: bool,

    /// Refuse streams addressed to other peers
    #[arg(long)]
    disable_relay: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting tunrelay-node");

    let config_path = PathBuf::from(&cli.config);
    let overrides = CliOverrides {
        gateway_addr: cli.gateway_addr,
        overlay_addr: cli.overlay_addr,
        peer_id: cli.peer_id,
        disable_gateway: cli.disable_gateway,
        disable_relay: cli.disable_relay,
    };
    let node_config = NodeConfig::load(Some(&config_path), overrides)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    let node = TunrelayNode::new(node_config).await;
    node.run(shutdown_signal()).await.context("node error")?;

    info!("tunrelay-node stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
