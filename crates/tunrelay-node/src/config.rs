//! Node configuration: TOML file + CLI overrides.

use crate::overlay::table::PeerEntry;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tunrelay_core::{PeerId, RelayError, RelayResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub peers: Vec<PeerSection>,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
}

/// `[node]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    /// Hex overlay address. Derived from `overlay_addr` when absent.
    pub id: Option<String>,
    #[serde(default = "default_overlay_addr")]
    pub overlay_addr: String,
    #[serde(default = "default_true")]
    pub relay: bool,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: None,
            overlay_addr: default_overlay_addr(),
            relay: true,
            dial_timeout_ms: default_dial_timeout_ms(),
        }
    }
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gateway_addr")]
    pub addr: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_gateway_addr(),
        }
    }
}

/// One `[[peers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerSection {
    pub id: String,
    pub addr: Option<String>,
    pub via: Option<String>,
}

/// One `[[groups]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSection {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

fn default_overlay_addr() -> String {
    "0.0.0.0:1634".to_string()
}
fn default_gateway_addr() -> String {
    "0.0.0.0:1638".to_string()
}
fn default_dial_timeout_ms() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub gateway_addr: Option<String>,
    pub overlay_addr: Option<String>,
    pub peer_id: Option<String>,
    pub disable_gateway: bool,
    pub disable_relay: bool,
}

/// Resolved node configuration (ids parsed, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub peer_id: PeerId,
    pub overlay_addr: String,
    pub relay: bool,
    pub dial_timeout: Duration,
    pub gateway_enabled: bool,
    pub gateway_addr: String,
    pub peers: Vec<PeerEntry>,
    pub groups: Vec<(String, Vec<PeerId>)>,
}

impl NodeConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> RelayResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        Self::resolve(file_config, cli)
    }

    /// Merge `file` with `cli` and parse every peer address.
    pub fn resolve(file: ConfigFile, cli: CliOverrides) -> RelayResult<Self> {
        let overlay_addr = cli.overlay_addr.unwrap_or(file.node.overlay_addr);
        let peer_id = match cli.peer_id.or(file.node.id) {
            Some(hex) => PeerId::parse_hex(&hex)?,
            None => PeerId::derive(overlay_addr.as_bytes()),
        };

        let peers = file
            .peers
            .iter()
            .map(|p| {
                Ok(PeerEntry {
                    id: PeerId::parse_hex(&p.id)?,
                    addr: p.addr.clone(),
                    via: p.via.as_deref().map(PeerId::parse_hex).transpose()?,
                })
            })
            .collect::<RelayResult<Vec<_>>>()?;

        let groups = file
            .groups
            .iter()
            .map(|g| {
                let nodes = g
                    .nodes
                    .iter()
                    .map(|n| PeerId::parse_hex(n))
                    .collect::<RelayResult<Vec<_>>>()?;
                Ok((g.name.clone(), nodes))
            })
            .collect::<RelayResult<Vec<_>>>()?;

        Ok(Self {
            peer_id,
            overlay_addr,
            relay: file.node.relay && !cli.disable_relay,
            dial_timeout: Duration::from_millis(file.node.dial_timeout_ms),
            gateway_enabled: file.gateway.enabled && !cli.disable_gateway,
            gateway_addr: cli.gateway_addr.unwrap_or(file.gateway.addr),
            peers,
            groups,
        })
    }
}

fn parse(content: &str) -> RelayResult<ConfigFile> {
    toml::from_str(content).map_err(|e| RelayError::Other(format!("config parse error: {e}")))
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
