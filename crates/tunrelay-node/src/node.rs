//! Node assembly: wires the overlay, group registry, relay and gateway
//! together and runs them until shutdown.

use crate::config::NodeConfig;
use crate::gateway::{self, GatewayState};
use crate::groups::GroupRegistry;
use crate::overlay::{ControlResponder, DiagnosticsService, PeerTable, TcpOverlay};
use crate::relay::{ControlExchange, StreamBroker};
use crate::tunnel::{TrafficStats, TunnelManager};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tunrelay_core::{IpClassifier, ProtocolTag, RelayError, RelayResult};

/// A configured node, ready to run.
pub struct TunrelayNode {
    config: NodeConfig,
    overlay: Arc<TcpOverlay>,
    state: GatewayState,
}

impl TunrelayNode {
    pub async fn new(config: NodeConfig) -> Self {
        let table = Arc::new(PeerTable::new(config.peer_id, config.peers.clone()));
        info!(peer = %config.peer_id, known = table.len(), "peer table loaded");

        let control_handler = ControlResponder::new(DiagnosticsService::new(config.peer_id));
        let overlay = Arc::new(
            TcpOverlay::new(config.peer_id, table, config.dial_timeout, config.relay)
                .with_handler(ProtocolTag::Control, Arc::new(control_handler)),
        );

        let groups = Arc::new(GroupRegistry::new(overlay.clone()));
        for (name, nodes) in &config.groups {
            groups.add_configured(name.clone(), nodes.clone()).await;
        }

        let broker = Arc::new(StreamBroker::new(overlay.clone(), overlay.clone()));
        let tunnels = TunnelManager::new(
            groups.clone(),
            broker.clone(),
            Arc::new(IpClassifier),
            Arc::new(TrafficStats::new()),
        );
        let control = ControlExchange::new(groups.clone(), broker);

        let state = GatewayState {
            tunnels: Arc::new(tunnels),
            control: Arc::new(control),
            groups,
        };

        Self {
            config,
            overlay,
            state,
        }
    }

    /// Bind the overlay listener. Returns the bound address.
    pub async fn start_overlay(&self) -> RelayResult<SocketAddr> {
        self.overlay.clone().listen(&self.config.overlay_addr).await
    }

    pub fn gateway_state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Run the overlay and, if enabled, the gateway until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let overlay_addr = self.start_overlay().await?;
        info!(
            peer = %self.config.peer_id,
            overlay = %overlay_addr,
            relay = self.config.relay,
            "node started"
        );

        if !self.config.gateway_enabled {
            info!("gateway disabled");
            shutdown.await;
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config.gateway_addr)
            .await
            .map_err(|e| RelayError::Transport(format!("gateway bind failed: {e}")))?;
        gateway::serve(listener, self.state, shutdown).await
    }
}
