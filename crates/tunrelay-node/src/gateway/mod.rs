//! Tunnel gateway: the HTTP/WebSocket surface local clients talk to.
//!
//! # Submodules
//!
//! - **[`handlers`]**: one handler per route. Every route that needs
//!   routing reads the `group` request header.
//! - **[`ws`]**: adapts an upgraded WebSocket to the tunnel's
//!   [`ClientFrame`](crate::tunnel::ClientFrame) sink and stream.
//!
//! # Routes
//!
//! ```text
//! /ws                       upgrade → TunnelManager::serve
//! /observe/add/group        GroupRegistry::add_observe_group
//! /observe/delete/group     GroupRegistry::remove_group
//! /ip                       client address
//! /register/*, /test        ControlExchange::call
//! /stats                    TrafficStats::summary
//! ```

pub mod handlers;
pub mod ws;

use crate::groups::GroupRegistry;
use crate::relay::ControlExchange;
use crate::tunnel::TunnelManager;
use axum::routing::{any, get};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tunrelay_core::RelayResult;

/// Shared handles for the route handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub tunnels: Arc<TunnelManager>,
    pub control: Arc<ControlExchange>,
    pub groups: Arc<GroupRegistry>,
}

/// Every route but `/ws` accepts any method.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(handlers::tunnel))
        .route("/observe/add/group", any(handlers::add_observe_group))
        .route("/observe/delete/group", any(handlers::delete_observe_group))
        .route("/ip", any(handlers::client_ip))
        .route("/test", any(handlers::diagnostics))
        .route("/stats", any(handlers::stats))
        .route("/register/pick/ip", any(handlers::pick_ip))
        .route("/register/delete/ip", any(handlers::delete_ip))
        .route("/register/keepalive/ip", any(handlers::keepalive_ip))
        .route("/register/list/ip", any(handlers::list_ip))
        .route("/register/prefix/ipv4", any(handlers::prefix_ipv4))
        .route("/register/prefix/ipv6", any(handlers::prefix_ipv6))
        .with_state(state)
}

/// Serve the gateway on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: GatewayState, shutdown: F) -> RelayResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(addr = %addr, "gateway listening");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(addr = %addr, "gateway stopped");
    Ok(())
}
