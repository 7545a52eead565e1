//! Route handlers. Every body is plain text; failures are reported as the
//! error's display string with a 200 status.

use super::{ws, GatewayState};
use crate::groups::GroupKind;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{debug, info};
use tunrelay_core::messages::patterns;
use tunrelay_core::peer::parse_peer_list;

const GROUP_HEADER: &str = "group";
const FORWARDED_FOR: &str = "x-forwarded-for";

fn group(headers: &HeaderMap) -> String {
    headers
        .get(GROUP_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct NodesQuery {
    #[serde(default)]
    nodes: String,
}

#[derive(Debug, Deserialize)]
pub struct IpQuery {
    ip: Option<String>,
}

pub async fn tunnel(
    upgrade: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let group = group(&headers);
    upgrade.on_upgrade(move |socket| run_tunnel(state, group, remote, socket))
}

async fn run_tunnel(state: GatewayState, group: String, remote: SocketAddr, socket: WebSocket) {
    debug!(remote = %remote, group = %group, "tunnel upgrade");
    let (sink, source) = ws::split(socket);
    match state.tunnels.serve(&group, sink, source).await {
        Ok(reason) => info!(remote = %remote, group = %group, reason = ?reason, "tunnel ended"),
        // Already logged and the client closed by the tunnel manager.
        Err(e) => debug!(remote = %remote, group = %group, error = %e, "tunnel refused"),
    }
}

pub async fn add_observe_group(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<NodesQuery>,
) -> String {
    let nodes = match parse_peer_list(&query.nodes) {
        Ok(nodes) => nodes,
        Err(e) => return e.to_string(),
    };
    let name = group(&headers);
    state.groups.add_observe_group(name.clone(), nodes).await;
    if let Some(entry) = state.groups.get(&name).await {
        debug!(
            group = %entry.name,
            keep_connected = entry.keep_connected,
            "observation group added"
        );
    }
    "OK".into()
}

pub async fn delete_observe_group(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> String {
    match state.groups.remove_group(&group(&headers), GroupKind::Observe).await {
        Ok(()) => "OK".into(),
        Err(e) => e.to_string(),
    }
}

/// First `X-Forwarded-For` hop, else the connection's address.
pub async fn client_ip(
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| remote.ip().to_string())
}

async fn control(
    state: &GatewayState,
    headers: &HeaderMap,
    pattern: &str,
    argument: &str,
) -> String {
    match state.control.call(&group(headers), pattern, argument).await {
        Ok(body) => body,
        Err(e) => e.to_string(),
    }
}

/// Lease calls that are a no-op without an address.
async fn control_with_ip(
    state: &GatewayState,
    headers: &HeaderMap,
    pattern: &str,
    ip: Option<String>,
) -> String {
    match ip.filter(|ip| !ip.is_empty()) {
        Some(ip) => control(state, headers, pattern, &ip).await,
        None => "OK".into(),
    }
}

pub async fn pick_ip(State(state): State<GatewayState>, headers: HeaderMap) -> String {
    control(&state, &headers, patterns::PICK_IP, "").await
}

pub async fn delete_ip(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<IpQuery>,
) -> String {
    control_with_ip(&state, &headers, patterns::DELETE_IP, query.ip).await
}

pub async fn keepalive_ip(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<IpQuery>,
) -> String {
    control_with_ip(&state, &headers, patterns::KEEPALIVE_IP, query.ip).await
}

pub async fn list_ip(State(state): State<GatewayState>, headers: HeaderMap) -> String {
    control(&state, &headers, patterns::LIST_IP, "").await
}

pub async fn prefix_ipv4(State(state): State<GatewayState>, headers: HeaderMap) -> String {
    control(&state, &headers, patterns::PREFIX_IPV4, "").await
}

pub async fn prefix_ipv6(State(state): State<GatewayState>, headers: HeaderMap) -> String {
    control(&state, &headers, patterns::PREFIX_IPV6, "").await
}

pub async fn diagnostics(State(state): State<GatewayState>, headers: HeaderMap) -> String {
    control(&state, &headers, patterns::TEST, "").await
}

pub async fn stats(State(state): State<GatewayState>) -> String {
    state.tunnels.stats().summary()
}
