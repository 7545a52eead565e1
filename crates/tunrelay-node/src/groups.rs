//! Group membership and candidate resolution.
//!
//! A group names a set of peers that can service tunnel and control calls.
//! Configured groups come from the config file; observation groups are
//! added and removed at runtime through the gateway. Resolution filters the
//! members through the route table and hands back an immutable snapshot.

use crate::overlay::RouteTable;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use tunrelay_core::{PeerId, RelayError, RelayResult};

/// Resolves a group name to the peers currently able to serve it.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Ordered candidates for `group`. Fails with
    /// [`RelayError::NoCandidates`] when none is reachable.
    async fn resolve(&self, group: &str) -> RelayResult<Vec<PeerId>>;
}

/// How a group entered the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    /// Listed in the config file.
    Configured,
    /// Registered at runtime via `/observe/add/group`.
    Observe,
}

/// A named set of peers.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub name: String,
    pub kind: GroupKind,
    /// Members in preference order.
    pub nodes: Vec<PeerId>,
    /// Number of members the node tries to keep connected.
    pub keep_connected: usize,
}

/// In-memory registry of groups.
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, GroupEntry>>,
    routes: Arc<dyn RouteTable>,
}

impl GroupRegistry {
    pub fn new(routes: Arc<dyn RouteTable>) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            routes,
        }
    }

    /// Add a configured group.
    pub async fn add_configured(&self, name: String, nodes: Vec<PeerId>) {
        self.insert(name, GroupKind::Configured, nodes).await;
    }

    /// Register (or replace) an observation group.
    pub async fn add_observe_group(&self, name: String, nodes: Vec<PeerId>) {
        self.insert(name, GroupKind::Observe, nodes).await;
    }

    async fn insert(&self, name: String, kind: GroupKind, nodes: Vec<PeerId>) {
        let entry = GroupEntry {
            name: name.clone(),
            kind,
            keep_connected: nodes.len(),
            nodes,
        };
        info!(group = %name, kind = ?kind, members = entry.nodes.len(), "group registered");
        self.groups.write().await.insert(name, entry);
    }

    /// Remove a group of the given kind.
    pub async fn remove_group(&self, name: &str, kind: GroupKind) -> RelayResult<()> {
        let mut groups = self.groups.write().await;
        match groups.get(name) {
            Some(entry) if entry.kind == kind => {
                groups.remove(name);
                info!(group = %name, kind = ?kind, "group removed");
                Ok(())
            }
            _ => Err(RelayError::GroupNotFound(name.to_string())),
        }
    }

    pub async fn get(&self, name: &str) -> Option<GroupEntry> {
        self.groups.read().await.get(name).cloned()
    }
}

#[async_trait]
impl GroupResolver for GroupRegistry {
    async fn resolve(&self, group: &str) -> RelayResult<Vec<PeerId>> {
        let groups = self.groups.read().await;
        let entry = groups
            .get(group)
            .ok_or_else(|| RelayError::NoCandidates(group.to_string()))?;

        let candidates: Vec<PeerId> = entry
            .nodes
            .iter()
            .filter(|peer| self.routes.is_reachable(peer))
            .copied()
            .collect();

        if candidates.is_empty() {
            debug!(group = %group, members = entry.nodes.len(), "no reachable members");
            return Err(RelayError::NoCandidates(group.to_string()));
        }
        Ok(candidates)
    }
}
