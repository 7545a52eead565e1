//! Static peer table.
//!
//! Lists the peers this node knows about. A peer with an address and no
//! `via` is a neighbor; a peer with `via` is reached by following `via`
//! links until a neighbor is found.

use super::RouteTable;
use std::collections::{HashMap, HashSet};
use tunrelay_core::{PeerId, RelayError, RelayResult};

/// One known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: PeerId,
    /// Overlay listen address (`host:port`), required for neighbors.
    pub addr: Option<String>,
    /// Relay peer this one is reached through.
    pub via: Option<PeerId>,
}

impl PeerEntry {
    fn is_neighbor(&self) -> bool {
        self.addr.is_some() && self.via.is_none()
    }
}

/// Known peers, indexed by address.
#[derive(Debug)]
pub struct PeerTable {
    local: PeerId,
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerTable {
    pub fn new(local: PeerId, entries: impl IntoIterator<Item = PeerEntry>) -> Self {
        let peers = entries
            .into_iter()
            .filter(|e| e.id != local)
            .map(|e| (e.id, e))
            .collect();
        Self { local, peers }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Dial address of a neighbor.
    pub fn neighbor_addr(&self, peer: &PeerId) -> RelayResult<&str> {
        match self.peers.get(peer) {
            Some(PeerEntry {
                addr: Some(addr),
                via: None,
                ..
            }) => Ok(addr),
            Some(_) => Err(RelayError::Transport(format!(
                "peer {} is not a neighbor",
                peer.short()
            ))),
            None => Err(RelayError::Transport(format!("unknown peer {}", peer.short()))),
        }
    }

    /// Relays between this node and `peer`, nearest first. The first entry is
    /// always a neighbor; `peer` itself is not included.
    pub fn route_to(&self, peer: &PeerId) -> RelayResult<Vec<PeerId>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = *peer;
        seen.insert(current);

        loop {
            let entry = self
                .peers
                .get(&current)
                .ok_or_else(|| RelayError::Transport(format!("unknown peer {}", current.short())))?;

            match entry.via {
                Some(via) => {
                    if via == self.local || !seen.insert(via) {
                        return Err(RelayError::Transport(format!(
                            "relay loop reaching {}",
                            peer.short()
                        )));
                    }
                    chain.push(via);
                    current = via;
                }
                None if entry.is_neighbor() => break,
                None => {
                    return Err(RelayError::Transport(format!(
                        "peer {} has neither address nor relay",
                        current.short()
                    )))
                }
            }
        }

        if chain.is_empty() {
            return Err(RelayError::Transport(format!(
                "peer {} is a neighbor, no relay chain",
                peer.short()
            )));
        }

        chain.reverse();
        Ok(chain)
    }
}

impl RouteTable for PeerTable {
    fn is_neighbor(&self, peer: &PeerId) -> bool {
        self.peers.get(peer).is_some_and(PeerEntry::is_neighbor)
    }

    fn is_reachable(&self, peer: &PeerId) -> bool {
        self.is_neighbor(peer) || self.route_to(peer).is_ok()
    }
}
