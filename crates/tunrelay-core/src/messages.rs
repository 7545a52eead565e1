//! Messages carried on overlay streams.
//!
//! Every overlay stream opens with a [`StreamHeader`]. After it, a
//! `tunnel-data` stream is an opaque byte pipe and a `control` stream carries
//! exactly one [`ControlRequest`] followed by exactly one [`ControlResponse`].

use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overlay protocol version written into every stream header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Label attached at stream-establishment time so the remote peer dispatches
/// the stream to the right handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolTag {
    /// Raw link-layer payloads.
    TunnelData,
    /// One-shot request/response.
    Control,
}

impl ProtocolTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolTag::TunnelData => "tunnel-data",
            ProtocolTag::Control => "control",
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First frame on every overlay stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub version: u8,
    pub tag: ProtocolTag,
    /// Final destination of the stream.
    pub target: PeerId,
    /// Relays still to traverse before `target`, nearest first.
    #[serde(default)]
    pub chain: Vec<PeerId>,
}

impl StreamHeader {
    pub fn direct(tag: ProtocolTag, target: PeerId) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            tag,
            target,
            chain: Vec::new(),
        }
    }

    pub fn relayed(tag: ProtocolTag, target: PeerId, chain: Vec<PeerId>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            tag,
            target,
            chain,
        }
    }

    /// Header for the next hop: the nearest relay is popped off the chain.
    /// Returns the hop to dial and the header to send it.
    pub fn next_hop(&self) -> (PeerId, StreamHeader) {
        match self.chain.split_first() {
            Some((hop, rest)) => (*hop, Self::relayed(self.tag, self.target, rest.to_vec())),
            None => (self.target, Self::direct(self.tag, self.target)),
        }
    }
}

/// Control request: a command pattern and its single argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub pattern: String,
    #[serde(default)]
    pub argument: String,
}

/// Control response body, returned verbatim to the HTTP caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub body: String,
}

/// Control patterns understood by the remote terminator.
pub mod patterns {
    pub const PICK_IP: &str = "/register/pick/ip";
    pub const DELETE_IP: &str = "/register/delete/ip";
    pub const KEEPALIVE_IP: &str = "/register/keepalive/ip";
    pub const LIST_IP: &str = "/register/list/ip";
    pub const PREFIX_IPV4: &str = "/register/prefix/ipv4";
    pub const PREFIX_IPV6: &str = "/register/prefix/ipv6";
    pub const TEST: &str = "/test";
}
