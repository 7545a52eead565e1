//! Overlay capabilities consumed by the relay: the route table's neighbor
//! test and direct / relay-chained stream establishment.
//!
//! # Submodules
//!
//! - **[`table`]**: the static [`PeerTable`] of known peers and the relay
//!   chains that reach non-neighbors.
//! - **[`tcp`]**: [`TcpOverlay`], a [`Streamer`] that dials peers over TCP,
//!   accepts inbound streams, and splices relayed ones onward.
//! - **[`inbound`]**: handlers for streams that terminate at this node.
//! - **[`wire`]**: async length-prefixed framing on overlay streams.
//!
//! The relay itself only sees the traits defined here, so tests substitute
//! in-memory streams for TCP.

pub mod inbound;
pub mod table;
pub mod tcp;
pub mod wire;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tunrelay_core::{PeerId, ProtocolTag, RelayResult};

pub use inbound::{ControlResponder, DiagnosticsService, InboundHandler};
pub use table::PeerTable;
pub use tcp::TcpOverlay;

/// A bidirectional byte stream to an overlay peer.
pub trait OverlayStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> OverlayStream for T {}

pub type BoxedStream = Box<dyn OverlayStream>;

/// Live routing state: which peers are directly connected.
pub trait RouteTable: Send + Sync {
    /// Whether `peer` is currently a direct neighbor.
    fn is_neighbor(&self, peer: &PeerId) -> bool;

    /// Whether `peer` can be reached at all, directly or via relays.
    fn is_reachable(&self, peer: &PeerId) -> bool {
        self.is_neighbor(peer)
    }
}

/// Opens tagged streams to overlay peers.
#[async_trait]
pub trait Streamer: Send + Sync {
    /// Open a stream straight to a neighbor.
    async fn new_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream>;

    /// Open a stream to a non-neighbor through a chain of relaying peers.
    async fn new_relay_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream>;
}
