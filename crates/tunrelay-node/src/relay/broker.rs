//! Stream broker: opens a tagged overlay stream to the first candidate that
//! accepts one.
//!
//! For each candidate the broker asks the route table whether the peer is a
//! neighbor and requests a direct stream if so, or a relay-chained stream
//! otherwise. A failed candidate is logged and skipped, never retried; the
//! first success ends the walk and later candidates are not contacted.

use crate::overlay::{BoxedStream, RouteTable, Streamer};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tunrelay_core::{PeerId, ProtocolTag, RelayError, RelayResult};

/// Coordinates stream establishment over the overlay.
pub struct StreamBroker {
    routes: Arc<dyn RouteTable>,
    streamer: Arc<dyn Streamer>,
}

impl StreamBroker {
    /// Create a broker over the given route table and stream capability.
    pub fn new(routes: Arc<dyn RouteTable>, streamer: Arc<dyn Streamer>) -> Self {
        Self { routes, streamer }
    }

    /// Open one stream to `peer`: direct if it is a neighbor, through a relay
    /// chain otherwise. Exactly one establishment attempt is made.
    pub async fn open(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream> {
        if self.routes.is_neighbor(&peer) {
            debug!(peer = %peer.short(), tag = %tag, "opening direct stream");
            self.streamer.new_stream(peer, tag).await
        } else {
            debug!(peer = %peer.short(), tag = %tag, "opening relay-chained stream");
            self.streamer.new_relay_stream(peer, tag).await
        }
    }

    /// Walk `candidates` in order and return the first stream that opens,
    /// together with the peer it is bound to.
    ///
    /// # Errors
    ///
    /// [`RelayError::NoRouteAvailable`] once every candidate has failed (or
    /// immediately, for an empty list).
    pub async fn establish(
        &self,
        candidates: &[PeerId],
        tag: ProtocolTag,
    ) -> RelayResult<(BoxedStream, PeerId)> {
        for &peer in candidates {
            match self.open(peer, tag).await {
                Ok(stream) => {
                    info!(peer = %peer.short(), tag = %tag, "stream established");
                    return Ok((stream, peer));
                }
                Err(e) => {
                    warn!(peer = %peer.short(), tag = %tag, error = %e, "candidate failed");
                }
            }
        }

        warn!(tag = %tag, candidates = candidates.len(), "no route available");
        Err(RelayError::NoRouteAvailable)
    }
}
