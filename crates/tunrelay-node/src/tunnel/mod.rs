//! Tunnel sessions between local clients and overlay peers.
//!
//! [`TunnelManager::create_session`] resolves the group, asks the broker for a
//! `tunnel-data` stream, and binds the result to the client connection as a
//! [`TunnelSession`]. The client side is any frame sink/stream pair, so the
//! gateway can hand in a WebSocket and tests can hand in channels.

pub mod session;
pub mod stats;

pub use session::{CloseReason, SessionState, TunnelSession};
pub use stats::TrafficStats;

use crate::groups::GroupResolver;
use crate::overlay::BoxedStream;
use crate::relay::StreamBroker;
use futures_util::{Sink, SinkExt, Stream};
use std::sync::Arc;
use tracing::{debug, warn};
use tunrelay_core::{PacketClassifier, PeerId, ProtocolTag, RelayError, RelayResult};

/// One unit on the client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Creates and runs tunnel sessions.
pub struct TunnelManager {
    resolver: Arc<dyn GroupResolver>,
    broker: Arc<StreamBroker>,
    classifier: Arc<dyn PacketClassifier>,
    stats: Arc<TrafficStats>,
}

impl TunnelManager {
    pub fn new(
        resolver: Arc<dyn GroupResolver>,
        broker: Arc<StreamBroker>,
        classifier: Arc<dyn PacketClassifier>,
        stats: Arc<TrafficStats>,
    ) -> Self {
        Self {
            resolver,
            broker,
            classifier,
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<TrafficStats> {
        &self.stats
    }

    /// Resolve `group`, establish a `tunnel-data` stream, and bind it to the
    /// client `sink`.
    ///
    /// The client connection is closed before an error is returned.
    pub async fn create_session<K>(&self, group: &str, mut sink: K) -> RelayResult<TunnelSession<K>>
    where
        K: Sink<ClientFrame, Error = RelayError> + Send + Unpin + 'static,
    {
        match self.open(group).await {
            Ok((stream, peer)) => Ok(TunnelSession::start(
                group.to_string(),
                peer,
                stream,
                sink,
                self.classifier.clone(),
                self.stats.clone(),
            )),
            Err(e) => {
                warn!(group = %group, error = %e, "tunnel session not established");
                if let Err(close_err) = sink.close().await {
                    debug!(error = %close_err, "client close failed");
                }
                Err(e)
            }
        }
    }

    async fn open(&self, group: &str) -> RelayResult<(BoxedStream, PeerId)> {
        debug!(group = %group, state = ?SessionState::Resolving, "tunnel session");
        let candidates = self.resolver.resolve(group).await?;

        debug!(
            group = %group,
            state = ?SessionState::Establishing,
            candidates = candidates.len(),
            "tunnel session"
        );
        self.broker.establish(&candidates, ProtocolTag::TunnelData).await
    }

    /// Create a session and run it until either side closes.
    pub async fn serve<K, S>(&self, group: &str, sink: K, source: S) -> RelayResult<CloseReason>
    where
        K: Sink<ClientFrame, Error = RelayError> + Send + Unpin + 'static,
        S: Stream<Item = RelayResult<ClientFrame>> + Send + Unpin,
    {
        let session = self.create_session(group, sink).await?;
        debug!(group = %group, state = ?session.state(), "tunnel session bound");
        match session.run(source).await {
            SessionState::Closed(reason) => Ok(reason),
            other => Err(RelayError::Other(format!("session ended in state {other:?}"))),
        }
    }
}
