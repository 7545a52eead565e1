//! Tunnel session: one client connection bound to one overlay stream.
//!
//! Two forwarding loops run for the life of the session:
//!
//! - **Uplink** (client→overlay) runs on the task that owns the session via
//!   [`TunnelSession::run`]. Text frames are echoed back to the client as a
//!   liveness channel; binary frames with a source key are written verbatim
//!   to the overlay stream; keyless binary frames are dropped.
//! - **Downlink** (overlay→client) is spawned when the session becomes
//!   active. It reads into one fixed buffer, and each read that carries a
//!   destination key is sent to the client as one binary frame.
//!
//! When either loop ends the session tears down both sides: the overlay
//! write half is shut down, the downlink task is stopped and joined, and the
//! client connection is closed. The downlink honours the stop signal while
//! reading and while a client write is pending.

use super::stats::TrafficStats;
use super::ClientFrame;
use crate::overlay::BoxedStream;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use tunrelay_core::{PacketClassifier, PeerId, RelayError, RelayResult};

/// Downlink read buffer (64 KiB), reused for every read.
pub const DOWNLINK_BUFFER_SIZE: usize = 64 * 1024;

/// Lifecycle of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Establishing,
    Active,
    Closed(CloseReason),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Client sent a close frame or disconnected.
    ClientClosed,
    /// Reading from or writing to the client failed.
    ClientError(String),
    /// Overlay stream reached EOF.
    OverlayClosed,
    /// Reading from or writing to the overlay stream failed.
    OverlayError(String),
}

/// An active session. Consumed by [`TunnelSession::run`].
pub struct TunnelSession<K> {
    group: String,
    peer: PeerId,
    state: SessionState,
    sink: Arc<Mutex<K>>,
    uplink: WriteHalf<BoxedStream>,
    downlink: JoinHandle<CloseReason>,
    /// Tells the downlink to stop.
    stop_tx: Option<oneshot::Sender<()>>,
    /// Fires when the downlink ends by itself.
    downlink_done: oneshot::Receiver<()>,
    classifier: Arc<dyn PacketClassifier>,
    stats: Arc<TrafficStats>,
}

impl<K> TunnelSession<K>
where
    K: Sink<ClientFrame, Error = RelayError> + Send + Unpin + 'static,
{
    /// Bind `stream` to the client `sink` and start the downlink task.
    pub fn start(
        group: String,
        peer: PeerId,
        stream: BoxedStream,
        sink: K,
        classifier: Arc<dyn PacketClassifier>,
        stats: Arc<TrafficStats>,
    ) -> Self {
        let (reader, uplink) = tokio::io::split(stream);
        let sink = Arc::new(Mutex::new(sink));
        let (stop_tx, stop_rx) = oneshot::channel();
        let (done_tx, downlink_done) = oneshot::channel();

        let downlink = tokio::spawn(downlink(
            reader,
            sink.clone(),
            classifier.clone(),
            stats.clone(),
            stop_rx,
            done_tx,
        ));

        info!(group = %group, peer = %peer.short(), "tunnel session active");

        Self {
            group,
            peer,
            state: SessionState::Active,
            sink,
            uplink,
            downlink,
            stop_tx: Some(stop_tx),
            downlink_done,
            classifier,
            stats,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the uplink loop until either side ends, then tear down both.
    pub async fn run<S>(mut self, mut source: S) -> SessionState
    where
        S: Stream<Item = RelayResult<ClientFrame>> + Send + Unpin,
    {
        let mut downlink_ended = false;
        let reason = loop {
            let frame = tokio::select! {
                _ = &mut self.downlink_done => {
                    downlink_ended = true;
                    break CloseReason::OverlayClosed;
                }
                frame = source.next() => frame,
            };

            match frame {
                None | Some(Ok(ClientFrame::Close)) => break CloseReason::ClientClosed,
                Some(Err(e)) => {
                    debug!(group = %self.group, error = %e, "client read failed");
                    break CloseReason::ClientError(e.to_string());
                }
                Some(Ok(ClientFrame::Text(text))) => {
                    let mut sink = self.sink.lock().await;
                    if let Err(e) = sink.send(ClientFrame::Text(text)).await {
                        break CloseReason::ClientError(e.to_string());
                    }
                }
                Some(Ok(ClientFrame::Binary(packet))) => {
                    if let Err(reason) = self.forward_uplink(&packet).await {
                        break reason;
                    }
                }
            }
        };

        self.teardown(reason, downlink_ended).await
    }

    async fn forward_uplink(&mut self, packet: &[u8]) -> Result<(), CloseReason> {
        let Some(key) = self.classifier.source_key(packet) else {
            trace!(len = packet.len(), "uplink packet without source key dropped");
            return Ok(());
        };

        if let Err(e) = self.uplink.write_all(packet).await {
            warn!(group = %self.group, key = %key, error = %e, "overlay write failed");
            return Err(CloseReason::OverlayError(e.to_string()));
        }
        self.stats.record_uplink(packet.len());
        Ok(())
    }

    async fn teardown(mut self, reason: CloseReason, downlink_ended: bool) -> SessionState {
        if let Err(e) = self.uplink.shutdown().await {
            debug!(error = %e, "overlay shutdown failed");
        }

        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        let downlink_reason = match self.downlink.await {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(error = %e, "downlink task failed");
                None
            }
        };

        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "client close failed");
        }

        // A downlink that stopped on its own knows the overlay-side cause.
        let reason = match (downlink_ended, downlink_reason) {
            (true, Some(r)) => r,
            _ => reason,
        };

        info!(
            group = %self.group,
            peer = %self.peer.short(),
            reason = ?reason,
            "tunnel session closed"
        );
        self.state = SessionState::Closed(reason);
        self.state
    }
}

/// Overlay→client loop.
async fn downlink<K>(
    mut reader: ReadHalf<BoxedStream>,
    sink: Arc<Mutex<K>>,
    classifier: Arc<dyn PacketClassifier>,
    stats: Arc<TrafficStats>,
    mut stop_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<()>,
) -> CloseReason
where
    K: Sink<ClientFrame, Error = RelayError> + Send + Unpin + 'static,
{
    let mut buf = vec![0u8; DOWNLINK_BUFFER_SIZE];

    let reason = loop {
        let result = tokio::select! {
            _ = &mut stop_rx => return CloseReason::ClientClosed,
            result = reader.read(&mut buf) => result,
        };

        match result {
            Ok(0) => break CloseReason::OverlayClosed,
            Ok(n) => {
                let packet = &buf[..n];
                if classifier.destination_key(packet).is_none() {
                    trace!(len = n, "downlink packet without destination key dropped");
                    continue;
                }
                // A client that stops reading must not block the stop signal.
                let frame = ClientFrame::Binary(packet.to_vec());
                let sent = tokio::select! {
                    _ = &mut stop_rx => return CloseReason::ClientClosed,
                    sent = async { sink.lock().await.send(frame).await } => sent,
                };
                if let Err(e) = sent {
                    warn!(error = %e, "client write failed");
                    break CloseReason::ClientError(e.to_string());
                }
                stats.record_downlink(n);
            }
            Err(e) => {
                debug!(error = %e, "overlay read failed");
                break CloseReason::OverlayError(e.to_string());
            }
        }
    };

    let _ = done_tx.send(());
    reason
}
