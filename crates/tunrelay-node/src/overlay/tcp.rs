//! TCP overlay transport.
//!
//! Every stream is its own TCP connection that opens with a [`StreamHeader`].
//! A node that receives a header addressed to itself dispatches the stream to
//! the [`InboundHandler`] registered for the tag. A header addressed to
//! another peer is relayed: the node pops the next hop off the chain, dials
//! it, and splices the two connections together until either side closes.

use super::table::PeerTable;
use super::wire::{read_message, write_message};
use super::{BoxedStream, InboundHandler, RouteTable, Streamer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tunrelay_core::{PeerId, ProtocolTag, RelayError, RelayResult, StreamHeader, PROTOCOL_VERSION};

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Dials peers over TCP and serves inbound overlay streams.
pub struct TcpOverlay {
    /// This node's overlay address.
    local: PeerId,
    /// Known peers and relay routes.
    table: Arc<PeerTable>,
    /// Upper bound on connect + header write for one hop.
    dial_timeout: Duration,
    /// Whether streams addressed to other peers are forwarded.
    relay_enabled: bool,
    /// Handlers for streams that terminate here, by tag.
    handlers: HashMap<ProtocolTag, Arc<dyn InboundHandler>>,
}

impl TcpOverlay {
    pub fn new(
        local: PeerId,
        table: Arc<PeerTable>,
        dial_timeout: Duration,
        relay_enabled: bool,
    ) -> Self {
        Self {
            local,
            table,
            dial_timeout,
            relay_enabled,
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for inbound streams carrying `tag`.
    pub fn with_handler(mut self, tag: ProtocolTag, handler: Arc<dyn InboundHandler>) -> Self {
        self.handlers.insert(tag, handler);
        self
    }

    /// Bind the overlay listener and spawn its accept loop.
    ///
    /// Returns the bound address (useful when binding port 0).
    pub async fn listen(self: Arc<Self>, bind_addr: &str) -> RelayResult<SocketAddr> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RelayError::Transport(format!("overlay bind failed: {e}")))?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, peer = %self.local.short(), "overlay listener started");

        tokio::spawn(async move {
            loop {
                let (stream, remote) = accept_with_backoff(|| listener.accept()).await;
                let overlay = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = overlay.serve_inbound(stream, remote).await {
                        debug!(remote = %remote, error = %e, "inbound stream ended with error");
                    }
                });
            }
        });

        Ok(local_addr)
    }

    /// Read the header of an inbound stream, then terminate or relay it.
    async fn serve_inbound(&self, mut stream: TcpStream, remote: SocketAddr) -> RelayResult<()> {
        let header: StreamHeader = tokio::time::timeout(self.dial_timeout, read_message(&mut stream))
            .await
            .map_err(|_| RelayError::Timeout)??;

        if header.version != PROTOCOL_VERSION {
            return Err(RelayError::InvalidMessage(format!(
                "unsupported overlay version {}",
                header.version
            )));
        }

        if header.target == self.local {
            let Some(handler) = self.handlers.get(&header.tag) else {
                warn!(tag = %header.tag, remote = %remote, "no handler for inbound stream");
                return Ok(());
            };
            debug!(tag = %header.tag, remote = %remote, "inbound stream");
            return handler.handle(Box::new(stream)).await;
        }

        if !self.relay_enabled {
            warn!(
                dest = %header.target.short(),
                remote = %remote,
                "relay disabled, refusing stream"
            );
            return Ok(());
        }

        let (hop, onward_header) = header.next_hop();
        let addr = self.table.neighbor_addr(&hop)?.to_string();
        let mut onward = self.dial(&addr, &onward_header).await?;

        info!(
            tag = %header.tag,
            dest = %header.target.short(),
            hop = %hop.short(),
            "relaying stream"
        );

        match tokio::io::copy_bidirectional(&mut stream, &mut onward).await {
            Ok((up, down)) => debug!(up, down, "relayed stream closed"),
            Err(e) => debug!(error = %e, "relayed stream ended"),
        }
        Ok(())
    }

    /// Connect to `addr` and send `header`, bounded by the dial timeout.
    async fn dial(&self, addr: &str, header: &StreamHeader) -> RelayResult<TcpStream> {
        let connect = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            write_message(&mut stream, header).await?;
            Ok::<_, RelayError>(stream)
        };

        tokio::time::timeout(self.dial_timeout, connect)
            .await
            .map_err(|_| RelayError::Timeout)?
    }
}

impl RouteTable for TcpOverlay {
    fn is_neighbor(&self, peer: &PeerId) -> bool {
        self.table.is_neighbor(peer)
    }

    fn is_reachable(&self, peer: &PeerId) -> bool {
        self.table.is_reachable(peer)
    }
}

#[async_trait]
impl Streamer for TcpOverlay {
    async fn new_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream> {
        let addr = self.table.neighbor_addr(&peer)?.to_string();
        let stream = self.dial(&addr, &StreamHeader::direct(tag, peer)).await?;
        Ok(Box::new(stream))
    }

    async fn new_relay_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream> {
        let chain = self.table.route_to(&peer)?;
        let (first, rest) = chain
            .split_first()
            .ok_or_else(|| RelayError::Transport(format!("empty relay chain to {}", peer.short())))?;

        let addr = self.table.neighbor_addr(first)?.to_string();
        let header = StreamHeader::relayed(tag, peer, rest.to_vec());
        let stream = self.dial(&addr, &header).await?;
        Ok(Box::new(stream))
    }
}

/// Retry `accept` until it yields a connection. Persistent failures such as
/// descriptor exhaustion are logged and retried after [`ACCEPT_RETRY_DELAY`].
async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                error!(error = %e, "overlay accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::table::PeerEntry;
    use crate::overlay::{ControlResponder, DiagnosticsService};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tunrelay_core::{ControlRequest, ControlResponse};

    /// Echoes every byte back until the stream closes.
    struct EchoHandler;

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle(&self, stream: BoxedStream) -> RelayResult<()> {
            let (mut r, mut w) = tokio::io::split(stream);
            tokio::io::copy(&mut r, &mut w).await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn accept_failures_are_retried_after_a_pause() {
        let mut failures = 2;
        let started = tokio::time::Instant::now();
        let conn = accept_with_backoff(|| {
            let result = if failures > 0 {
                failures -= 1;
                Err(std::io::Error::other("too many open files"))
            } else {
                Ok("conn")
            };
            std::future::ready(result)
        })
        .await;

        assert_eq!(conn, "conn");
        assert_eq!(failures, 0);
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY * 2);
    }

    fn id(name: &str) -> PeerId {
        PeerId::derive(name.as_bytes())
    }

    fn neighbor(name: &str, addr: SocketAddr) -> PeerEntry {
        PeerEntry {
            id: id(name),
            addr: Some(addr.to_string()),
            via: None,
        }
    }

    async fn start(overlay: TcpOverlay) -> (Arc<TcpOverlay>, SocketAddr) {
        let overlay = Arc::new(overlay);
        let addr = overlay.clone().listen("127.0.0.1:0").await.unwrap();
        (overlay, addr)
    }

    fn node(name: &str, peers: Vec<PeerEntry>, relay: bool) -> TcpOverlay {
        TcpOverlay::new(
            id(name),
            Arc::new(PeerTable::new(id(name), peers)),
            Duration::from_secs(2),
            relay,
        )
    }

    #[tokio::test]
    async fn direct_control_stream() {
        let (_remote, remote_addr) = start(
            node("remote", vec![], true).with_handler(
                ProtocolTag::Control,
                Arc::new(ControlResponder::new(DiagnosticsService::new(id("remote")))),
            ),
        )
        .await;

        let local = node("local", vec![neighbor("remote", remote_addr)], true);
        let mut stream = local.new_stream(id("remote"), ProtocolTag::Control).await.unwrap();

        write_message(
            &mut stream,
            &ControlRequest {
                pattern: "/test".into(),
                argument: String::new(),
            },
        )
        .await
        .unwrap();
        let resp: ControlResponse = read_message(&mut stream).await.unwrap();
        assert_eq!(resp.body, format!("ok {}", id("remote")));
    }

    #[tokio::test]
    async fn relayed_tunnel_stream() {
        let (_target, target_addr) = start(
            node("target", vec![], true).with_handler(ProtocolTag::TunnelData, Arc::new(EchoHandler)),
        )
        .await;
        let (_relay, relay_addr) = start(node("relay", vec![neighbor("target", target_addr)], true)).await;

        let origin = node(
            "origin",
            vec![
                neighbor("relay", relay_addr),
                PeerEntry {
                    id: id("target"),
                    addr: None,
                    via: Some(id("relay")),
                },
            ],
            true,
        );
        assert!(!origin.is_neighbor(&id("target")));
        assert!(origin.is_reachable(&id("target")));

        let mut stream = origin
            .new_relay_stream(id("target"), ProtocolTag::TunnelData)
            .await
            .unwrap();
        stream.write_all(b"through the relay").await.unwrap();
        let mut buf = [0u8; 17];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the relay");
    }

    #[tokio::test]
    async fn relay_disabled_closes_stream() {
        let (_target, target_addr) = start(
            node("target", vec![], true).with_handler(ProtocolTag::TunnelData, Arc::new(EchoHandler)),
        )
        .await;
        let (_relay, relay_addr) = start(node("relay", vec![neighbor("target", target_addr)], false)).await;

        let origin = node(
            "origin",
            vec![
                neighbor("relay", relay_addr),
                PeerEntry {
                    id: id("target"),
                    addr: None,
                    via: Some(id("relay")),
                },
            ],
            true,
        );

        let mut stream = origin
            .new_relay_stream(id("target"), ProtocolTag::TunnelData)
            .await
            .unwrap();
        let _ = stream.write_all(b"x").await;
        let mut buf = [0u8; 1];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn unreachable_dial_times_out_or_fails() {
        // 192.0.2.0/24 is TEST-NET-1; connects either hang or are refused.
        let addr: SocketAddr = "192.0.2.1:9".parse().unwrap();
        let mut local = node("local", vec![neighbor("remote", addr)], true);
        local.dial_timeout = Duration::from_millis(200);
        assert!(local.new_stream(id("remote"), ProtocolTag::Control).await.is_err());
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let local = node("local", vec![], true);
        assert!(local.new_stream(id("ghost"), ProtocolTag::Control).await.is_err());
        assert!(local
            .new_relay_stream(id("ghost"), ProtocolTag::Control)
            .await
            .is_err());
    }
}
