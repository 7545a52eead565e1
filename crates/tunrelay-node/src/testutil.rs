//! In-memory stand-ins for the overlay and the group resolver.

use crate::groups::GroupResolver;
use crate::overlay::wire::{read_message, write_message};
use crate::overlay::{BoxedStream, RouteTable, Streamer};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tunrelay_core::{ControlRequest, ControlResponse, PeerId, ProtocolTag, RelayError, RelayResult};

pub fn peer(name: &str) -> PeerId {
    PeerId::derive(name.as_bytes())
}

/// One establishment request seen by [`MockOverlay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub peer: PeerId,
    pub tag: ProtocolTag,
    pub relayed: bool,
}

impl Attempt {
    pub fn direct(peer: PeerId, tag: ProtocolTag) -> Self {
        Self { peer, tag, relayed: false }
    }

    pub fn relayed(peer: PeerId, tag: ProtocolTag) -> Self {
        Self { peer, tag, relayed: true }
    }
}

/// Overlay backed by `tokio::io::duplex` pairs.
///
/// Peers that `answers` get a spawned control responder on the far end;
/// peers that `hangs_up` accept the stream and drop it at once; every other
/// reachable peer parks its far end for the test to pick up.
#[derive(Default)]
pub struct MockOverlay {
    neighbors: HashSet<PeerId>,
    known: HashSet<PeerId>,
    failing: HashSet<PeerId>,
    hang_up: HashSet<PeerId>,
    bodies: HashMap<PeerId, String>,
    attempts: Mutex<Vec<Attempt>>,
    requests: Arc<Mutex<Vec<(PeerId, ControlRequest)>>>,
    far_ends: Mutex<HashMap<PeerId, Vec<DuplexStream>>>,
    shutdowns: Arc<AtomicUsize>,
}

impl MockOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn neighbor(mut self, peer: PeerId) -> Self {
        self.neighbors.insert(peer);
        self.known.insert(peer);
        self
    }

    /// Reachable only through a relay chain.
    pub fn remote(mut self, peer: PeerId) -> Self {
        self.known.insert(peer);
        self
    }

    /// Establishment to this peer times out.
    pub fn failing(mut self, peer: PeerId) -> Self {
        self.failing.insert(peer);
        self
    }

    pub fn hangs_up(mut self, peer: PeerId) -> Self {
        self.hang_up.insert(peer);
        self
    }

    pub fn answers(mut self, peer: PeerId, body: &str) -> Self {
        self.bodies.insert(peer, body.to_string());
        self
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Number of handed-out streams the caller has shut down.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(PeerId, ControlRequest)> {
        self.requests.lock().unwrap().clone()
    }

    /// Remote end of the oldest parked stream to `peer`.
    pub fn take_far_end(&self, peer: PeerId) -> Option<DuplexStream> {
        let mut far_ends = self.far_ends.lock().unwrap();
        let parked = far_ends.get_mut(&peer)?;
        if parked.is_empty() {
            None
        } else {
            Some(parked.remove(0))
        }
    }

    fn open(&self, peer: PeerId, tag: ProtocolTag, relayed: bool) -> RelayResult<BoxedStream> {
        self.attempts.lock().unwrap().push(Attempt { peer, tag, relayed });

        if self.failing.contains(&peer) || !self.known.contains(&peer) {
            return Err(RelayError::Timeout);
        }

        let (near, mut far) = tokio::io::duplex(64 * 1024);

        if self.hang_up.contains(&peer) {
            drop(far);
        } else if let Some(body) = self.bodies.get(&peer).cloned() {
            let requests = self.requests.clone();
            tokio::spawn(async move {
                let Ok(request) = read_message::<_, ControlRequest>(&mut far).await else {
                    return;
                };
                requests.lock().unwrap().push((peer, request));
                let _ = write_message(&mut far, &ControlResponse { body }).await;
            });
        } else {
            self.far_ends.lock().unwrap().entry(peer).or_default().push(far);
        }

        Ok(Box::new(Tracked {
            inner: near,
            shutdowns: self.shutdowns.clone(),
        }))
    }
}

/// Near end of a mock stream; counts `shutdown` calls.
struct Tracked {
    inner: DuplexStream,
    shutdowns: Arc<AtomicUsize>,
}

impl AsyncRead for Tracked {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Tracked {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = Pin::new(&mut self.inner).poll_shutdown(cx);
        if result.is_ready() {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
        result
    }
}

impl RouteTable for MockOverlay {
    fn is_neighbor(&self, peer: &PeerId) -> bool {
        self.neighbors.contains(peer)
    }

    fn is_reachable(&self, peer: &PeerId) -> bool {
        self.known.contains(peer)
    }
}

#[async_trait]
impl Streamer for MockOverlay {
    async fn new_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream> {
        self.open(peer, tag, false)
    }

    async fn new_relay_stream(&self, peer: PeerId, tag: ProtocolTag) -> RelayResult<BoxedStream> {
        self.open(peer, tag, true)
    }
}

/// Fixed group table that counts resolutions.
#[derive(Default)]
pub struct StaticResolver {
    groups: HashMap<String, Vec<PeerId>>,
    calls: AtomicUsize,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, name: &str, members: Vec<PeerId>) -> Self {
        self.groups.insert(name.to_string(), members);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GroupResolver for StaticResolver {
    async fn resolve(&self, group: &str) -> RelayResult<Vec<PeerId>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.groups.get(group) {
            Some(members) if !members.is_empty() => Ok(members.clone()),
            _ => Err(RelayError::NoCandidates(group.to_string())),
        }
    }
}
