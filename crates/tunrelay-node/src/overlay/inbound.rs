//! Handlers for overlay streams that terminate at this node.
//!
//! The TCP overlay reads the stream header, then hands the rest of the stream
//! to the [`InboundHandler`] registered for the header's tag.

use super::wire::{read_message, write_message};
use super::BoxedStream;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tunrelay_core::messages::patterns;
use tunrelay_core::{ControlRequest, ControlResponse, PeerId, RelayResult};

/// Serves one inbound stream after its header has been consumed.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, stream: BoxedStream) -> RelayResult<()>;
}

/// Produces the response body for a control request.
#[async_trait]
pub trait ControlService: Send + Sync {
    async fn respond(&self, request: &ControlRequest) -> String;
}

/// Answers control streams: one request in, one response out, then close.
pub struct ControlResponder<S> {
    service: S,
}

impl<S: ControlService> ControlResponder<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: ControlService> InboundHandler for ControlResponder<S> {
    async fn handle(&self, mut stream: BoxedStream) -> RelayResult<()> {
        let request: ControlRequest = read_message(&mut stream).await?;
        debug!(pattern = %request.pattern, "control request");

        let body = self.service.respond(&request).await;
        write_message(&mut stream, &ControlResponse { body }).await?;
        let _ = stream.shutdown().await;
        Ok(())
    }
}

/// Diagnostic responder. Answers `/test` with this node's address; address
/// leasing belongs to a dedicated terminator, so every other pattern is
/// reported as unsupported.
pub struct DiagnosticsService {
    local: PeerId,
}

impl DiagnosticsService {
    pub fn new(local: PeerId) -> Self {
        Self { local }
    }
}

#[async_trait]
impl ControlService for DiagnosticsService {
    async fn respond(&self, request: &ControlRequest) -> String {
        match request.pattern.as_str() {
            patterns::TEST => format!("ok {}", self.local),
            other => format!("unsupported pattern {other}"),
        }
    }
}
