//! One-shot control exchange over the overlay.
//!
//! A call resolves its group once, then for each candidate opens a fresh
//! `control` stream, writes one [`ControlRequest`], reads one
//! [`ControlResponse`], and closes the stream whatever the outcome. Any
//! failure moves on to the next candidate; the first complete round-trip
//! wins. No timeout is applied here: deadlines belong to the stream
//! capability underneath.

use super::broker::StreamBroker;
use crate::groups::GroupResolver;
use crate::overlay::wire::{read_message, write_message};
use crate::overlay::BoxedStream;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use tunrelay_core::{ControlRequest, ControlResponse, PeerId, ProtocolTag, RelayError, RelayResult};

/// Runs control calls for the gateway.
pub struct ControlExchange {
    resolver: Arc<dyn GroupResolver>,
    broker: Arc<StreamBroker>,
}

impl ControlExchange {
    pub fn new(resolver: Arc<dyn GroupResolver>, broker: Arc<StreamBroker>) -> Self {
        Self { resolver, broker }
    }

    /// Send `(pattern, argument)` to a peer serving `group` and return the
    /// response body.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoCandidates`] if the group resolves to nobody.
    /// - [`RelayError::Unavailable`] if every candidate failed.
    pub async fn call(&self, group: &str, pattern: &str, argument: &str) -> RelayResult<String> {
        let candidates = self.resolver.resolve(group).await?;
        let request = ControlRequest {
            pattern: pattern.to_string(),
            argument: argument.to_string(),
        };

        for peer in candidates {
            match self.attempt(peer, &request).await {
                Ok(response) => {
                    info!(
                        group = %group,
                        pattern = %pattern,
                        peer = %peer.short(),
                        "control call answered"
                    );
                    return Ok(response.body);
                }
                Err(e) => {
                    warn!(
                        group = %group,
                        pattern = %pattern,
                        peer = %peer.short(),
                        error = %e,
                        "control candidate failed"
                    );
                }
            }
        }

        Err(RelayError::Unavailable)
    }

    /// One round-trip against one candidate on its own stream.
    async fn attempt(&self, peer: PeerId, request: &ControlRequest) -> RelayResult<ControlResponse> {
        let mut stream = self.broker.open(peer, ProtocolTag::Control).await?;
        let result = exchange(&mut stream, request).await;
        if let Err(e) = stream.shutdown().await {
            debug!(peer = %peer.short(), error = %e, "control stream close failed");
        }
        result
    }
}

async fn exchange(
    stream: &mut BoxedStream,
    request: &ControlRequest,
) -> RelayResult<ControlResponse> {
    write_message(stream, request).await?;
    read_message(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{peer, MockOverlay, StaticResolver};
    use tokio::io::AsyncReadExt;

    fn exchange_over(
        overlay: MockOverlay,
        group: &str,
        members: &[&str],
    ) -> (ControlExchange, Arc<MockOverlay>, Arc<StaticResolver>) {
        let overlay = Arc::new(overlay);
        let members = members.iter().map(|m| peer(m)).collect();
        let resolver = Arc::new(StaticResolver::new().group(group, members));
        let broker = Arc::new(StreamBroker::new(overlay.clone(), overlay.clone()));
        (ControlExchange::new(resolver.clone(), broker), overlay, resolver)
    }

    #[tokio::test]
    async fn no_candidates_contacts_nobody() {
        let (control, overlay, _) = exchange_over(MockOverlay::new(), "vpn", &[]);
        let err = control.call("vpn", "/test", "").await.unwrap_err();
        assert!(matches!(err, RelayError::NoCandidates(_)));
        assert!(overlay.attempts().is_empty());
    }

    #[tokio::test]
    async fn timed_out_candidate_never_sees_request() {
        let (control, overlay, resolver) = exchange_over(
            MockOverlay::new()
                .neighbor(peer("a"))
                .failing(peer("a"))
                .neighbor(peer("b"))
                .answers(peer("b"), "b says hi"),
            "vpn",
            &["a", "b"],
        );

        let body = control.call("vpn", "/test", "").await.unwrap();
        assert_eq!(body, "b says hi");

        let requests = overlay.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, peer("b"));
        assert_eq!(requests[0].1.pattern, "/test");
        assert_eq!(overlay.attempts().len(), 2);
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn nth_candidate_body_is_returned_unchanged() {
        let (control, overlay, _) = exchange_over(
            MockOverlay::new()
                .neighbor(peer("a"))
                .hangs_up(peer("a"))
                .remote(peer("b"))
                .failing(peer("b"))
                .remote(peer("c"))
                .answers(peer("c"), "172.16.0.23"),
            "vpn",
            &["a", "b", "c"],
        );

        let body = control.call("vpn", "/register/pick/ip", "").await.unwrap();
        assert_eq!(body, "172.16.0.23");
        assert_eq!(overlay.attempts().len(), 3);
    }

    #[tokio::test]
    async fn argument_is_forwarded() {
        let (control, overlay, _) = exchange_over(
            MockOverlay::new().neighbor(peer("a")).answers(peer("a"), "OK"),
            "vpn",
            &["a"],
        );

        control
            .call("vpn", "/register/delete/ip", "172.16.0.23")
            .await
            .unwrap();
        let requests = overlay.requests();
        assert_eq!(requests[0].1.argument, "172.16.0.23");
    }

    #[tokio::test]
    async fn all_candidates_failing_is_unavailable() {
        let (control, overlay, _) = exchange_over(
            MockOverlay::new()
                .neighbor(peer("a"))
                .hangs_up(peer("a"))
                .neighbor(peer("b"))
                .failing(peer("b")),
            "vpn",
            &["a", "b"],
        );

        let err = control.call("vpn", "/test", "").await.unwrap_err();
        assert!(matches!(err, RelayError::Unavailable));
        assert_eq!(err.to_string(), "failed");
        assert_eq!(overlay.attempts().len(), 2);
    }

    /// Wait for `control` to park its stream to `peer`.
    async fn far_end(overlay: &MockOverlay, peer: PeerId) -> tokio::io::DuplexStream {
        loop {
            if let Some(far) = overlay.take_far_end(peer) {
                return far;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn stream_is_closed_after_successful_exchange() {
        let (control, overlay, _) =
            exchange_over(MockOverlay::new().neighbor(peer("a")), "vpn", &["a"]);
        let control = Arc::new(control);
        let call = tokio::spawn({
            let control = control.clone();
            async move { control.call("vpn", "/test", "").await }
        });

        let mut far = far_end(&overlay, peer("a")).await;
        let request: ControlRequest = read_message(&mut far).await.unwrap();
        assert_eq!(request.pattern, "/test");
        write_message(&mut far, &ControlResponse { body: "ok".into() }).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
        assert_eq!(call.await.unwrap().unwrap(), "ok");
        assert_eq!(overlay.shutdowns(), 1);
    }

    #[tokio::test]
    async fn stream_is_closed_after_failed_exchange() {
        let (control, overlay, _) =
            exchange_over(MockOverlay::new().neighbor(peer("a")), "vpn", &["a"]);
        let control = Arc::new(control);
        let call = tokio::spawn({
            let control = control.clone();
            async move { control.call("vpn", "/test", "").await }
        });

        let mut far = far_end(&overlay, peer("a")).await;
        let _: ControlRequest = read_message(&mut far).await.unwrap();
        // Well-framed but undecodable response body.
        far.write_all(&[0, 0, 0, 4, 0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(far.read(&mut buf).await.unwrap(), 0);
        assert!(matches!(call.await.unwrap(), Err(RelayError::Unavailable)));
        assert_eq!(overlay.shutdowns(), 1);
    }

    #[tokio::test]
    async fn each_call_uses_a_fresh_stream() {
        let (control, overlay, resolver) = exchange_over(
            MockOverlay::new().neighbor(peer("a")).answers(peer("a"), "pong"),
            "vpn",
            &["a"],
        );

        control.call("vpn", "/test", "").await.unwrap();
        control.call("vpn", "/test", "").await.unwrap();
        assert_eq!(overlay.attempts().len(), 2);
        assert_eq!(overlay.requests().len(), 2);
        assert_eq!(resolver.calls(), 2);
    }
}
