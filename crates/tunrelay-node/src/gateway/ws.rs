//! Adapts an upgraded WebSocket to the tunnel's client frame types.

use crate::tunnel::ClientFrame;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use tunrelay_core::{RelayError, RelayResult};

fn into_message(frame: ClientFrame) -> Message {
    match frame {
        ClientFrame::Text(text) => Message::Text(text.into()),
        ClientFrame::Binary(bytes) => Message::Binary(bytes.into()),
        ClientFrame::Close => Message::Close(None),
    }
}

/// `None` for control frames the WebSocket layer answers itself.
fn from_message(msg: Result<Message, axum::Error>) -> Option<RelayResult<ClientFrame>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(ClientFrame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(ClientFrame::Binary(bytes.to_vec()))),
        Ok(Message::Close(_)) => Some(Ok(ClientFrame::Close)),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(Err(RelayError::Transport(format!("ws read failed: {e}")))),
    }
}

/// Split `socket` into the sink and stream a tunnel session consumes.
pub fn split(
    socket: WebSocket,
) -> (
    impl Sink<ClientFrame, Error = RelayError> + Send + Unpin + 'static,
    impl Stream<Item = RelayResult<ClientFrame>> + Send + Unpin,
) {
    let (sink, stream): (SplitSink<WebSocket, Message>, SplitStream<WebSocket>) = socket.split();

    let sink = sink
        .sink_map_err(|e| RelayError::Transport(format!("ws send failed: {e}")))
        .with(|frame: ClientFrame| future::ready(Ok::<_, RelayError>(into_message(frame))));
    let stream = stream.filter_map(|msg| future::ready(from_message(msg)));

    (sink, stream)
}
