//! Async framing over overlay streams.
//!
//! Same wire format as [`tunrelay_core::codec`]: a 4-byte big-endian length
//! followed by a CBOR payload. Reads consume exactly one frame, so whatever
//! follows on the stream is left untouched.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tunrelay_core::codec::LEN_PREFIX;
use tunrelay_core::{cbor_decode, frame_encode, frame_len, RelayError, RelayResult};

/// Write one framed message and flush.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> RelayResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: serde::Serialize,
{
    let frame = frame_encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one framed message.
///
/// A stream that ends before a full frame arrives is a transport error.
pub async fn read_message<R, T>(reader: &mut R) -> RelayResult<T>
where
    R: AsyncRead + Unpin + ?Sized,
    T: serde::de::DeserializeOwned,
{
    let mut prefix = [0u8; LEN_PREFIX];
    reader.read_exact(&mut prefix).await.map_err(eof_as_transport)?;
    let len = frame_len(prefix)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(eof_as_transport)?;
    cbor_decode(&payload)
}

fn eof_as_transport(e: std::io::Error) -> RelayError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        RelayError::Transport("stream closed mid-frame".into())
    } else {
        RelayError::Io(e)
    }
}
