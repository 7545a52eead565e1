//! Length-prefixed CBOR framing for overlay stream headers and control messages.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{RelayError, RelayResult};
use std::io::Cursor;

/// Largest accepted frame payload (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1_048_576;

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> RelayResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(value, &mut payload)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(RelayError::InvalidMessage(format!(
            "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
            payload.len()
        )));
    }

    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> RelayResult<T> {
    let cursor = Cursor::new(data);
    let value: T = ciborium::from_reader(cursor)?;
    Ok(value)
}

/// Interpret a length prefix, rejecting oversized frames.
pub fn frame_len(prefix: [u8; LEN_PREFIX]) -> RelayResult<usize> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(RelayError::InvalidMessage(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_SIZE})"
        )));
    }
    Ok(len)
}
