//! Overlay peer addresses.
//!
//! A [`PeerId`] is a 32-byte opaque address, written as 64 lowercase hex
//! characters. Nothing in the relay inspects its contents.

use crate::error::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a peer address in bytes.
pub const PEER_ID_LEN: usize = 32;

/// Overlay address of a peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; PEER_ID_LEN]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; PEER_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a hex-encoded address. Surrounding whitespace is ignored.
    pub fn parse_hex(s: &str) -> RelayResult<Self> {
        let s = s.trim();
        let raw = hex::decode(s).map_err(|e| RelayError::InvalidPeerId(format!("{s}: {e}")))?;
        let bytes: [u8; PEER_ID_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            RelayError::InvalidPeerId(format!(
                "{s}: expected {PEER_ID_LEN} bytes, got {}",
                raw.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Derive a stable address from arbitrary seed material (SHA-256).
    pub fn derive(seed: &[u8]) -> Self {
        let hash = Sha256::digest(seed);
        let mut bytes = [0u8; PEER_ID_LEN];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = RelayError;

    fn from_str(s: &str) -> RelayResult<Self> {
        Self::parse_hex(s)
    }
}

/// Parse a comma-separated list of hex addresses, as used by the
/// observation-group endpoint. Empty segments are an error.
pub fn parse_peer_list(list: &str) -> RelayResult<Vec<PeerId>> {
    list.split(',').map(PeerId::parse_hex).collect()
}
