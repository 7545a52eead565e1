//! tunrelay-core: shared protocol library for the tunnel relay.
//!
//! Provides overlay peer addresses, the stream header and control messages,
//! the length-prefixed CBOR codec, and payload classification.

pub mod codec;
pub mod error;
pub mod messages;
pub mod packet;
pub mod peer;

// Re-export commonly used items at crate root.
pub use codec::{cbor_decode, frame_encode, frame_len, MAX_FRAME_SIZE};
pub use error::{RelayError, RelayResult};
pub use messages::{ControlRequest, ControlResponse, ProtocolTag, StreamHeader, PROTOCOL_VERSION};
pub use packet::{IpClassifier, PacketClassifier, PacketKey};
pub use peer::PeerId;
