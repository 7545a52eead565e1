//! Payload classification for tunnel traffic.
//!
//! The forwarding loops only ask one question of each payload: does it carry a
//! recognizable source (uplink) or destination (downlink) key? The answer
//! decides forward vs. drop and nothing else is remembered.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Flow identity extracted from a payload, used only for filtering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PacketKey(String);

impl PacketKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PacketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extracts flow keys from raw tunnel payloads.
pub trait PacketClassifier: Send + Sync {
    /// Key of a payload travelling from the client into the overlay.
    fn source_key(&self, payload: &[u8]) -> Option<PacketKey>;

    /// Key of a payload travelling from the overlay back to the client.
    fn destination_key(&self, payload: &[u8]) -> Option<PacketKey>;
}

const IPV4_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;

/// Classifier for bare IPv4/IPv6 packets (no link-layer framing).
///
/// The source key is `"src->dst"`; the destination key is the reverse
/// direction `"dst->src"`, so a reply packet maps onto the key of the request
/// that caused it.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpClassifier;

/// Source and destination address of an IP packet, as text.
fn addresses(packet: &[u8]) -> Option<(String, String)> {
    let version = packet.first()? >> 4;
    match version {
        4 if packet.len() >= IPV4_HEADER_LEN => {
            let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
            let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
            Some((src.to_string(), dst.to_string()))
        }
        6 if packet.len() >= IPV6_HEADER_LEN => {
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&packet[8..24]);
            dst.copy_from_slice(&packet[24..40]);
            Some((
                Ipv6Addr::from(src).to_string(),
                Ipv6Addr::from(dst).to_string(),
            ))
        }
        _ => None,
    }
}

impl PacketClassifier for IpClassifier {
    fn source_key(&self, payload: &[u8]) -> Option<PacketKey> {
        addresses(payload).map(|(src, dst)| PacketKey(format!("{src}->{dst}")))
    }

    fn destination_key(&self, payload: &[u8]) -> Option<PacketKey> {
        addresses(payload).map(|(src, dst)| PacketKey(format!("{dst}->{src}")))
    }
}

/// Minimal IPv4 header for tests and diagnostics: 20 bytes, no options,
/// followed by `payload`. `None` if the total length does not fit in 16 bits.
pub fn ipv4_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Option<Vec<u8>> {
    let total = u16::try_from(IPV4_HEADER_LEN + payload.len()).ok()?;
    let mut packet = vec![0u8; IPV4_HEADER_LEN];
    packet[0] = 0x45; // Version 4, IHL 5
    packet[2..4].copy_from_slice(&total.to_be_bytes());
    packet[8] = 64; // TTL
    packet[9] = 17; // UDP
    packet[12..16].copy_from_slice(&src.octets());
    packet[16..20].copy_from_slice(&dst.octets());
    packet.extend_from_slice(payload);
    Some(packet)
}
