//! Experiment markers.
//!
//! A marker is a distinguished UDP packet used to delimit experiment runs or
//! to terminate a capture.  It is sent from [`MARKER_PORT`] and carries a
//! fixed 90-byte body beginning with [`MARKER_MAGIC`].

use crate::capture::{find_ipv4, find_udp, CapPacket};
use bytes::Buf;

/// Source port markers are sent from.
pub const MARKER_PORT: u16 = 0x0811;

/// Magic opening the marker body (big-endian on the wire).
pub const MARKER_MAGIC: u32 = 0x9f7a3c83;

/// Size of the marker body.
pub const MARKER_SIZE: usize = 90;

/// Flag bit: close the current file and stop saving packets until the next
/// marker arrives.
pub const MARKER_TERMINATE: u8 = 1;

/// Decoded marker body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Marker {
    pub version: u8,
    pub flags: u8,
    pub reserved: u16,
    pub exp_id: u32,
    pub run_id: u32,
    pub key_id: u32,
    pub seq_num: u32,
    pub timestamp: u64,
    pub comment: [u8; 64],
}

impl Marker {
    /// Decode a marker from a UDP payload.  Returns `None` if the payload
    /// is too short or the magic does not match.
    pub fn from_udp_payload(mut payload: &[u8]) -> Option<Marker> {
        if payload.len() < MARKER_SIZE {
            return None;
        }
        if payload.get_u32() != MARKER_MAGIC {
            return None;
        }
        let version = payload.get_u8();
        let flags = payload.get_u8();
        let reserved = payload.get_u16();
        let exp_id = payload.get_u32();
        let run_id = payload.get_u32();
        let key_id = payload.get_u32();
        let seq_num = payload.get_u32();
        let timestamp = payload.get_u64();
        let mut comment = [0u8; 64];
        payload.copy_to_slice(&mut comment);
        Some(Marker {
            version,
            flags,
            reserved,
            exp_id,
            run_id,
            key_id,
            seq_num,
            timestamp,
            comment,
        })
    }

    pub fn comment(&self) -> &str {
        let len = self.comment.iter().position(|b| *b == 0).unwrap_or(64);
        std::str::from_utf8(&self.comment[..len]).unwrap_or("")
    }

    pub fn terminate(&self) -> bool {
        self.flags & MARKER_TERMINATE != 0
    }
}

/// Test whether a captured packet is a marker.
///
/// A packet is a marker iff it is IPv4/UDP, sent from [`MARKER_PORT`], its
/// destination port equals `port` (zero matches any port, but for reliable
/// usage a port should always be given) and the payload starts with the
/// marker magic.  Returns the destination port the marker was seen on.
pub fn is_marker(pkt: &CapPacket, port: u16) -> Option<(u16, Marker)> {
    let ip = find_ipv4(pkt.payload)?;
    let udp = find_udp(pkt.payload, &ip)?;

    if udp.sport != MARKER_PORT || (port != 0 && udp.dport != port) {
        return None;
    }

    let marker = Marker::from_udp_payload(&pkt.payload[udp.payload_offset..])?;
    Some((udp.dport, marker))
}
