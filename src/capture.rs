//! Capture packets: the per-packet header stamped by a measurement point
//! and helpers for locating protocol headers inside the captured bytes.

use crate::time::Picotime;
use bytes::{Buf, BufMut};
use std::net::Ipv4Addr;

/// Size of the capture header on disk and on the wire.
pub const CAP_HEADER_SIZE: usize = 36;

/// Attached to each captured packet.
///
/// `nic` identifies the capture interface and `mampid` the measurement
/// point; both are zero-padded ASCII.  `len` is the length of the frame on
/// the link and `caplen` how much of it was kept (`0 < caplen <= len`).
/// Stored in host byte order, both in capture files and inside measurement
/// frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapHeader {
    pub nic: [u8; 8],
    pub mampid: [u8; 8],
    pub ts: Picotime,
    pub len: u32,
    pub caplen: u32,
}

fn copy_padded(src: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let bytes = src.as_bytes();
    let n = bytes.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn trimmed(field: &[u8; 8]) -> &str {
    let len = field.iter().position(|b| *b == 0).unwrap_or(8);
    std::str::from_utf8(&field[..len]).unwrap_or("")
}

impl CapHeader {
    pub fn new(nic: &str, mampid: &str, ts: Picotime, len: u32, caplen: u32) -> CapHeader {
        CapHeader {
            nic: copy_padded(nic),
            mampid: copy_padded(mampid),
            ts,
            len,
            caplen,
        }
    }

    /// Parse a capture header from the front of `buf`.
    /// Returns `None` when fewer than [`CAP_HEADER_SIZE`] bytes are left.
    pub fn parse(mut buf: &[u8]) -> Option<CapHeader> {
        if buf.len() < CAP_HEADER_SIZE {
            return None;
        }
        let mut nic = [0u8; 8];
        let mut mampid = [0u8; 8];
        buf.copy_to_slice(&mut nic);
        buf.copy_to_slice(&mut mampid);
        let sec = buf.get_u32_ne();
        let psec = buf.get_u64_ne();
        let len = buf.get_u32_ne();
        let caplen = buf.get_u32_ne();
        Some(CapHeader {
            nic,
            mampid,
            ts: Picotime { sec, psec },
            len,
            caplen,
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.nic);
        buf.put_slice(&self.mampid);
        buf.put_u32_ne(self.ts.sec);
        buf.put_u64_ne(self.ts.psec);
        buf.put_u32_ne(self.len);
        buf.put_u32_ne(self.caplen);
    }

    pub fn to_bytes(&self) -> [u8; CAP_HEADER_SIZE] {
        let mut out = [0u8; CAP_HEADER_SIZE];
        self.put(&mut &mut out[..]);
        out
    }

    /// Capture interface name with trailing NULs removed.
    pub fn nic(&self) -> &str {
        trimmed(&self.nic)
    }

    /// Measurement point id with trailing NULs removed.
    pub fn mampid(&self) -> &str {
        trimmed(&self.mampid)
    }

    /// Total number of bytes this packet occupies in a stream.
    pub fn packet_size(&self) -> usize {
        CAP_HEADER_SIZE + self.caplen as usize
    }
}

/// A capture packet: header plus a borrowed view of the captured bytes.
///
/// The payload borrow is only valid until the next read/peek/close on the
/// stream that produced it.
#[derive(Clone, Copy, Debug)]
pub struct CapPacket<'a> {
    pub head: CapHeader,
    pub payload: &'a [u8],
}

impl<'a> CapPacket<'a> {
    pub fn new(head: CapHeader, payload: &'a [u8]) -> CapPacket<'a> {
        CapPacket { head, payload }
    }
}

/// Protocol layer, used to limit how deep tools process packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Physical,
    Link,
    Network,
    Transport,
    Application,
}

impl Level {
    pub fn from_str(s: &str) -> Option<Level> {
        match s.to_ascii_lowercase().as_str() {
            "physical" => Some(Level::Physical),
            "link" => Some(Level::Link),
            "network" => Some(Level::Network),
            "transport" => Some(Level::Transport),
            "application" => Some(Level::Application),
            _ => None,
        }
    }
}

pub(crate) const ETHERTYPE_VLAN: u16 = 0x8100;
pub(crate) const ETHERTYPE_IP: u16 = 0x0800;

/// Parsed IPv4 fixed header located inside a captured frame.
#[derive(Clone, Copy, Debug)]
pub struct Ipv4Info {
    /// Offset of the IPv4 header from the start of the frame.
    pub offset: usize,
    /// Header length in bytes.
    pub ihl: usize,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub total_len: u16,
}

impl Ipv4Info {
    /// Offset of the transport header.
    pub fn payload_offset(&self) -> usize {
        self.offset + self.ihl
    }
}

/// Ethertype of the frame, following at most one VLAN tag.
/// Returns `(ethertype, vlan_tci, l3_offset)`.
pub(crate) fn ether_type(frame: &[u8]) -> Option<(u16, Option<u16>, usize)> {
    if frame.len() < 14 {
        return None;
    }
    let h_proto = (&frame[12..14]).get_u16();
    if h_proto != ETHERTYPE_VLAN {
        return Some((h_proto, None, 14));
    }
    if frame.len() < 18 {
        return None;
    }
    let tci = (&frame[14..16]).get_u16();
    let inner = (&frame[16..18]).get_u16();
    Some((inner, Some(tci), 18))
}

/// Locate the IPv4 header, following at most one VLAN tag.
pub fn find_ipv4(frame: &[u8]) -> Option<Ipv4Info> {
    let (h_proto, _, offset) = ether_type(frame)?;
    if h_proto != ETHERTYPE_IP || frame.len() < offset + 20 {
        return None;
    }
    let ip = &frame[offset..];
    let ihl = ((ip[0] & 0x0f) as usize) * 4;
    if ihl < 20 {
        return None;
    }
    Some(Ipv4Info {
        offset,
        ihl,
        proto: ip[9],
        src: Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]),
        dst: Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]),
        total_len: (&ip[2..4]).get_u16(),
    })
}

/// Parsed TCP fixed header.
#[derive(Clone, Copy, Debug)]
pub struct TcpInfo {
    pub sport: u16,
    pub dport: u16,
    pub seq: u32,
    pub doff: usize,
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

/// Locate the TCP header of an IPv4/TCP frame.
pub fn find_tcp(frame: &[u8], ip: &Ipv4Info) -> Option<TcpInfo> {
    if ip.proto != libc::IPPROTO_TCP as u8 {
        return None;
    }
    let offset = ip.payload_offset();
    if frame.len() < offset + 20 {
        return None;
    }
    let tcp = &frame[offset..];
    let flags = tcp[13];
    Some(TcpInfo {
        sport: (&tcp[0..2]).get_u16(),
        dport: (&tcp[2..4]).get_u16(),
        seq: (&tcp[4..8]).get_u32(),
        doff: ((tcp[12] >> 4) as usize) * 4,
        syn: flags & 0x02 != 0,
        ack: flags & 0x10 != 0,
        fin: flags & 0x01 != 0,
        rst: flags & 0x04 != 0,
    })
}

/// Parsed UDP header.
#[derive(Clone, Copy, Debug)]
pub struct UdpInfo {
    pub sport: u16,
    pub dport: u16,
    pub len: u16,
    /// Offset of the UDP payload from the start of the frame.
    pub payload_offset: usize,
}

/// Locate the UDP header of an IPv4/UDP frame.
pub fn find_udp(frame: &[u8], ip: &Ipv4Info) -> Option<UdpInfo> {
    if ip.proto != libc::IPPROTO_UDP as u8 {
        return None;
    }
    let offset = ip.payload_offset();
    if frame.len() < offset + 8 {
        return None;
    }
    let udp = &frame[offset..];
    Some(UdpInfo {
        sport: (&udp[0..2]).get_u16(),
        dport: (&udp[2..4]).get_u16(),
        len: (&udp[4..6]).get_u16(),
        payload_offset: offset + 8,
    })
}

/// Payload size at the given level, excluding that level's headers.
/// Falls back to zero when the packet cannot be interpreted.
pub fn payload_size(level: Level, pkt: &CapPacket) -> usize {
    match level {
        Level::Physical => pkt.head.len as usize,
        Level::Link => (pkt.head.len as usize).saturating_sub(14),
        Level::Network => match find_ipv4(pkt.payload) {
            Some(ip) => (ip.total_len as usize).saturating_sub(ip.ihl),
            None => 0,
        },
        Level::Transport | Level::Application => {
            let Some(ip) = find_ipv4(pkt.payload) else { return 0 };
            if let Some(tcp) = find_tcp(pkt.payload, &ip) {
                (ip.total_len as usize)
                    .saturating_sub(ip.ihl)
                    .saturating_sub(tcp.doff)
            } else if let Some(udp) = find_udp(pkt.payload, &ip) {
                (udp.len as usize).saturating_sub(8)
            } else {
                0
            }
        }
    }
}

/// Layer size at the given level: payload of the level above.
pub fn layer_size(level: Level, pkt: &CapPacket) -> usize {
    match level {
        Level::Physical => 0,
        Level::Link => payload_size(Level::Physical, pkt),
        Level::Network => payload_size(Level::Link, pkt),
        Level::Transport => payload_size(Level::Network, pkt),
        Level::Application => payload_size(Level::Transport, pkt),
    }
}
