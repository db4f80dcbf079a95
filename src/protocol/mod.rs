//! Layered protocol decoding.
//!
//! A process-wide registry maps [`ProtocolType`] to a descriptor which
//! knows the header size, how to find the next payload and how to render
//! itself.  [`HeaderChunk`] walks a captured packet header by header,
//! tracking truncation against the captured bytes.

mod arp;
mod connection;
mod data;
mod dns;
mod ethernet;
mod gtp;
mod icmp;
mod ip;
mod ipv4;
mod ipv6;
mod marker;
mod mpls;
mod sctp;
mod tcp;
mod udp;
mod vlan;

pub use connection::{ConnectionId, ConnectionTable, CONNECTION_ID_NONE};

use crate::capture::{CapHeader, Level};
use std::fmt;
use std::sync::OnceLock;

/// Formatting flag: show additional header information (e.g. header and
/// payload sizes).
pub const FORMAT_HEADER: u32 = 1 << 4;

/// Formatting flag: print a hexdump of the entire packet.
pub const FORMAT_HEXDUMP: u32 = 1 << 3;

/// Identifies a protocol in the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ProtocolType {
    /// Unknown or invalid protocol.
    Unknown = 0,
    /// No more headers, there should not be any more payload.
    Done,
    /// No more headers, the remaining payload is data.
    Data,

    Arp,
    Dns,
    Ethernet,
    Gtp,
    Icmp,
    Ipv4,
    Ipv6,
    Marker,
    Mpls,
    Pw,
    Sctp,
    Tcp,
    Udp,
    Vlan,
}

const NUM_PROTOCOLS: usize = ProtocolType::Vlan as usize + 1;

/// Result of advancing past a header.
///
/// `offset` is relative to the start of the current header; `None` means
/// the decoder could not locate the payload (the packet is truncated).
#[derive(Clone, Copy, Debug)]
pub struct NextPayload {
    pub next: ProtocolType,
    pub offset: Option<usize>,
}

impl NextPayload {
    pub fn advance(next: ProtocolType, offset: usize) -> NextPayload {
        NextPayload {
            next,
            offset: Some(offset),
        }
    }

    /// Stop cleanly without consuming more payload.
    pub fn stop() -> NextPayload {
        NextPayload {
            next: ProtocolType::Done,
            offset: Some(0),
        }
    }

    /// Stop because the captured bytes ran out.
    pub fn truncated() -> NextPayload {
        NextPayload {
            next: ProtocolType::Done,
            offset: None,
        }
    }
}

/// A protocol descriptor.
///
/// `size` is the minimum number of bytes required to parse the header (zero
/// means "parse as much as possible"); `size_dyn` overrides it for
/// variable-length headers.  Descriptors flagged `partial_print` can format
/// truncated packets.
pub trait Protocol: Sync {
    fn name(&self) -> &'static str;

    fn size(&self) -> usize {
        0
    }

    fn size_dyn(&self, _header: &HeaderChunk) -> Option<usize> {
        None
    }

    fn partial_print(&self) -> bool {
        false
    }

    /// Locate the payload following this header.
    fn next_payload(&self, _header: &mut HeaderChunk) -> NextPayload {
        NextPayload::stop()
    }

    /// One-line representation appended to a packet summary.
    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let _ = header;
        write!(w, ": {}", self.name())
    }

    /// Multi-line field dump, each line prefixed with `prefix`.
    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        _header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        writeln!(w, "{prefix}(not implemented)")
    }
}

type Registry = [Option<&'static dyn Protocol>; NUM_PROTOCOLS];

fn register(table: &mut Registry, ty: ProtocolType, proto: &'static dyn Protocol) {
    let slot = &mut table[ty as usize];
    if slot.is_some() {
        panic!("duplicate protocol entry for {ty:?}");
    }
    *slot = Some(proto);
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut table: Registry = [None; NUM_PROTOCOLS];
        register(&mut table, ProtocolType::Done, &data::DONE);
        register(&mut table, ProtocolType::Data, &data::DATA);
        register(&mut table, ProtocolType::Arp, &arp::ARP);
        register(&mut table, ProtocolType::Dns, &dns::DNS);
        register(&mut table, ProtocolType::Ethernet, &ethernet::ETHERNET);
        register(&mut table, ProtocolType::Gtp, &gtp::GTP);
        register(&mut table, ProtocolType::Icmp, &icmp::ICMP);
        register(&mut table, ProtocolType::Ipv4, &ipv4::IPV4);
        register(&mut table, ProtocolType::Ipv6, &ipv6::IPV6);
        register(&mut table, ProtocolType::Marker, &marker::MARKER);
        register(&mut table, ProtocolType::Mpls, &mpls::MPLS);
        register(&mut table, ProtocolType::Pw, &mpls::PW);
        register(&mut table, ProtocolType::Sctp, &sctp::SCTP);
        register(&mut table, ProtocolType::Tcp, &tcp::TCP);
        register(&mut table, ProtocolType::Udp, &udp::UDP);
        register(&mut table, ProtocolType::Vlan, &vlan::VLAN);
        table
    })
}

/// Look up a protocol descriptor.
pub fn protocol_get(ty: ProtocolType) -> Option<&'static dyn Protocol> {
    registry()[ty as usize]
}

/// Printable network-layer context filled in by IPv4/IPv6 so transport
/// decoders can render `host:port -> host:port`.
#[derive(Clone, Debug, Default)]
pub struct NetInfo {
    pub src: String,
    pub dst: String,
    /// Payload size, not including network headers.
    pub plen: usize,
}

/// Walker state for iterating the headers of a captured packet.
pub struct HeaderChunk<'a> {
    cp: &'a CapHeader,
    payload: &'a [u8],
    /// Descriptor of the current header, if positioned.
    pub protocol: Option<&'static dyn Protocol>,
    offset: Option<usize>,
    /// Filled each time a network-layer header is decoded.
    pub last_net: NetInfo,
    /// Set when the captured bytes ran out mid-header.
    pub truncated: bool,
    layer: Level,
}

impl<'a> HeaderChunk<'a> {
    /// Prepare to walk a packet.  `payload` holds the captured bytes
    /// (`caplen` of them); `layer` limits how deep tools should render.
    pub fn new(cp: &'a CapHeader, payload: &'a [u8], layer: Level) -> HeaderChunk<'a> {
        HeaderChunk {
            cp,
            payload,
            protocol: None,
            offset: None,
            last_net: NetInfo::default(),
            truncated: false,
            layer,
        }
    }

    pub fn cp(&self) -> &CapHeader {
        self.cp
    }

    pub fn layer(&self) -> Level {
        self.layer
    }

    /// The bytes of the current header onwards.
    pub fn data(&self) -> &'a [u8] {
        &self.payload[self.offset.unwrap_or(0)..]
    }

    /// Offset of the current header from the start of the packet.
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Declared size of the current header.
    pub fn size(&self) -> usize {
        match self.protocol {
            Some(proto) => proto.size_dyn(self).unwrap_or_else(|| proto.size()),
            None => 0,
        }
    }

    /// Advance to the next header.  Returns `true` while a header is
    /// available; the first call positions at the Ethernet header.
    pub fn walk(&mut self) -> bool {
        let Some(cur) = self.offset else {
            self.protocol = Some(protocol_get(ProtocolType::Ethernet).unwrap());
            self.offset = Some(0);
            if self.data().len() < self.size() {
                self.truncated = true;
            }
            return true;
        };

        let Some(proto) = self.protocol else {
            return false;
        };

        // stop if the previous header was truncated
        if self.truncated {
            return false;
        }

        let np = proto.next_payload(self);
        let Some(delta) = np.offset else {
            self.truncated = true;
            return false;
        };

        if np.next == ProtocolType::Done || np.next == ProtocolType::Unknown {
            self.protocol = protocol_get(ProtocolType::Done);
            return false;
        }

        let Some(next) = protocol_get(np.next) else {
            panic!(
                "invalid protocol type {:?}, make sure the protocol is registered",
                np.next
            );
        };

        let new_offset = cur + delta;
        if delta == 0 || new_offset > self.payload.len() {
            self.truncated = true;
            return false;
        }

        self.offset = Some(new_offset);
        self.protocol = Some(next);

        // ensure there is enough data left for the new header
        if self.data().len() < self.size() {
            self.truncated = true;
        }

        true
    }

    /// Write a one-line representation of the current header.
    pub fn format(&self, w: &mut dyn fmt::Write, flags: u32) -> fmt::Result {
        let Some(proto) = self.protocol else {
            return Ok(());
        };
        if self.truncated && !proto.partial_print() {
            return write!(w, ": {} [Packet size limited during capture]", proto.name());
        }
        proto.format(w, self, flags)
    }

    /// Write a multi-line dump of the current header's fields.
    pub fn dump(&self, w: &mut dyn fmt::Write, prefix: &str, flags: u32) -> fmt::Result {
        let Some(proto) = self.protocol else {
            return Ok(());
        };
        if self.truncated && !proto.partial_print() {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        proto.dump(w, self, prefix, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::testutil::{tcp_frame, udp_frame};
    use crate::time::Picotime;
    use bytes::BufMut;

    fn walk_names(frame: &[u8], caplen: usize) -> (Vec<&'static str>, bool) {
        let head = CapHeader::new("eth0", "mp", Picotime::default(), frame.len() as u32, caplen as u32);
        let mut chunk = HeaderChunk::new(&head, &frame[..caplen], Level::Application);
        let mut names = Vec::new();
        while chunk.walk() {
            names.push(chunk.protocol.unwrap().name());
        }
        (names, chunk.truncated)
    }

    #[test]
    fn walks_udp_packet() {
        let frame = udp_frame(1000, 2000, b"payload");
        let (names, truncated) = walk_names(&frame, frame.len());
        assert_eq!(names, vec!["ethernet", "IPv4", "UDP", "data"]);
        assert!(!truncated);
    }

    #[test]
    fn walks_tcp_packet_without_payload() {
        let frame = tcp_frame(1000, 2000, 1, 0x02, b"");
        let (names, truncated) = walk_names(&frame, frame.len());
        assert_eq!(names, vec!["ethernet", "IPv4", "TCP"]);
        assert!(!truncated);
    }

    #[test]
    fn udp_port_53_routes_to_dns() {
        // headers only; a realistic question section is built in dns tests
        let dns_payload = {
            let mut buf = Vec::new();
            buf.put_u16(0x1234); // id
            buf.put_u16(0x0100); // flags: rd
            buf.put_u16(1); // qdcount
            buf.put_u16(0);
            buf.put_u16(0);
            buf.put_u16(0);
            buf.put_slice(&[3, b'f', b'o', b'o', 0]);
            buf.put_u16(1); // qtype A
            buf.put_u16(1); // qclass IN
            buf
        };
        let frame = udp_frame(4711, 53, &dns_payload);
        let (names, _) = walk_names(&frame, frame.len());
        assert_eq!(names, vec!["ethernet", "IPv4", "UDP", "DNS"]);
    }

    #[test]
    fn truncated_after_ethernet() {
        // 20 bytes: the ethernet header plus 6 bytes of the IPv4 header
        let frame = udp_frame(1, 2, b"0123456789");
        let head = CapHeader::new("eth0", "mp", Picotime::default(), 1500, 20);
        let mut chunk = HeaderChunk::new(&head, &frame[..20], Level::Application);

        assert!(chunk.walk());
        assert_eq!(chunk.protocol.unwrap().name(), "ethernet");
        assert!(!chunk.truncated);

        assert!(chunk.walk());
        assert_eq!(chunk.protocol.unwrap().name(), "IPv4");
        assert!(chunk.truncated);

        assert!(!chunk.walk());
    }

    #[test]
    fn format_marks_truncated_packets() {
        let frame = udp_frame(1, 2, b"0123456789");
        let head = CapHeader::new("eth0", "mp", Picotime::default(), 1500, 20);
        let mut chunk = HeaderChunk::new(&head, &frame[..20], Level::Application);
        chunk.walk();
        chunk.walk();

        let mut out = String::new();
        chunk.format(&mut out, 0).unwrap();
        assert!(out.contains("[Packet size limited during capture]"), "got: {out}");
    }

    #[test]
    fn walk_terminates_on_garbage() {
        // all 0xff: ethertype 0xffff routes to data
        let frame = vec![0xffu8; 64];
        let (names, _) = walk_names(&frame, frame.len());
        assert_eq!(names, vec!["ethernet", "data"]);
    }

    #[test]
    fn registry_is_complete() {
        for ty in [
            ProtocolType::Done,
            ProtocolType::Data,
            ProtocolType::Arp,
            ProtocolType::Dns,
            ProtocolType::Ethernet,
            ProtocolType::Gtp,
            ProtocolType::Icmp,
            ProtocolType::Ipv4,
            ProtocolType::Ipv6,
            ProtocolType::Marker,
            ProtocolType::Mpls,
            ProtocolType::Pw,
            ProtocolType::Sctp,
            ProtocolType::Tcp,
            ProtocolType::Udp,
            ProtocolType::Vlan,
        ] {
            assert!(protocol_get(ty).is_some(), "{ty:?} not registered");
        }
        assert!(protocol_get(ProtocolType::Unknown).is_none());
    }
}
