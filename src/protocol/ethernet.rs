use super::{HeaderChunk, NextPayload, Protocol, ProtocolType};
use crate::address::EtherAddr;
use crate::wire::ETH_HEADER_SIZE;
use bytes::Buf;
use std::fmt;

pub(super) const ETHERTYPE_ARP: u16 = 0x0806;
pub(super) const ETHERTYPE_VLAN: u16 = 0x8100;
pub(super) const ETHERTYPE_IP: u16 = 0x0800;
pub(super) const ETHERTYPE_IPV6: u16 = 0x86dd;
pub(super) const ETHERTYPE_MPLS_UC: u16 = 0x8847;
pub(super) const ETHERTYPE_MPLS_MC: u16 = 0x8848;

/// Map an ethertype to the protocol decoding its payload.
pub(super) fn ethertype_next(ethertype: u16) -> ProtocolType {
    match ethertype {
        ETHERTYPE_ARP => ProtocolType::Arp,
        ETHERTYPE_VLAN => ProtocolType::Vlan,
        ETHERTYPE_IP => ProtocolType::Ipv4,
        ETHERTYPE_IPV6 => ProtocolType::Ipv6,
        ETHERTYPE_MPLS_UC | ETHERTYPE_MPLS_MC => ProtocolType::Mpls,
        _ => ProtocolType::Data,
    }
}

pub(super) static ETHERNET: EthernetProto = EthernetProto;

pub(super) struct EthernetProto;

impl Protocol for EthernetProto {
    fn name(&self) -> &'static str {
        "ethernet"
    }

    fn size(&self) -> usize {
        ETH_HEADER_SIZE
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        if data.len() < ETH_HEADER_SIZE {
            return NextPayload::truncated();
        }
        let h_proto = (&data[12..14]).get_u16();
        NextPayload::advance(ethertype_next(h_proto), ETH_HEADER_SIZE)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        if data.len() < ETH_HEADER_SIZE {
            return Ok(());
        }
        let h_proto = (&data[12..14]).get_u16();

        // lengths below 0x05DC are IEEE 802.3 with an LLC PDU
        if h_proto < 0x05dc {
            let src = EtherAddr(data[6..12].try_into().unwrap());
            let dst = EtherAddr(data[0..6].try_into().unwrap());
            write!(w, ": IEEE802.3 [{h_proto:#06x}] {src} -> {dst}")?;
        }
        Ok(())
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let data = header.data();
        if data.len() < ETH_HEADER_SIZE {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let src = EtherAddr(data[6..12].try_into().unwrap());
        let dst = EtherAddr(data[0..6].try_into().unwrap());
        let h_proto = (&data[12..14]).get_u16();
        writeln!(w, "{prefix}h_source:           {src}")?;
        writeln!(w, "{prefix}h_dest:             {dst}")?;
        writeln!(w, "{prefix}h_proto:            {h_proto:#06x}")
    }
}
