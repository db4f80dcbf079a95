//! The network-transmittable filter form.
//!
//! Field order and sizes follow the packed structure shipped between
//! consumers and measurement points since filter version 2 (big-endian
//! integers; the pre-0.7 ASCII address fields are transmitted zeroed).

use super::{Filter, FilterMode, FILTER_VERSION};
use crate::address::{StreamAddr, ADDR_WIRE_SIZE};
use crate::error::{Error, Result};
use crate::time::Picotime;
use bytes::{Buf, BufMut};
use std::net::Ipv4Addr;

/// Size of the packed filter.
pub const FILTER_PACKED_SIZE: usize = 216;

/// A filter serialized for the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedFilter(pub [u8; FILTER_PACKED_SIZE]);

fn put_picotime(buf: &mut impl BufMut, t: Picotime) {
    buf.put_u32(t.sec);
    buf.put_u64(t.psec);
}

fn get_picotime(buf: &mut impl Buf) -> Picotime {
    Picotime {
        sec: buf.get_u32(),
        psec: buf.get_u64(),
    }
}

impl Filter {
    /// Serialize into the network form.
    ///
    /// The local-only fields (frame-max-dt, frame numbers, BPF) are not part
    /// of the wire format and are masked out of the transmitted index.
    pub fn pack(&self) -> PackedFilter {
        let mut out = [0u8; FILTER_PACKED_SIZE];
        let mut buf = &mut out[..];

        let wire_index =
            self.index & !(super::index::FRAME_MAX_DT | super::index::FRAME_NUM);

        buf.put_u32(self.filter_id);
        buf.put_u32(wire_index);
        let mut iface = [0u8; 8];
        let bytes = self.iface.as_bytes();
        iface[..bytes.len().min(8)].copy_from_slice(&bytes[..bytes.len().min(8)]);
        buf.put_slice(&iface);
        buf.put_u16(self.vlan_tci);
        buf.put_u16(self.eth_type);
        buf.put_slice(&self.eth_src.0);
        buf.put_slice(&self.eth_dst.0);
        buf.put_u8(self.ip_proto);
        buf.put_slice(&[0u8; 16]); // legacy ASCII ip src
        buf.put_slice(&[0u8; 16]); // legacy ASCII ip dst
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u16(self.vlan_tci_mask);
        buf.put_u16(self.eth_type_mask);
        buf.put_slice(&self.eth_src_mask.0);
        buf.put_slice(&self.eth_dst_mask.0);
        buf.put_slice(&[0u8; 16]); // legacy ASCII ip src mask
        buf.put_slice(&[0u8; 16]); // legacy ASCII ip dst mask
        buf.put_u16(self.src_port_mask);
        buf.put_u16(self.dst_port_mask);
        buf.put_u32(self.consumer);
        buf.put_u32(self.caplen);
        match &self.dest {
            Some(dest) => buf.put_slice(&dest.to_wire()),
            None => buf.put_slice(&[0u8; ADDR_WIRE_SIZE]),
        }
        buf.put_u32(FILTER_VERSION);
        put_picotime(&mut buf, self.starttime);
        put_picotime(&mut buf, self.endtime);
        buf.put_slice(&self.mampid);
        buf.put_slice(&self.ip_src.octets());
        buf.put_slice(&self.ip_src_mask.octets());
        buf.put_slice(&self.ip_dst.octets());
        buf.put_slice(&self.ip_dst_mask.octets());
        buf.put_u16(self.port);
        buf.put_u16(self.port_mask);
        buf.put_u8(match self.mode {
            FilterMode::And => 1,
            FilterMode::Or => 2,
        });
        debug_assert!(buf.is_empty());

        PackedFilter(out)
    }

    /// Deserialize from the network form.
    pub fn unpack(packed: &PackedFilter) -> Result<Filter> {
        let mut buf = &packed.0[..];
        let mut filter = Filter::new();

        filter.filter_id = buf.get_u32();
        filter.index = buf.get_u32();
        let mut iface = [0u8; 8];
        buf.copy_to_slice(&mut iface);
        let len = iface.iter().position(|b| *b == 0).unwrap_or(8);
        filter.iface = String::from_utf8_lossy(&iface[..len]).into_owned();
        filter.vlan_tci = buf.get_u16();
        filter.eth_type = buf.get_u16();
        buf.copy_to_slice(&mut filter.eth_src.0);
        buf.copy_to_slice(&mut filter.eth_dst.0);
        filter.ip_proto = buf.get_u8();
        buf.advance(32); // legacy ASCII addresses
        filter.src_port = buf.get_u16();
        filter.dst_port = buf.get_u16();
        filter.vlan_tci_mask = buf.get_u16();
        filter.eth_type_mask = buf.get_u16();
        buf.copy_to_slice(&mut filter.eth_src_mask.0);
        buf.copy_to_slice(&mut filter.eth_dst_mask.0);
        buf.advance(32); // legacy ASCII masks
        filter.src_port_mask = buf.get_u16();
        filter.dst_port_mask = buf.get_u16();
        filter.consumer = buf.get_u32();
        filter.caplen = buf.get_u32();
        let mut dest = [0u8; ADDR_WIRE_SIZE];
        buf.copy_to_slice(&mut dest);
        filter.dest = StreamAddr::from_wire(&dest)?;
        let version = buf.get_u32();
        if version > FILTER_VERSION {
            return Err(Error::invalid_input(format!(
                "unsupported filter version {version}"
            )));
        }
        filter.starttime = get_picotime(&mut buf);
        filter.endtime = get_picotime(&mut buf);
        buf.copy_to_slice(&mut filter.mampid);
        let mut octets = [0u8; 4];
        buf.copy_to_slice(&mut octets);
        filter.ip_src = Ipv4Addr::from(octets);
        buf.copy_to_slice(&mut octets);
        filter.ip_src_mask = Ipv4Addr::from(octets);
        buf.copy_to_slice(&mut octets);
        filter.ip_dst = Ipv4Addr::from(octets);
        buf.copy_to_slice(&mut octets);
        filter.ip_dst_mask = Ipv4Addr::from(octets);
        filter.port = buf.get_u16();
        filter.port_mask = buf.get_u16();
        filter.mode = match buf.get_u8() {
            2 => FilterMode::Or,
            _ => FilterMode::And,
        };
        debug_assert!(buf.is_empty());

        Ok(filter)
    }
}
