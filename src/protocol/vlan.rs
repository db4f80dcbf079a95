use super::ethernet::ethertype_next;
use super::{HeaderChunk, NextPayload, Protocol};
use bytes::Buf;
use std::fmt;

pub(super) static VLAN: VlanProto = VlanProto;

pub(super) struct VlanProto;

impl Protocol for VlanProto {
    fn name(&self) -> &'static str {
        "vlan"
    }

    fn size(&self) -> usize {
        4
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        if data.len() < 4 {
            return NextPayload::truncated();
        }
        let h_proto = (&data[2..4]).get_u16();
        NextPayload::advance(ethertype_next(h_proto), 4)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        if data.len() < 2 {
            return Ok(());
        }
        let tci = (&data[0..2]).get_u16();
        write!(w, ": 802.1Q vlan# {}", tci & 0x0fff)
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let data = header.data();
        if data.len() < 2 {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let tci = (&data[0..2]).get_u16();
        writeln!(w, "{prefix}TCI:                {tci:#06x}")?;
        writeln!(w, "{prefix}PCP:                {}", (tci & 0xe000) >> 13)?;
        writeln!(w, "{prefix}DEI/CFI:            {}", (tci & 0x1000) >> 12)?;
        writeln!(w, "{prefix}VID:                {}", tci & 0x0fff)
    }
}
