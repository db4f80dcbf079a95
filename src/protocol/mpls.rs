use super::{HeaderChunk, NextPayload, Protocol, ProtocolType};
use bytes::Buf;
use std::fmt;

pub(super) static MPLS: MplsProto = MplsProto;
pub(super) static PW: PwProto = PwProto;

/// A 32-bit MPLS label stack entry.
struct LabelEntry {
    label: u32,
    experimental: u8,
    bottom: bool,
    ttl: u8,
}

fn label_entry(data: &[u8]) -> Option<LabelEntry> {
    if data.len() < 4 {
        return None;
    }
    let value = (&data[..4]).get_u32();
    Some(LabelEntry {
        label: value >> 12,
        experimental: ((value >> 9) & 0x7) as u8,
        bottom: value & 0x100 != 0,
        ttl: (value & 0xff) as u8,
    })
}

pub(super) struct MplsProto;

impl Protocol for MplsProto {
    fn name(&self) -> &'static str {
        "MPLS"
    }

    fn size(&self) -> usize {
        4
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        let Some(entry) = label_entry(data) else {
            return NextPayload::truncated();
        };

        // traverse the whole label stack
        if !entry.bottom {
            return NextPayload::advance(ProtocolType::Mpls, 4);
        }

        let Some(first) = data.get(4) else {
            return NextPayload::truncated();
        };

        // no explicit payload type: sniff the first nibble
        let next = match first & 0xf0 {
            0x00 => ProtocolType::Pw, // pseudo-wire control word
            0x40 => ProtocolType::Ipv4,
            0x60 => ProtocolType::Ipv6,
            _ => ProtocolType::Data,
        };
        NextPayload::advance(next, 4)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let Some(entry) = label_entry(header.data()) else {
            return Ok(());
        };
        write!(
            w,
            ": MPLS(label: {}, Exp: {}, S: {}, TTL: {})",
            entry.label, entry.experimental, entry.bottom as u8, entry.ttl
        )
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let Some(entry) = label_entry(header.data()) else {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        };
        writeln!(w, "{prefix}label:              {}", entry.label)?;
        writeln!(w, "{prefix}experimental:       {}", entry.experimental)?;
        writeln!(w, "{prefix}bottom:             {}", if entry.bottom { "yes" } else { "no" })?;
        writeln!(w, "{prefix}TTL:                {}", entry.ttl)
    }
}

/// Pseudo-wire control word (zero nibble, reserved bits, 16-bit sequence).
pub(super) struct PwProto;

impl Protocol for PwProto {
    fn name(&self) -> &'static str {
        "PW"
    }

    fn size(&self) -> usize {
        4
    }

    fn next_payload(&self, _header: &mut HeaderChunk) -> NextPayload {
        // pseudo-wire payload carries a complete Ethernet frame
        NextPayload::advance(ProtocolType::Ethernet, 4)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        if data.len() < 4 {
            return Ok(());
        }
        let value = (&data[..4]).get_u32();
        write!(w, ": PW(seq: {})", value & 0xffff)
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let data = header.data();
        if data.len() < 4 {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let value = (&data[..4]).get_u32();
        writeln!(w, "{prefix}sequence:           {}", value & 0xffff)
    }
}
