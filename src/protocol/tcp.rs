use super::{HeaderChunk, NextPayload, Protocol, ProtocolType};
use bytes::Buf;
use std::fmt;

pub(super) static TCP: TcpProto = TcpProto;

pub(super) struct TcpProto;

const FIXED_HEADER: usize = 20;
const PORT_DNS: u16 = 53;

fn flag_str(flags: u8) -> String {
    let mut out = String::new();
    if flags & 0x02 != 0 {
        out.push('S');
    }
    if flags & 0x01 != 0 {
        out.push('F');
    }
    if flags & 0x10 != 0 {
        out.push('A');
    }
    if flags & 0x08 != 0 {
        out.push('P');
    }
    if flags & 0x20 != 0 {
        out.push('U');
    }
    if flags & 0x04 != 0 {
        out.push('R');
    }
    out
}

impl Protocol for TcpProto {
    fn name(&self) -> &'static str {
        "TCP"
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        if data.len() < FIXED_HEADER {
            return NextPayload::truncated();
        }

        let sport = (&data[0..2]).get_u16();
        let dport = (&data[2..4]).get_u16();
        let header_size = ((data[12] >> 4) as usize) * 4;
        if header_size < FIXED_HEADER {
            return NextPayload::truncated();
        }

        let payload_size = header.last_net.plen.saturating_sub(header_size);
        if payload_size == 0 {
            return NextPayload::stop();
        }
        if sport == PORT_DNS || dport == PORT_DNS {
            // a DNS message over TCP is prefixed with its length
            return NextPayload::advance(ProtocolType::Dns, header_size + 2);
        }
        NextPayload::advance(ProtocolType::Data, header_size)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, flags: u32) -> fmt::Result {
        write!(w, ": TCP")?;
        let data = header.data();
        if data.len() < FIXED_HEADER {
            return write!(w, " [Packet size limited during capture]");
        }

        let header_size = ((data[12] >> 4) as usize) * 4;
        let payload_size = header.last_net.plen.saturating_sub(header_size);
        if flags & crate::protocol::FORMAT_HEADER != 0 {
            write!(w, "(HDR[{header_size}]DATA[{payload_size}])")?;
        }

        let sport = (&data[0..2]).get_u16();
        let dport = (&data[2..4]).get_u16();
        write!(
            w,
            ": [{}] {}:{} --> {}:{}",
            flag_str(data[13]),
            header.last_net.src,
            sport,
            header.last_net.dst,
            dport
        )?;
        write!(
            w,
            " ws={} seq={} ack={}",
            (&data[14..16]).get_u16(),
            (&data[4..8]).get_u32(),
            (&data[8..12]).get_u32()
        )
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let data = header.data();
        if data.len() < FIXED_HEADER {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let flags = data[13];
        writeln!(w, "{prefix}source:             {}", (&data[0..2]).get_u16())?;
        writeln!(w, "{prefix}dest:               {}", (&data[2..4]).get_u16())?;
        writeln!(w, "{prefix}seq:                {}", (&data[4..8]).get_u32())?;
        writeln!(w, "{prefix}seq_ack:            {}", (&data[8..12]).get_u32())?;
        writeln!(w, "{prefix}doff:               {}", data[12] >> 4)?;
        writeln!(w, "{prefix}syn:                {}", (flags >> 1) & 1)?;
        writeln!(w, "{prefix}ack:                {}", (flags >> 4) & 1)?;
        writeln!(w, "{prefix}fin:                {}", flags & 1)?;
        writeln!(w, "{prefix}rst:                {}", (flags >> 2) & 1)?;
        writeln!(w, "{prefix}window:             {}", (&data[14..16]).get_u16())?;
        writeln!(w, "{prefix}check:              {:#06x}", (&data[16..18]).get_u16())?;
        writeln!(w, "{prefix}urg:                {}", (&data[18..20]).get_u16())
    }
}
