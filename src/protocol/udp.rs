use super::{HeaderChunk, NextPayload, Protocol, ProtocolType};
use crate::marker::{MARKER_MAGIC, MARKER_PORT};
use bytes::Buf;
use std::fmt;

pub(super) static UDP: UdpProto = UdpProto;

pub(super) struct UdpProto;

const HEADER_SIZE: usize = 8;
const PORT_DNS: u16 = 53;
const PORT_GTP_C: u16 = 2123;
const PORT_GTP_U: u16 = 2152;

impl Protocol for UdpProto {
    fn name(&self) -> &'static str {
        "UDP"
    }

    fn size(&self) -> usize {
        HEADER_SIZE
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        if data.len() < HEADER_SIZE {
            return NextPayload::truncated();
        }

        let sport = (&data[0..2]).get_u16();
        let dport = (&data[2..4]).get_u16();
        let payload = &data[HEADER_SIZE..];

        if payload.is_empty() {
            return NextPayload::stop();
        }
        if sport == PORT_DNS || dport == PORT_DNS {
            return NextPayload::advance(ProtocolType::Dns, HEADER_SIZE);
        }
        if sport == PORT_GTP_C || dport == PORT_GTP_C || sport == PORT_GTP_U || dport == PORT_GTP_U
        {
            return NextPayload::advance(ProtocolType::Gtp, HEADER_SIZE);
        }
        if sport == MARKER_PORT && payload.len() >= 4 && (&payload[..4]).get_u32() == MARKER_MAGIC {
            return NextPayload::advance(ProtocolType::Marker, HEADER_SIZE);
        }
        NextPayload::advance(ProtocolType::Data, HEADER_SIZE)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, flags: u32) -> fmt::Result {
        write!(w, ": UDP")?;
        let data = header.data();
        if data.len() < HEADER_SIZE {
            return write!(w, " [Packet size limited during capture]");
        }

        let total = (&data[4..6]).get_u16() as usize;
        if flags & crate::protocol::FORMAT_HEADER != 0 {
            write!(
                w,
                "(HDR[{HEADER_SIZE}]DATA[{}])",
                total.saturating_sub(HEADER_SIZE)
            )?;
        }
        write!(
            w,
            ": {}:{} --> {}:{}",
            header.last_net.src,
            (&data[0..2]).get_u16(),
            header.last_net.dst,
            (&data[2..4]).get_u16()
        )?;
        write!(
            w,
            " len={} check={}",
            total,
            (&data[6..8]).get_u16()
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
        if data.len() < HEADER_SIZE {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        writeln!(w, "{prefix}source:             {}", (&data[0..2]).get_u16())?;
        writeln!(w, "{prefix}dest:               {}", (&data[2..4]).get_u16())?;
        writeln!(w, "{prefix}len:                {}", (&data[4..6]).get_u16())?;
        writeln!(w, "{prefix}check:              {}", (&data[6..8]).get_u16())
    }
}
