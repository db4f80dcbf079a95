use super::{HeaderChunk, Protocol};
use bytes::Buf;
use std::fmt;

pub(super) static SCTP: SctpProto = SctpProto;

pub(super) struct SctpProto;

const COMMON_HEADER: usize = 12;

fn chunk_str(chunk_type: u8) -> &'static str {
    match chunk_type {
        0 => "DATA",
        1 => "INIT",
        2 => "INIT ACK",
        3 => "SACK",
        4 => "HEARTBEAT",
        5 => "HEARTBEAT ACK",
        6 => "ABORT",
        7 => "SHUTDOWN",
        8 => "SHUTDOWN ACK",
        9 => "ERROR",
        10 => "COOKIE ECHO",
        11 => "COOKIE ACK",
        14 => "SHUTDOWN COMPLETE",
        _ => "UNKNOWN",
    }
}

impl Protocol for SctpProto {
    fn name(&self) -> &'static str {
        "SCTP"
    }

    fn size(&self) -> usize {
        COMMON_HEADER
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": SCTP")?;
        let data = header.data();
        if data.len() < COMMON_HEADER {
            return Ok(());
        }
        write!(
            w,
            ": {}:{} --> {}:{} vtag={:#010x}",
            header.last_net.src,
            (&data[0..2]).get_u16(),
            header.last_net.dst,
            (&data[2..4]).get_u16(),
            (&data[4..8]).get_u32()
        )?;

        // walk the chunks that fit inside the captured bytes
        let mut offset = COMMON_HEADER;
        while data.len() >= offset + 4 {
            let chunk_type = data[offset];
            let length = (&data[offset + 2..offset + 4]).get_u16() as usize;
            write!(w, " {}[{}]", chunk_str(chunk_type), length)?;
            if length < 4 {
                break;
            }
            // chunks are padded to four bytes
            offset += (length + 3) & !3;
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
        if data.len() < COMMON_HEADER {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        writeln!(w, "{prefix}source:             {}", (&data[0..2]).get_u16())?;
        writeln!(w, "{prefix}dest:               {}", (&data[2..4]).get_u16())?;
        writeln!(w, "{prefix}vtag:               {:#010x}", (&data[4..8]).get_u32())?;
        writeln!(w, "{prefix}checksum:           {:#010x}", (&data[8..12]).get_u32())
    }
}
