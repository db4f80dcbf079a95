use super::{HeaderChunk, Protocol};
use bytes::Buf;
use std::fmt;

pub(super) static ICMP: IcmpProto = IcmpProto;

pub(super) struct IcmpProto;

fn type_str(icmp_type: u8, code: u8) -> &'static str {
    match icmp_type {
        0 => "echo reply",
        3 => match code {
            0 => "destination network unreachable",
            1 => "destination host unreachable",
            2 => "destination protocol unreachable",
            3 => "destination port unreachable",
            4 => "fragmentation required",
            _ => "destination unreachable",
        },
        4 => "source quench",
        5 => "redirect",
        8 => "echo request",
        11 => "time exceeded",
        13 => "timestamp request",
        14 => "timestamp reply",
        _ => "unknown",
    }
}

impl Protocol for IcmpProto {
    fn name(&self) -> &'static str {
        "ICMP"
    }

    fn size(&self) -> usize {
        8
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": ICMP")?;
        let data = header.data();
        if data.len() < 8 {
            return Ok(());
        }
        write!(
            w,
            ": {} --> {}: {}",
            header.last_net.src,
            header.last_net.dst,
            type_str(data[0], data[1])
        )?;
        if data[0] == 0 || data[0] == 8 {
            write!(
                w,
                " id={} seq={}",
                (&data[4..6]).get_u16(),
                (&data[6..8]).get_u16()
            )?;
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
        if data.len() < 4 {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        writeln!(w, "{prefix}type:               {} ({})", data[0], type_str(data[0], data[1]))?;
        writeln!(w, "{prefix}code:               {}", data[1])?;
        writeln!(w, "{prefix}checksum:           {:#06x}", (&data[2..4]).get_u16())
    }
}
