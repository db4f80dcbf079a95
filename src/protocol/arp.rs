use super::{HeaderChunk, Protocol};
use crate::address::EtherAddr;
use bytes::Buf;
use std::fmt;
use std::net::Ipv4Addr;

pub(super) static ARP: ArpProto = ArpProto;

pub(super) struct ArpProto;

const ETHER_ARP_SIZE: usize = 28;
const ARPHRD_ETHER: u16 = 1;

fn op_str(op: u16) -> &'static str {
    match op {
        1 => "ARP Request",
        2 => "ARP Reply",
        3 => "RARP Request",
        4 => "RARP Reply",
        8 => "InARP Request",
        9 => "InARP Reply",
        10 => "ARP NAK",
        _ => "unknown",
    }
}

impl Protocol for ArpProto {
    fn name(&self) -> &'static str {
        "ARP"
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        if data.len() < ETHER_ARP_SIZE {
            return write!(w, ": ARP [Packet size limited during capture]");
        }

        let format = (&data[0..2]).get_u16();
        let op = (&data[6..8]).get_u16();
        write!(w, ": ARP: ")?;

        if format != ARPHRD_ETHER {
            write!(w, "Unknown format: {format}")?;
        } else {
            let sha = EtherAddr(data[8..14].try_into().unwrap());
            let spa = Ipv4Addr::new(data[14], data[15], data[16], data[17]);
            let tpa = Ipv4Addr::new(data[24], data[25], data[26], data[27]);
            match op {
                1 => write!(w, "Request who-has {tpa} tell {spa}")?,
                2 => write!(w, "Reply {spa} is-at {sha}")?,
                3 => write!(w, "RARP request")?,
                4 => write!(w, "RARP reply")?,
                _ => write!(w, "Unknown op: {op}")?,
            }
        }

        write!(w, ", length {}", (header.cp().len as usize).saturating_sub(14))
    }

    fn dump(
        &self,
        w: &mut dyn fmt::Write,
        header: &HeaderChunk,
        prefix: &str,
        _flags: u32,
    ) -> fmt::Result {
        let data = header.data();
        if data.len() < 8 {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let format = (&data[0..2]).get_u16();
        let op = (&data[6..8]).get_u16();
        writeln!(w, "{prefix}ar_hrd:             {format}")?;
        writeln!(w, "{prefix}ar_pro:             {:#06x}", (&data[2..4]).get_u16())?;
        writeln!(w, "{prefix}ar_hln:             {} bytes", data[4])?;
        writeln!(w, "{prefix}ar_pln:             {} bytes", data[5])?;
        writeln!(w, "{prefix}ar_op:              {:#06x} ({})", op, op_str(op))
    }
}
