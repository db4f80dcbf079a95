use super::ip::ipproto_next;
use super::{HeaderChunk, NextPayload, Protocol};
use bytes::Buf;
use std::fmt;
use std::net::Ipv4Addr;

pub(super) static IPV4: Ipv4Proto = Ipv4Proto;

pub(super) struct Ipv4Proto;

fn addrs(data: &[u8]) -> (Ipv4Addr, Ipv4Addr) {
    (
        Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        Ipv4Addr::new(data[16], data[17], data[18], data[19]),
    )
}

impl Protocol for Ipv4Proto {
    fn name(&self) -> &'static str {
        "IPv4"
    }

    fn size(&self) -> usize {
        20
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        if data.len() < 20 {
            return NextPayload::truncated();
        }
        let ihl = ((data[0] & 0x0f) as usize) * 4;
        if ihl < 20 || data.len() < ihl {
            return NextPayload::truncated();
        }

        let total_len = (&data[2..4]).get_u16() as usize;
        let proto = data[9];
        let (src, dst) = addrs(data);
        header.last_net.src = src.to_string();
        header.last_net.dst = dst.to_string();
        header.last_net.plen = total_len.saturating_sub(ihl);

        NextPayload::advance(ipproto_next(proto), ihl)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": {}", self.name())?;
        let data = header.data();
        if data.len() >= 10 && ipproto_next(data[9]) == super::ProtocolType::Data {
            write!(w, " [ip_p={:#04x}]", data[9])?;
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
        if data.len() < 20 {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let ihl = (data[0] & 0x0f) as usize;
        let off = (&data[6..8]).get_u16();
        let (src, dst) = addrs(data);
        writeln!(w, "{prefix}ip_v:               {}", data[0] >> 4)?;
        writeln!(w, "{prefix}ip_hl:              {} ({} octets)", ihl, ihl * 4)?;
        writeln!(w, "{prefix}ip_tos:             {}", data[1])?;
        writeln!(w, "{prefix}ip_len:             {}", (&data[2..4]).get_u16())?;
        writeln!(w, "{prefix}ip_id:              {}", (&data[4..6]).get_u16())?;
        writeln!(w, "{prefix}ip_off:             {:#06x}", off)?;
        writeln!(w, "{prefix}  DF:               {}", if off & 0x4000 != 0 { "yes" } else { "no" })?;
        writeln!(w, "{prefix}  MF:               {}", if off & 0x2000 != 0 { "yes" } else { "no" })?;
        writeln!(w, "{prefix}ip_ttl:             {}", data[8])?;
        writeln!(w, "{prefix}ip_p:               {}", data[9])?;
        writeln!(w, "{prefix}ip_sum:             {}", (&data[10..12]).get_u16())?;
        writeln!(w, "{prefix}ip_src:             {src}")?;
        writeln!(w, "{prefix}ip_dst:             {dst}")
    }
}
