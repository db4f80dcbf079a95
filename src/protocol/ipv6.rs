use super::ip::ipproto_next;
use super::{HeaderChunk, NextPayload, Protocol};
use bytes::Buf;
use std::fmt;
use std::net::Ipv6Addr;

pub(super) static IPV6: Ipv6Proto = Ipv6Proto;

pub(super) struct Ipv6Proto;

const FIXED_HEADER: usize = 40;

fn is_ext(next_header: u8) -> bool {
    // hop-by-hop options; other extension headers are rare enough that the
    // decoder treats them as payload
    next_header == 0
}

fn addr_at(data: &[u8], offset: usize) -> Ipv6Addr {
    let octets: [u8; 16] = data[offset..offset + 16].try_into().unwrap();
    Ipv6Addr::from(octets)
}

/// Total header size including extension headers.
/// Returns `(size, payload_protocol)` or `None` when the captured bytes
/// run out inside the chain.
fn total_header_size(data: &[u8]) -> Option<(usize, u8)> {
    if data.len() < FIXED_HEADER {
        return None;
    }

    let mut next = data[6];
    let mut size = FIXED_HEADER;
    while is_ext(next) {
        if data.len() < size + 2 {
            return None;
        }
        let ext_len = (data[size + 1] as usize) * 8 + 8;
        if data.len() < size + ext_len {
            return None;
        }
        next = data[size];
        size += ext_len;
    }
    Some((size, next))
}

impl Protocol for Ipv6Proto {
    fn name(&self) -> &'static str {
        "IPv6"
    }

    fn size(&self) -> usize {
        FIXED_HEADER
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        let Some((size, proto)) = total_header_size(data) else {
            return NextPayload::truncated();
        };

        let plen = (&data[4..6]).get_u16() as usize;
        header.last_net.src = addr_at(data, 8).to_string();
        header.last_net.dst = addr_at(data, 24).to_string();
        header.last_net.plen = (plen + FIXED_HEADER).saturating_sub(size);

        NextPayload::advance(ipproto_next(proto), size)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        write!(w, ": {}", self.name())?;
        let data = header.data();
        if let Some((_, proto)) = total_header_size(data) {
            if ipproto_next(proto) == super::ProtocolType::Data {
                write!(w, " [ip6_next={proto:#04x}]")?;
            }
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
        if data.len() < FIXED_HEADER {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        writeln!(w, "{prefix}ip6_flow:           {:#010x}", (&data[0..4]).get_u32())?;
        writeln!(w, "{prefix}ip6_plen:           {} octets", (&data[4..6]).get_u16())?;
        writeln!(w, "{prefix}ip6_nxt:            {}", data[6])?;
        writeln!(w, "{prefix}ip6_hops:           {}", data[7])?;
        writeln!(w, "{prefix}ip6_src:            {}", addr_at(data, 8))?;
        writeln!(w, "{prefix}ip6_dst:            {}", addr_at(data, 24))
    }
}
