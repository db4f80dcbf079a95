use super::{HeaderChunk, Protocol};
use bytes::Buf;
use std::fmt;

pub(super) static DNS: DnsProto = DnsProto;

pub(super) struct DnsProto;

const HEADER_SIZE: usize = 12;

fn opcode_str(opcode: u8) -> &'static str {
    match opcode {
        0 => "Query",
        1 => "Inverse query",
        2 => "Status",
        4 => "Notify",
        5 => "Update",
        _ => "Reserved",
    }
}

fn rcode_str(rcode: u8) -> &'static str {
    match rcode {
        0 => "OK",
        1 => "Format error",
        2 => "Server error",
        3 => "Name error",
        4 => "Not implemented",
        5 => "Refused",
        _ => "Unknown",
    }
}

fn type_str(qtype: u16) -> &'static str {
    match qtype {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        99 => "SPF",
        251 => "IXFR",
        252 => "AXFR",
        255 => "ANY",
        _ => "?",
    }
}

fn class_str(qclass: u16) -> &'static str {
    match qclass {
        1 => "IN",
        2 => "CS",
        3 => "CH",
        4 => "HS",
        _ => "?",
    }
}

/// Read the labels of the first question name.  Compression pointers do
/// not occur in the question section, so only plain labels are followed.
fn question_name(data: &[u8]) -> Option<(String, usize)> {
    let mut name = String::new();
    let mut offset = HEADER_SIZE;
    loop {
        let len = *data.get(offset)? as usize;
        if len == 0 {
            return Some((name, offset + 1));
        }
        if len > 63 || data.len() < offset + 1 + len {
            return None;
        }
        name.push_str(&String::from_utf8_lossy(&data[offset + 1..offset + 1 + len]));
        name.push('.');
        offset += 1 + len;
    }
}

impl Protocol for DnsProto {
    fn name(&self) -> &'static str {
        "DNS"
    }

    fn size(&self) -> usize {
        HEADER_SIZE
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        if data.len() < HEADER_SIZE {
            return write!(w, ": DNS");
        }

        let id = (&data[0..2]).get_u16();
        let flags = (&data[2..4]).get_u16();
        let qr = flags & 0x8000 != 0;
        let opcode = ((flags >> 11) & 0xf) as u8;
        let rcode = (flags & 0xf) as u8;
        let qdcount = (&data[4..6]).get_u16();
        let ancount = (&data[6..8]).get_u16();

        write!(
            w,
            ": DNS: {} {:#06x}",
            if qr { "response" } else { "query" },
            id
        )?;
        if qr {
            write!(w, " {} an={}", rcode_str(rcode), ancount)?;
        } else {
            write!(w, " {} qd={}", opcode_str(opcode), qdcount)?;
        }

        if qdcount > 0 {
            if let Some((name, offset)) = question_name(data) {
                write!(w, " {name}")?;
                if data.len() >= offset + 4 {
                    let qtype = (&data[offset..offset + 2]).get_u16();
                    let qclass = (&data[offset + 2..offset + 4]).get_u16();
                    write!(w, " {} {}", class_str(qclass), type_str(qtype))?;
                }
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
        if data.len() < HEADER_SIZE {
            return writeln!(w, "{prefix}[Packet size limited during capture]");
        }
        let flags = (&data[2..4]).get_u16();
        writeln!(w, "{prefix}id:                 {:#06x}", (&data[0..2]).get_u16())?;
        writeln!(w, "{prefix}qr:                 {}", (flags >> 15) & 1)?;
        writeln!(w, "{prefix}opcode:             {}", opcode_str(((flags >> 11) & 0xf) as u8))?;
        writeln!(w, "{prefix}rcode:              {}", rcode_str((flags & 0xf) as u8))?;
        writeln!(w, "{prefix}qdcount:            {}", (&data[4..6]).get_u16())?;
        writeln!(w, "{prefix}ancount:            {}", (&data[6..8]).get_u16())?;
        writeln!(w, "{prefix}nscount:            {}", (&data[8..10]).get_u16())?;
        writeln!(w, "{prefix}arcount:            {}", (&data[10..12]).get_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_names() {
        let mut data = vec![0u8; HEADER_SIZE];
        data.extend_from_slice(&[3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0]);
        let (name, offset) = question_name(&data).unwrap();
        assert_eq!(name, "www.example.");
        assert_eq!(offset, data.len());

        // truncated label
        assert!(question_name(&data[..data.len() - 2]).is_none());
    }
}
