use super::{HeaderChunk, NextPayload, Protocol, ProtocolType};
use bytes::Buf;
use std::fmt;

pub(super) static GTP: GtpProto = GtpProto;

pub(super) struct GtpProto;

const MSG_TPDU: u8 = 255;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Version {
    V1,
    V2,
    Prime,
}

fn version(flags: u8) -> Option<Version> {
    match flags >> 5 {
        1 if flags & 0x10 != 0 => Some(Version::V1),
        1 => Some(Version::Prime),
        2 => Some(Version::V2),
        _ => None,
    }
}

fn version_str(v: Version) -> &'static str {
    match v {
        Version::V1 => "GTPv1",
        Version::V2 => "GTPv2",
        Version::Prime => "GTP'",
    }
}

/// Header size for the detected version.  GTPv1 grows by four bytes when
/// any of the sequence/N-PDU/extension flags are set.
fn header_size(data: &[u8]) -> Option<usize> {
    let v = version(*data.first()?)?;
    Some(match v {
        Version::V1 => {
            if data[0] & 0x07 != 0 {
                12
            } else {
                8
            }
        }
        Version::V2 => {
            if data[0] & 0x08 != 0 {
                12 // with TEID
            } else {
                8
            }
        }
        Version::Prime => 6,
    })
}

impl Protocol for GtpProto {
    fn name(&self) -> &'static str {
        "GTP"
    }

    fn size(&self) -> usize {
        6
    }

    fn size_dyn(&self, header: &HeaderChunk) -> Option<usize> {
        header_size(header.data())
    }

    fn next_payload(&self, header: &mut HeaderChunk) -> NextPayload {
        let data = header.data();
        let Some(v) = data.first().copied().and_then(version) else {
            return NextPayload::truncated();
        };
        let Some(size) = header_size(data) else {
            return NextPayload::truncated();
        };
        if data.len() < size + 1 {
            return NextPayload::truncated();
        }

        // only GTPv1 tunnels user plane traffic
        if v == Version::V1 && data[1] == MSG_TPDU {
            let next = match data[size] & 0xf0 {
                0x40 => ProtocolType::Ipv4,
                0x60 => ProtocolType::Ipv6,
                _ => ProtocolType::Data,
            };
            return NextPayload::advance(next, size);
        }
        NextPayload::advance(ProtocolType::Data, size)
    }

    fn format(&self, w: &mut dyn fmt::Write, header: &HeaderChunk, _flags: u32) -> fmt::Result {
        let data = header.data();
        let Some(v) = data.first().copied().and_then(version) else {
            return write!(w, ": GTP");
        };
        write!(w, ": {}", version_str(v))?;
        if data.len() >= 4 {
            write!(w, "(msg: {:#04x}, len: {})", data[1], (&data[2..4]).get_u16())?;
        }
        if v == Version::V1 && data.len() >= 8 {
            write!(w, " teid={:#010x}", (&data[4..8]).get_u32())?;
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
        let v = data.first().copied().and_then(version);
        writeln!(
            w,
            "{prefix}version:            {}",
            v.map(version_str).unwrap_or("invalid")
        )?;
        writeln!(w, "{prefix}message:            {:#04x}", data[1])?;
        writeln!(w, "{prefix}length:             {}", (&data[2..4]).get_u16())?;
        if v == Some(Version::V1) && data.len() >= 8 {
            writeln!(w, "{prefix}teid:               {:#010x}", (&data[4..8]).get_u32())?;
        }
        Ok(())
    }
}
