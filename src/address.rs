//! Stream addresses.
//!
//! Supported formats:
//!
//! * Ethernet multicast group, e.g. `01:00:00:00:00:01`.  Colon or dash
//!   delimiters are optional and `::` fills in zero pairs, so `01::01` reads
//!   as `01:00:00:00:00:01`.
//! * IPv4 address with optional port (`tcp://127.0.0.1:4711`,
//!   `udp://10.0.0.1`).  The default port is `0x0810`.
//! * Local filename or fifo, absolute or relative.  When serialized for the
//!   wire a filename is limited to 22 characters.
//!
//! A scheme prefix (`tcp://`, `udp://`, `eth://`, `file://`, `fifo://`)
//! forces the type, e.g. `file://127.0.0.1` references a file named
//! `127.0.0.1`.  Without a prefix the parser guesses: first as an Ethernet
//! address and then as a local filename.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default port for UDP/TCP streams.
pub const DEFAULT_PORT: u16 = 0x0810;

/// Size of the network-serialized address (used inside packed filters).
pub const ADDR_WIRE_SIZE: usize = 30;

/// A 48-bit Ethernet address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EtherAddr(pub [u8; 6]);

impl EtherAddr {
    pub const BROADCAST: EtherAddr = EtherAddr([0xff; 6]);

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Multicast addresses have the least significant bit of the first
    /// octet set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

fn hex_pair(s: &str) -> Option<u8> {
    match s.len() {
        1 | 2 => u8::from_str_radix(s, 16).ok(),
        _ => None,
    }
}

impl FromStr for EtherAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<EtherAddr> {
        let s = s.trim().replace('-', ":");

        // bare digits, e.g. "010203040506"
        if !s.contains(':') {
            if s.len() != 12 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::InvalidHwaddr);
            }
            let mut out = [0u8; 6];
            for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
                out[i] = hex_pair(std::str::from_utf8(chunk).unwrap())
                    .ok_or(Error::InvalidHwaddr)?;
            }
            return Ok(EtherAddr(out));
        }

        let collect = |part: &str| -> Result<Vec<u8>> {
            if part.is_empty() {
                return Ok(Vec::new());
            }
            part.split(':')
                .map(|p| hex_pair(p).ok_or(Error::InvalidHwaddr))
                .collect()
        };

        let mut out = [0u8; 6];
        match s.split_once("::") {
            Some((left, right)) => {
                if right.contains("::") {
                    return Err(Error::InvalidHwaddr);
                }
                let head = collect(left)?;
                let tail = collect(right)?;
                if head.len() + tail.len() > 6 {
                    return Err(Error::InvalidHwaddr);
                }
                out[..head.len()].copy_from_slice(&head);
                out[6 - tail.len()..].copy_from_slice(&tail);
            }
            None => {
                let pairs = collect(&s)?;
                if pairs.len() != 6 {
                    return Err(Error::InvalidHwaddr);
                }
                out.copy_from_slice(&pairs);
            }
        }
        Ok(EtherAddr(out))
    }
}

impl fmt::Display for EtherAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl From<[u8; 6]> for EtherAddr {
    fn from(octets: [u8; 6]) -> EtherAddr {
        EtherAddr(octets)
    }
}

/// Address type selector for [`StreamAddr::parse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrType {
    /// Guess the format: scheme prefix, then Ethernet, then local filename.
    Guess,
    Capfile,
    Ethernet,
    Udp,
    Tcp,
    FilePointer,
    Fifo,
}

/// The tagged value inside a [`StreamAddr`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddrKind {
    Capfile(PathBuf),
    Ethernet(EtherAddr),
    Udp(SocketAddrV4),
    Tcp(SocketAddrV4),
    /// An already-open file descriptor.
    FilePointer(i32),
    Fifo(PathBuf),
}

impl AddrKind {
    fn wire_type(&self) -> u16 {
        match self {
            AddrKind::Capfile(_) => 0,
            AddrKind::Ethernet(_) => 1,
            AddrKind::Udp(_) => 2,
            AddrKind::Tcp(_) => 3,
            AddrKind::FilePointer(_) => 4,
            AddrKind::Fifo(_) => 5,
        }
    }
}

/// A stream endpoint: capture file, fifo, Ethernet multicast group or an
/// IPv4/port destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamAddr {
    kind: AddrKind,
    flags: u16,
}

impl StreamAddr {
    /// The capfile path is long/local (not serializable in 22 bytes).
    pub const LOCAL: u16 = 1 << 0;
    /// Force the stream to be flushed for every write.
    pub const FLUSH: u16 = 1 << 1;
    /// Unlink the file in `Stream::close` (used by dynamically created fifos).
    pub const UNLINK: u16 = 1 << 2;
    /// Close the adopted file descriptor when the stream is closed.
    pub const FCLOSE: u16 = 1 << 3;
    /// Kept for wire compatibility; strings are always owned in this
    /// implementation.
    pub const DUPLICATE: u16 = 1 << 4;

    pub fn new(kind: AddrKind, flags: u16) -> StreamAddr {
        StreamAddr { kind, flags }
    }

    /// Parse a string as the given address type.
    pub fn parse(src: &str, addr_type: AddrType, flags: u16) -> Result<StreamAddr> {
        match addr_type {
            AddrType::Guess => {
                if let Some((prefix, rest)) = src.split_once("://") {
                    return match prefix.to_ascii_lowercase().as_str() {
                        "tcp" => StreamAddr::parse(rest, AddrType::Tcp, flags),
                        "udp" => StreamAddr::parse(rest, AddrType::Udp, flags),
                        "eth" => StreamAddr::parse(rest, AddrType::Ethernet, flags),
                        "file" => {
                            StreamAddr::parse(rest, AddrType::Capfile, flags | StreamAddr::LOCAL)
                        }
                        "fifo" => StreamAddr::parse(
                            rest,
                            AddrType::Fifo,
                            flags | StreamAddr::LOCAL | StreamAddr::UNLINK,
                        ),
                        _ => Err(Error::invalid_input(format!("unknown scheme: {prefix}"))),
                    };
                }

                if let Ok(addr) = StreamAddr::parse(src, AddrType::Ethernet, flags) {
                    return Ok(addr);
                }

                StreamAddr::parse(src, AddrType::Capfile, flags | StreamAddr::LOCAL)
            }

            AddrType::Tcp | AddrType::Udp => {
                let (ip, port) = match src.split_once(':') {
                    Some((ip, port)) => (
                        ip,
                        port.parse::<u16>()
                            .map_err(|_| Error::invalid_input(format!("invalid port: {port}")))?,
                    ),
                    None => (src, DEFAULT_PORT),
                };
                let ip = Ipv4Addr::from_str(ip)
                    .map_err(|_| Error::invalid_input(format!("invalid address: {ip}")))?;
                let sa = SocketAddrV4::new(ip, port);
                let kind = if addr_type == AddrType::Tcp {
                    AddrKind::Tcp(sa)
                } else {
                    AddrKind::Udp(sa)
                };
                Ok(StreamAddr { kind, flags })
            }

            AddrType::Ethernet => Ok(StreamAddr {
                kind: AddrKind::Ethernet(src.parse()?),
                flags,
            }),

            AddrType::Capfile => Ok(StreamAddr {
                kind: AddrKind::Capfile(PathBuf::from(src)),
                flags,
            }),

            AddrType::Fifo => Ok(StreamAddr {
                kind: AddrKind::Fifo(PathBuf::from(src)),
                flags,
            }),

            AddrType::FilePointer => Err(Error::invalid_input(
                "file-pointer addresses cannot be parsed from text",
            )),
        }
    }

    /// Address referencing a local file path.
    pub fn from_path(path: impl Into<PathBuf>, flags: u16) -> StreamAddr {
        StreamAddr {
            kind: AddrKind::Capfile(path.into()),
            flags: flags | StreamAddr::LOCAL,
        }
    }

    /// Address adopting an already-open file descriptor.  The descriptor is
    /// closed on `Stream::close` only with the [`StreamAddr::FCLOSE`] flag.
    pub fn from_fd(fd: i32, flags: u16) -> StreamAddr {
        StreamAddr {
            kind: AddrKind::FilePointer(fd),
            flags: flags | StreamAddr::LOCAL,
        }
    }

    pub fn kind(&self) -> &AddrKind {
        &self.kind
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            AddrKind::Capfile(p) | AddrKind::Fifo(p) => Some(p),
            _ => None,
        }
    }

    /// Human readable name of the address type.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            AddrKind::Capfile(_) => "file",
            AddrKind::Ethernet(_) => "ethernet",
            AddrKind::Udp(_) => "udp",
            AddrKind::Tcp(_) => "tcp",
            AddrKind::FilePointer(_) => "file",
            AddrKind::Fifo(_) => "fifo",
        }
    }

    /// Serialize into the fixed 30-byte network form.  Only capfiles (with
    /// short names) and Ethernet groups survive the trip intact; local paths
    /// are truncated to 21 bytes.
    pub fn to_wire(&self) -> [u8; ADDR_WIRE_SIZE] {
        let mut out = [0u8; ADDR_WIRE_SIZE];
        {
            let payload = &mut out[..26];
            match &self.kind {
                AddrKind::Capfile(path) | AddrKind::Fifo(path) => {
                    let bytes = path.as_os_str().as_encoded_bytes();
                    let n = bytes.len().min(21);
                    payload[..n].copy_from_slice(&bytes[..n]);
                }
                AddrKind::Ethernet(mac) => payload[..6].copy_from_slice(&mac.0),
                AddrKind::Udp(sa) | AddrKind::Tcp(sa) => {
                    payload[..4].copy_from_slice(&sa.ip().octets());
                    payload[4..6].copy_from_slice(&sa.port().to_be_bytes());
                }
                AddrKind::FilePointer(_) => {}
            }
        }
        (&mut out[26..28]).put_u16(self.kind.wire_type());
        (&mut out[28..30]).put_u16(self.flags);
        out
    }

    /// Parse the 30-byte network form.  Returns `None` for an unset address
    /// (type zero with an empty filename).
    pub fn from_wire(buf: &[u8; ADDR_WIRE_SIZE]) -> Result<Option<StreamAddr>> {
        let wire_type = (&buf[26..28]).get_u16();
        let flags = (&buf[28..30]).get_u16();
        let payload = &buf[..26];

        let path_of = |payload: &[u8]| {
            let len = payload.iter().position(|b| *b == 0).unwrap_or(22.min(payload.len()));
            PathBuf::from(String::from_utf8_lossy(&payload[..len]).into_owned())
        };

        let kind = match wire_type {
            0 => {
                if payload[0] == 0 {
                    return Ok(None);
                }
                AddrKind::Capfile(path_of(payload))
            }
            1 => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(&payload[..6]);
                AddrKind::Ethernet(EtherAddr(mac))
            }
            2 | 3 => {
                let ip = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
                let port = (&payload[4..6]).get_u16();
                let sa = SocketAddrV4::new(ip, port);
                if wire_type == 2 {
                    AddrKind::Udp(sa)
                } else {
                    AddrKind::Tcp(sa)
                }
            }
            5 => AddrKind::Fifo(path_of(payload)),
            _ => return Err(Error::InvalidProtocol),
        };
        Ok(Some(StreamAddr { kind, flags }))
    }
}

impl fmt::Display for StreamAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.kind {
            AddrKind::Tcp(sa) => write!(f, "tcp://{}:{}", sa.ip(), sa.port()),
            AddrKind::Udp(sa) => write!(f, "udp://{}:{}", sa.ip(), sa.port()),
            AddrKind::Ethernet(mac) => write!(f, "eth://{mac}"),
            AddrKind::Fifo(path) => write!(f, "fifo://{}", path.display()),
            AddrKind::Capfile(path) => write!(f, "{}", path.display()),
            AddrKind::FilePointer(fd) => write!(f, "/dev/fd/{fd}"),
        }
    }
}

impl FromStr for StreamAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<StreamAddr> {
        StreamAddr::parse(s, AddrType::Guess, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ether_normalisation() {
        let cases = [
            ("01::01", [0x01, 0, 0, 0, 0, 0x01]),
            ("01-02-03-04-05-06", [1, 2, 3, 4, 5, 6]),
            ("01:02:03:04:05:06", [1, 2, 3, 4, 5, 6]),
            ("010203040506", [1, 2, 3, 4, 5, 6]),
            ("1:2:3:4:5:6", [1, 2, 3, 4, 5, 6]),
            ("01:02::06", [1, 2, 0, 0, 0, 6]),
            ("::", [0, 0, 0, 0, 0, 0]),
            ("ff:ff:ff:ff:ff:ff", [0xff; 6]),
        ];
        for (input, expected) in cases {
            let addr: EtherAddr = input.parse().unwrap();
            assert_eq!(addr.octets(), expected, "parsing {input:?}");
        }
    }

    #[test]
    fn ether_invalid() {
        for input in ["01:02:03:04:05", "gg:00:00:00:00:00", "0102030405", "1:2:3:4:5:6:7"] {
            assert!(input.parse::<EtherAddr>().is_err(), "should reject {input:?}");
        }
    }

    #[test]
    fn ether_display() {
        let addr: EtherAddr = "01::01".parse().unwrap();
        assert_eq!(addr.to_string(), "01:00:00:00:00:01");
    }

    #[test]
    fn guess_ethernet_then_file() {
        let addr: StreamAddr = "01::01".parse().unwrap();
        assert!(matches!(addr.kind(), AddrKind::Ethernet(_)));
        assert_eq!(addr.to_string(), "eth://01:00:00:00:00:01");

        let addr: StreamAddr = "trace.cap".parse().unwrap();
        assert!(matches!(addr.kind(), AddrKind::Capfile(_)));
        assert!(addr.has_flag(StreamAddr::LOCAL));
        assert_eq!(addr.to_string(), "trace.cap");
    }

    #[test]
    fn scheme_prefixes() {
        let addr: StreamAddr = "tcp://127.0.0.1:4711".parse().unwrap();
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:4711");

        let addr: StreamAddr = "udp://10.0.0.1".parse().unwrap();
        match addr.kind() {
            AddrKind::Udp(sa) => assert_eq!(sa.port(), DEFAULT_PORT),
            other => panic!("expected udp, got {other:?}"),
        }

        // file named like an ethernet address
        let addr: StreamAddr = "file://010203040506".parse().unwrap();
        assert!(matches!(addr.kind(), AddrKind::Capfile(_)));

        let addr: StreamAddr = "fifo:///tmp/stream".parse().unwrap();
        assert!(matches!(addr.kind(), AddrKind::Fifo(_)));
        assert!(addr.has_flag(StreamAddr::UNLINK));

        assert!("smtp://example".parse::<StreamAddr>().is_err());
    }

    #[test]
    fn parse_is_idempotent_over_format() {
        for input in ["01::01", "tcp://127.0.0.1:4711", "udp://10.0.0.1:2064", "trace.cap"] {
            let once: StreamAddr = input.parse().unwrap();
            let twice: StreamAddr = once.to_string().parse().unwrap();
            assert_eq!(once.kind(), twice.kind());
        }
    }

    #[test]
    fn wire_roundtrip() {
        let eth: StreamAddr = "eth://01::01".parse().unwrap();
        let back = StreamAddr::from_wire(&eth.to_wire()).unwrap().unwrap();
        assert_eq!(back.kind(), eth.kind());

        let file = StreamAddr::parse("short.cap", AddrType::Capfile, 0).unwrap();
        let back = StreamAddr::from_wire(&file.to_wire()).unwrap().unwrap();
        assert_eq!(back.kind(), file.kind());

        let unset = [0u8; ADDR_WIRE_SIZE];
        assert!(StreamAddr::from_wire(&unset).unwrap().is_none());
    }
}
