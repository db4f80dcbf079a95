//! Binary layouts for on-disk capture files and on-wire measurement frames.

use crate::capture::CapHeader;
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Buf, BufMut};
use std::fmt;
use std::io::{Read, Write};
use tracing::warn;

/// Magic number opening every current capture file.
pub const FILE_MAGIC: u64 = 0x8f1ae247c53d9b6e;

/// EtherType of measurement frames.
pub const ETHERTYPE_MP: u16 = 0x0810;

/// File-format version written by this library.
pub const LIBRARY_VERSION: FileVersion = FileVersion { major: 0, minor: 8 };

/// A major/minor version pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileVersion {
    pub major: u32,
    pub minor: u32,
}

impl FileVersion {
    /// Whether a stream of this version can be read by the library.
    pub fn supported(&self) -> bool {
        self.major <= LIBRARY_VERSION.major && self.minor <= LIBRARY_VERSION.minor
    }
}

impl fmt::Display for FileVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Size of the current fixed file header.
pub const FILE_HEADER_SIZE: usize = 224;

/// Size of the legacy v0.5 header (no magic, no header offset).
pub const FILE_HEADER_05_SIZE: usize = 212;

/// Size of the legacy v0.6 header (no magic).
pub const FILE_HEADER_06_SIZE: usize = 216;

/// The header opening a capture file.
///
/// Current layout (big-endian): magic, version major/minor, header offset,
/// comment size, 200 bytes of MP id.  Legacy v0.5/v0.6 files lack the magic
/// and are stored in the byte order of the machine that wrote them; they are
/// recognised by their version fields and loadable read-only.
#[derive(Clone)]
pub struct FileHeader {
    pub version: FileVersion,
    /// Offset to the comment, i.e. fixed header plus extension headers.
    pub header_offset: u32,
    pub comment_size: u32,
    pub mpid: [u8; 200],
}

impl FileHeader {
    pub fn new(mpid: &str, comment_size: u32) -> FileHeader {
        let mut id = [0u8; 200];
        let bytes = mpid.as_bytes();
        let n = bytes.len().min(199);
        id[..n].copy_from_slice(&bytes[..n]);
        FileHeader {
            version: LIBRARY_VERSION,
            header_offset: FILE_HEADER_SIZE as u32,
            comment_size,
            mpid: id,
        }
    }

    pub fn mpid(&self) -> &str {
        let len = self.mpid.iter().position(|b| *b == 0).unwrap_or(200);
        std::str::from_utf8(&self.mpid[..len]).unwrap_or("")
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<BigEndian>(FILE_MAGIC)?;
        w.write_u32::<BigEndian>(self.version.major)?;
        w.write_u32::<BigEndian>(self.version.minor)?;
        w.write_u32::<BigEndian>(self.header_offset)?;
        w.write_u32::<BigEndian>(self.comment_size)?;
        w.write_all(&self.mpid)?;
        Ok(())
    }

    /// Parse the first [`FILE_HEADER_SIZE`] bytes of a capture file,
    /// falling back to the legacy layouts when the magic does not match.
    pub fn parse(buf: &[u8; FILE_HEADER_SIZE]) -> Result<FileHeader> {
        let mut rd = &buf[..];
        if rd.read_u64::<BigEndian>()? == FILE_MAGIC {
            let version = FileVersion {
                major: rd.read_u32::<BigEndian>()?,
                minor: rd.read_u32::<BigEndian>()?,
            };
            let header_offset = rd.read_u32::<BigEndian>()?;
            let comment_size = rd.read_u32::<BigEndian>()?;
            let mut mpid = [0u8; 200];
            rd.read_exact(&mut mpid)?;
            return Ok(FileHeader {
                version,
                header_offset,
                comment_size,
                mpid,
            });
        }

        Self::parse_legacy(buf).ok_or(Error::CapfileInvalid)
    }

    /// Legacy headers carry no magic; they are recognised by their version
    /// fields alone.  Both layouts start with the comment size followed by
    /// the version, v0.6 adds the header offset before the MP id.
    fn parse_legacy(buf: &[u8; FILE_HEADER_SIZE]) -> Option<FileHeader> {
        let comment_size = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let major = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        let minor = u32::from_ne_bytes(buf[8..12].try_into().unwrap());

        let (header_offset, mpid_at) = match (major, minor) {
            (0, 5) => (FILE_HEADER_05_SIZE as u32, 12),
            (0, 6) => (FILE_HEADER_06_SIZE as u32, 16),
            _ => return None,
        };

        let mut mpid = [0u8; 200];
        mpid.copy_from_slice(&buf[mpid_at..mpid_at + 200]);
        Some(FileHeader {
            version: FileVersion { major, minor },
            header_offset,
            comment_size,
            mpid,
        })
    }

    /// Whether extension headers sit between the fixed header and the
    /// comment.
    pub fn has_extensions(&self) -> bool {
        self.header_offset as usize > FILE_HEADER_SIZE
    }
}

/// Extension header types.
pub const HEADER_EXT_NONE: u16 = 0;
pub const HEADER_EXT_PADDING: u16 = 1;

/// An extension header: type followed by the offset to the next one
/// (including this header itself).
#[derive(Clone, Copy, Debug)]
pub struct FileExtension {
    pub ext_type: u16,
    pub next_offset: u16,
}

pub const FILE_EXTENSION_SIZE: usize = 4;

impl FileExtension {
    pub fn read_from<R: Read>(r: &mut R) -> Result<FileExtension> {
        let mut buf = [0u8; FILE_EXTENSION_SIZE];
        r.read_exact(&mut buf).map_err(|_| Error::CapfileTruncated)?;
        Ok(FileExtension {
            ext_type: u16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            next_offset: u16::from_ne_bytes(buf[2..4].try_into().unwrap()),
        })
    }
}

/// Size of the send header prefixing every measurement frame.
pub const SEND_HEADER_SIZE: usize = 16;

/// Flag bit: the sender is ending the stream.
pub const SENDER_FLUSH: u32 = 1;

/// Per measurement-frame metadata (network byte order on the wire).
///
/// The sequence number advances by one for every frame sent by a source and
/// wraps at `0xFFFF`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendHeader {
    pub sequence: u32,
    pub nopkts: u32,
    pub flags: u32,
    pub version: (u16, u16),
}

impl SendHeader {
    pub fn new(sequence: u32, nopkts: u32, flags: u32) -> SendHeader {
        SendHeader {
            sequence,
            nopkts,
            flags,
            version: (LIBRARY_VERSION.major as u16, LIBRARY_VERSION.minor as u16),
        }
    }

    pub fn parse(mut buf: &[u8]) -> Option<SendHeader> {
        if buf.len() < SEND_HEADER_SIZE {
            return None;
        }
        Some(SendHeader {
            sequence: buf.get_u32(),
            nopkts: buf.get_u32(),
            flags: buf.get_u32(),
            version: (buf.get_u16(), buf.get_u16()),
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.sequence);
        buf.put_u32(self.nopkts);
        buf.put_u32(self.flags);
        buf.put_u16(self.version.0);
        buf.put_u16(self.version.1);
    }

    pub fn file_version(&self) -> FileVersion {
        FileVersion {
            major: self.version.0 as u32,
            minor: self.version.1 as u32,
        }
    }

    pub fn flush(&self) -> bool {
        self.flags & SENDER_FLUSH != 0
    }
}

/// Size of an Ethernet header.
pub const ETH_HEADER_SIZE: usize = 14;

/// The link header of an Ethernet measurement frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest: [u8; 6],
    pub source: [u8; 6],
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn parse(mut buf: &[u8]) -> Option<EthernetHeader> {
        if buf.len() < ETH_HEADER_SIZE {
            return None;
        }
        let mut dest = [0u8; 6];
        let mut source = [0u8; 6];
        buf.copy_to_slice(&mut dest);
        buf.copy_to_slice(&mut source);
        Some(EthernetHeader {
            dest,
            source,
            ether_type: buf.get_u16(),
        })
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.dest);
        buf.put_slice(&self.source);
        buf.put_u16(self.ether_type);
    }
}

/// Validate a measurement frame: the capture packets must add up to exactly
/// the frame size past the link and send headers.  Malformed frames are
/// logged and dropped by the caller.
pub(crate) fn valid_frame(frame: &[u8], header_offset: usize) -> Option<SendHeader> {
    let sh = SendHeader::parse(&frame[header_offset.min(frame.len())..])?;

    let mut expected = header_offset + SEND_HEADER_SIZE;
    let mut n = sh.nopkts;
    while n > 0 {
        let Some(cp) = CapHeader::parse(&frame[expected.min(frame.len())..]) else {
            warn_invalid_frame(&sh, frame.len());
            return None;
        };
        if cp.caplen == 0 {
            warn!("cp->caplen == 0, discarding frame");
            return None;
        }
        expected += cp.packet_size();
        n -= 1;
    }

    if expected != frame.len() {
        warn_invalid_frame(&sh, frame.len());
        return None;
    }
    Some(sh)
}

fn warn_invalid_frame(sh: &SendHeader, actual: usize) {
    warn!(
        seqnum = sh.sequence,
        nopkts = sh.nopkts,
        frame_size = actual,
        "invalid measurement frame received"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Picotime;

    #[test]
    fn file_header_roundtrip() {
        let header = FileHeader::new("test", 5);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), FILE_HEADER_SIZE);

        let parsed = FileHeader::parse(buf.as_slice().try_into().unwrap()).unwrap();
        assert_eq!(parsed.version, LIBRARY_VERSION);
        assert_eq!(parsed.header_offset, FILE_HEADER_SIZE as u32);
        assert_eq!(parsed.comment_size, 5);
        assert_eq!(parsed.mpid(), "test");
        assert!(!parsed.has_extensions());
    }

    #[test]
    fn mpid_is_truncated() {
        let long = "x".repeat(250);
        let header = FileHeader::new(&long, 0);
        assert_eq!(header.mpid().len(), 199);
    }

    #[test]
    fn legacy_headers() {
        // v0.5: comment_size, version, mpid
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&7u32.to_ne_bytes());
        buf[4..8].copy_from_slice(&0u32.to_ne_bytes());
        buf[8..12].copy_from_slice(&5u32.to_ne_bytes());
        buf[12..16].copy_from_slice(b"mp05");
        let header = FileHeader::parse(&buf).unwrap();
        assert_eq!(header.version, FileVersion { major: 0, minor: 5 });
        assert_eq!(header.header_offset as usize, FILE_HEADER_05_SIZE);
        assert_eq!(header.comment_size, 7);
        assert_eq!(header.mpid(), "mp05");

        // v0.6 adds the header offset before the mpid
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&0u32.to_ne_bytes());
        buf[4..8].copy_from_slice(&0u32.to_ne_bytes());
        buf[8..12].copy_from_slice(&6u32.to_ne_bytes());
        buf[16..20].copy_from_slice(b"mp06");
        let header = FileHeader::parse(&buf).unwrap();
        assert_eq!(header.version, FileVersion { major: 0, minor: 6 });
        assert_eq!(header.header_offset as usize, FILE_HEADER_06_SIZE);
        assert_eq!(header.mpid(), "mp06");
    }

    #[test]
    fn bad_magic_is_invalid() {
        let buf = [0xabu8; FILE_HEADER_SIZE];
        assert!(matches!(FileHeader::parse(&buf), Err(Error::CapfileInvalid)));
    }

    #[test]
    fn version_support() {
        assert!(LIBRARY_VERSION.supported());
        assert!(FileVersion { major: 0, minor: 5 }.supported());
        assert!(!FileVersion { major: 0, minor: 9 }.supported());
        assert!(!FileVersion { major: 1, minor: 0 }.supported());
    }

    #[test]
    fn send_header_roundtrip() {
        let sh = SendHeader::new(42, 3, SENDER_FLUSH);
        let mut buf = Vec::new();
        sh.put(&mut buf);
        assert_eq!(buf.len(), SEND_HEADER_SIZE);
        let parsed = SendHeader::parse(&buf).unwrap();
        assert_eq!(parsed, sh);
        assert!(parsed.flush());
        assert_eq!(parsed.file_version(), LIBRARY_VERSION);
    }

    fn test_frame(header_offset: usize, caplens: &[u32]) -> Vec<u8> {
        let mut frame = vec![0u8; header_offset];
        SendHeader::new(1, caplens.len() as u32, 0).put(&mut frame);
        for caplen in caplens {
            let head = CapHeader::new("eth0", "mp", Picotime::default(), *caplen, *caplen);
            head.put(&mut frame);
            frame.extend(std::iter::repeat(0).take(*caplen as usize));
        }
        frame
    }

    #[test]
    fn frame_validation() {
        let frame = test_frame(ETH_HEADER_SIZE, &[60, 100]);
        let sh = valid_frame(&frame, ETH_HEADER_SIZE).unwrap();
        assert_eq!(sh.nopkts, 2);

        // short frame
        assert!(valid_frame(&frame[..frame.len() - 1], ETH_HEADER_SIZE).is_none());
        // trailing garbage
        let mut long = frame.clone();
        long.push(0);
        assert!(valid_frame(&long, ETH_HEADER_SIZE).is_none());
        // zero caplen
        assert!(valid_frame(&test_frame(0, &[0]), 0).is_none());
    }
}
