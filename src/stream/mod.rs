//! Measurement streams.
//!
//! A [`Stream`] is a uniform interface over the four transports carrying
//! capture packets: capture files (and fifos), Ethernet multicast, UDP and
//! TCP.  Consumers open a stream and call [`Stream::read`] in a loop;
//! producers create one and call [`Stream::write`] per packet (or per
//! pre-built measurement frame for the network transports).

mod buffer;
mod file;
mod tcp;
mod udp;

#[cfg(target_os = "linux")]
mod ethernet;

pub(crate) use buffer::{FrameBuffer, FrameSource};

use crate::address::{AddrKind, StreamAddr};
use crate::capture::{CapHeader, CapPacket, CAP_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::wire::FileVersion;
use std::io::{self, Write};
use std::ops::Range;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::warn;

/// Running stream counters.  Monotonic; reset only when the stream is
/// destroyed.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamStat {
    /// Packets received from the link into the buffer.
    pub recv: u64,
    /// Packets the user (tried to) read, i.e. before filtering.
    pub read: u64,
    /// Packets that matched the filter.
    pub matched: u64,
    /// Size of the buffer in bytes.
    pub buffer_size: u64,
    /// Number of buffered bytes currently in use.
    pub buffer_usage: u64,
}

/// What to do when an inbound sequence number does not match the expected
/// one.  The legacy implementation aborted the process; the default here is
/// to log the gap and resynchronise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SeqPolicy {
    /// Log the mismatch and resynchronise (default).
    #[default]
    Log,
    /// Silently resynchronise.
    Ignore,
    /// Panic on mismatch (legacy strict mode).
    Abort,
}

/// Mutable stream state handed down to link backends.
pub(crate) struct LinkCtx<'a> {
    pub stat: &'a mut StreamStat,
    pub flushed: &'a mut bool,
    pub policy: SeqPolicy,
    pub loopback: bool,
    pub loopback_warned: &'a mut bool,
}

/// Validate and advance a per-source sequence number.
///
/// On a loopback interface a duplicate of the previous frame is ignored
/// (logged once).  A mismatch is handled according to the policy; the
/// counter resynchronises to the observed value and wraps at `0xFFFF`.
pub(crate) fn match_inc_seqnr(ctx: &mut LinkCtx, seq: &mut u32, got: u32) {
    let expected = *seq;

    if ctx.loopback && expected == got.wrapping_add(1) {
        if !*ctx.loopback_warned {
            warn!(
                "a loopback device receiving duplicate packets has been detected, \
                 duplicates will be ignored but it will incur degraded performance"
            );
            *ctx.loopback_warned = true;
        }
        return;
    }

    if expected != got {
        let missing = got as i64 - expected as i64;
        match ctx.policy {
            SeqPolicy::Log => warn!(
                pkgcount = ctx.stat.recv,
                "mismatch of sequence numbers: expected {expected} got {got} \
                 ({missing} frame(s) missing)"
            ),
            SeqPolicy::Ignore => {}
            SeqPolicy::Abort => panic!(
                "mismatch of sequence numbers: expected {expected} got {got} \
                 ({missing} frame(s) missing)"
            ),
        }
        *seq = got;
    }

    // next frame is expected to have +1; wrap at the legacy 16-bit window
    *seq += 1;
    if *seq >= 0xffff {
        *seq = 0;
    }
}

/// Wait for a readable descriptor.  Returns `false` on timeout.
pub(crate) fn poll_read(fd: RawFd, timeout: Option<Duration>) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = match timeout {
        Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
        None => -1,
    };
    loop {
        let ret = unsafe { libc::poll(&mut pfd, 1, millis) };
        if ret >= 0 {
            return Ok(ret > 0);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// A backend feeding a [`ReadBuffer`] with raw capture-packet bytes.
pub(crate) trait ByteSource {
    fn fill(
        &mut self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<usize>;
}

/// The byte buffer backing file and TCP streams.
pub(crate) struct ReadBuffer {
    pub data: Vec<u8>,
    pub read_pos: usize,
    pub write_pos: usize,
    eof: bool,
}

pub(crate) enum Fill {
    Bytes(usize),
    Eof,
}

impl ReadBuffer {
    pub fn new(size: usize) -> ReadBuffer {
        ReadBuffer {
            data: vec![0u8; size],
            read_pos: 0,
            write_pos: 0,
            eof: false,
        }
    }

    pub fn available(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Move residual bytes to the front and ask the backend for more.
    fn fill(
        &mut self,
        src: &mut dyn ByteSource,
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<Fill> {
        if self.eof {
            return Ok(Fill::Eof);
        }

        // nothing to do while a complete packet is already buffered
        if let Some(head) = CapHeader::parse(&self.data[self.read_pos..self.write_pos]) {
            if self.available() >= head.packet_size() {
                return Ok(Fill::Bytes(0));
            }
        }

        if self.read_pos > 0 {
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.read_pos = 0;
        }

        let n = src.fill(&mut self.data[self.write_pos..], timeout, ctx)?;
        if n == 0 {
            self.eof = true;
            return Ok(Fill::Eof);
        }
        self.write_pos += n;
        Ok(Fill::Bytes(n))
    }
}

/// The shared read loop for byte-stream backends: ensure one whole capture
/// packet is contiguous in the buffer, pop it and apply the filter.
pub(crate) fn buffered_read(
    buf: &mut ReadBuffer,
    src: &mut dyn ByteSource,
    ctx: &mut LinkCtx,
    mut filter: Option<&mut Filter>,
    timeout: Option<Duration>,
) -> Result<Option<(CapHeader, Range<usize>)>> {
    let blocking = timeout.is_none();

    loop {
        if buf.available() < CAP_HEADER_SIZE {
            // always use a timeout so this cannot block indefinitely even
            // with very little traffic
            let tv = timeout.or(Some(Duration::from_secs(1)));
            match buf.fill(src, tv, ctx) {
                Ok(Fill::Bytes(_)) => {}
                Ok(Fill::Eof) => return Ok(None),
                Err(Error::Timeout) => {
                    if buf.available() >= CAP_HEADER_SIZE {
                        // enough for a header; not an error
                    } else if blocking {
                        continue;
                    } else {
                        return Err(Error::Timeout);
                    }
                }
                Err(e) => return Err(e),
            }
            if buf.available() < CAP_HEADER_SIZE {
                continue;
            }
        }

        // top up without blocking to reduce load on the network buffers
        match buf.fill(src, Some(Duration::ZERO), ctx) {
            Ok(_) | Err(Error::Timeout) => {}
            Err(e) => return Err(e),
        }

        let head = CapHeader::parse(&buf.data[buf.read_pos..buf.write_pos])
            .expect("a full capture header is buffered");
        let packet_size = head.packet_size();

        if buf.available() < packet_size {
            match buf.fill(src, timeout, ctx) {
                Ok(Fill::Bytes(_)) => continue,
                // a truncated trailing packet reads as end of stream
                Ok(Fill::Eof) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let start = buf.read_pos + CAP_HEADER_SIZE;
        let end = buf.read_pos + packet_size;
        buf.read_pos = end;
        ctx.stat.read += 1;
        ctx.stat.buffer_usage = buf.available() as u64;

        if let Some(f) = filter.as_deref_mut() {
            if !f.matches(&CapPacket::new(head, &buf.data[start..end])) {
                continue;
            }
        }

        ctx.stat.matched += 1;
        return Ok(Some((head, start..end)));
    }
}

/// Non-blocking variant of [`buffered_read`] that does not pop the matched
/// packet.  Non-matching packets *are* discarded.
pub(crate) fn buffered_peek(
    buf: &mut ReadBuffer,
    src: &mut dyn ByteSource,
    ctx: &mut LinkCtx,
    mut filter: Option<&mut Filter>,
) -> Result<Option<(CapHeader, Range<usize>)>> {
    let zero = Some(Duration::ZERO);
    loop {
        if buf.available() < CAP_HEADER_SIZE {
            match buf.fill(src, zero, ctx)? {
                Fill::Bytes(0) => return Err(Error::Timeout),
                Fill::Bytes(_) => continue,
                Fill::Eof => return Ok(None),
            }
        }

        let head = CapHeader::parse(&buf.data[buf.read_pos..buf.write_pos])
            .expect("a full capture header is buffered");
        if head.caplen == 0 {
            return Err(Error::CapfileInvalid);
        }
        let packet_size = head.packet_size();

        if buf.available() < packet_size {
            match buf.fill(src, zero, ctx)? {
                Fill::Bytes(0) => return Err(Error::Timeout),
                Fill::Bytes(_) => continue,
                Fill::Eof => return Ok(None),
            }
        }

        let start = buf.read_pos + CAP_HEADER_SIZE;
        let end = buf.read_pos + packet_size;

        if let Some(f) = filter.as_deref_mut() {
            if !f.matches(&CapPacket::new(head, &buf.data[start..end])) {
                // discard the non-match; a following read would lose it too
                buf.read_pos = end;
                continue;
            }
        }

        return Ok(Some((head, start..end)));
    }
}

enum Backend {
    File(file::FileBackend),
    Tcp(tcp::TcpBackend),
    Udp(udp::UdpBackend),
    #[cfg(target_os = "linux")]
    Ethernet(ethernet::EthernetBackend),
}

/// A measurement stream handle.
///
/// Not safe to share between threads; use one stream per thread.  Packet
/// borrows returned by [`Stream::read`]/[`Stream::peek`] are valid until
/// the next call on the same stream.
pub struct Stream {
    backend: Backend,
    addr: StreamAddr,
    version: FileVersion,
    mpid: String,
    comment: Option<String>,
    stat: StreamStat,
    seq_policy: SeqPolicy,
    flushed: bool,
    loopback: bool,
    loopback_warned: bool,
}

impl Stream {
    /// Open an existing stream for reading.
    ///
    /// `iface` is required for Ethernet streams (and multicast UDP) and
    /// names the interface to listen on.  `buffer_size` of zero selects the
    /// backend default.
    pub fn open(addr: &StreamAddr, iface: Option<&str>, buffer_size: usize) -> Result<Stream> {
        let (backend, loopback) = match addr.kind() {
            AddrKind::Capfile(path) => (
                Backend::File(file::FileBackend::open_path(path, addr.flags(), buffer_size)?),
                false,
            ),
            AddrKind::Fifo(path) => {
                make_fifo(path)?;
                let backend = match file::FileBackend::open_path(path, addr.flags(), buffer_size) {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = std::fs::remove_file(path);
                        return Err(e);
                    }
                };
                (Backend::File(backend), false)
            }
            AddrKind::FilePointer(fd) => (
                Backend::File(file::FileBackend::open_fd(*fd, addr.flags(), buffer_size)?),
                false,
            ),
            #[cfg(target_os = "linux")]
            AddrKind::Ethernet(group) => {
                let iface = iface.ok_or(Error::InvalidIface)?;
                let (backend, loopback) =
                    ethernet::EthernetBackend::open(*group, iface, buffer_size)?;
                (Backend::Ethernet(backend), loopback)
            }
            #[cfg(not(target_os = "linux"))]
            AddrKind::Ethernet(_) => return Err(Error::NotImplemented),
            AddrKind::Udp(sa) => (Backend::Udp(udp::UdpBackend::open(*sa, iface)?), false),
            AddrKind::Tcp(sa) => (Backend::Tcp(tcp::TcpBackend::open(*sa)?), false),
        };

        let mut stream = Stream::assemble(backend, addr.clone(), loopback);
        if let Backend::File(f) = &stream.backend {
            stream.version = f.version();
            stream.mpid = f.mpid().to_owned();
            stream.comment = f.comment().map(str::to_owned);
        }
        Ok(stream)
    }

    /// Create a new stream for writing.
    ///
    /// `mpid` and `comment` are stored in the capture-file header; network
    /// backends carry the MP id per frame instead.
    pub fn create(
        addr: &StreamAddr,
        iface: Option<&str>,
        mpid: &str,
        comment: &str,
    ) -> Result<Stream> {
        let backend = match addr.kind() {
            AddrKind::Capfile(path) => Backend::File(file::FileBackend::create_path(
                path,
                addr.flags(),
                mpid,
                comment,
            )?),
            AddrKind::Fifo(path) => {
                make_fifo(path)?;
                match file::FileBackend::create_path(path, addr.flags(), mpid, comment) {
                    Ok(backend) => Backend::File(backend),
                    Err(e) => {
                        let _ = std::fs::remove_file(path);
                        return Err(e);
                    }
                }
            }
            AddrKind::FilePointer(fd) => Backend::File(file::FileBackend::create_fd(
                *fd,
                addr.flags(),
                mpid,
                comment,
            )?),
            #[cfg(target_os = "linux")]
            AddrKind::Ethernet(group) => {
                let iface = iface.ok_or(Error::InvalidIface)?;
                Backend::Ethernet(ethernet::EthernetBackend::create(*group, iface)?)
            }
            #[cfg(not(target_os = "linux"))]
            AddrKind::Ethernet(_) => return Err(Error::NotImplemented),
            AddrKind::Udp(sa) => Backend::Udp(udp::UdpBackend::create(*sa, iface)?),
            AddrKind::Tcp(_) => return Err(Error::NotImplemented),
        };

        let mut stream = Stream::assemble(backend, addr.clone(), false);
        stream.version = crate::wire::LIBRARY_VERSION;
        stream.mpid = mpid.chars().take(199).collect();
        stream.comment = Some(comment.to_owned());
        Ok(stream)
    }

    fn assemble(backend: Backend, addr: StreamAddr, loopback: bool) -> Stream {
        let mut stream = Stream {
            backend,
            addr,
            version: FileVersion::default(),
            mpid: String::new(),
            comment: None,
            stat: StreamStat::default(),
            seq_policy: SeqPolicy::default(),
            flushed: false,
            loopback,
            loopback_warned: false,
        };
        stream.stat.buffer_size = match &stream.backend {
            Backend::File(b) => b.buffer_capacity(),
            Backend::Tcp(b) => b.buffer_capacity(),
            Backend::Udp(b) => b.buffer_capacity(),
            #[cfg(target_os = "linux")]
            Backend::Ethernet(b) => b.buffer_capacity(),
        };
        stream
    }

    /// Add another source address to the stream.  Valid only for Ethernet
    /// and UDP multicast streams; at most 100 addresses per stream.
    pub fn add(&mut self, addr: &StreamAddr) -> Result<()> {
        match (&mut self.backend, addr.kind()) {
            #[cfg(target_os = "linux")]
            (Backend::Ethernet(b), AddrKind::Ethernet(group)) => b.add(*group),
            (Backend::Udp(b), AddrKind::Udp(sa)) => b.add(*sa.ip()),
            _ => Err(Error::InvalidProtocol),
        }
    }

    /// How sequence-number mismatches are handled (default: log and
    /// resynchronise).
    pub fn set_seq_policy(&mut self, policy: SeqPolicy) {
        self.seq_policy = policy;
    }

    /// Read the next matching packet.
    ///
    /// Blocks up to `timeout` (`None` blocks until data arrives; the
    /// implementation polls internally so signal handlers can interrupt the
    /// caller's loop within a second).  Returns `Ok(None)` at end of
    /// stream, `Err(Error::Timeout)` when the timeout expired and the
    /// packet otherwise.  The borrow is valid until the next call on this
    /// stream.
    pub fn read(
        &mut self,
        filter: Option<&mut Filter>,
        timeout: Option<Duration>,
    ) -> Result<Option<CapPacket<'_>>> {
        let mut ctx = LinkCtx {
            stat: &mut self.stat,
            flushed: &mut self.flushed,
            policy: self.seq_policy,
            loopback: self.loopback,
            loopback_warned: &mut self.loopback_warned,
        };
        match &mut self.backend {
            Backend::File(b) => {
                let (buf, link) = b.split();
                match buffered_read(buf, link, &mut ctx, filter, timeout)? {
                    Some((head, range)) => Ok(Some(CapPacket::new(head, &buf.data[range]))),
                    None => Ok(None),
                }
            }
            Backend::Tcp(b) => {
                let (buf, link) = b.split();
                match buffered_read(buf, link, &mut ctx, filter, timeout)? {
                    Some((head, range)) => Ok(Some(CapPacket::new(head, &buf.data[range]))),
                    None => Ok(None),
                }
            }
            Backend::Udp(b) => {
                let (fb, link) = b.split();
                match fb.read(link, &mut ctx, filter, timeout)? {
                    Some((head, cell, range)) => {
                        Ok(Some(CapPacket::new(head, fb.payload(cell, range))))
                    }
                    None => Ok(None),
                }
            }
            #[cfg(target_os = "linux")]
            Backend::Ethernet(b) => {
                let (fb, link) = b.split();
                match fb.read(link, &mut ctx, filter, timeout)? {
                    Some((head, cell, range)) => {
                        Ok(Some(CapPacket::new(head, fb.payload(cell, range))))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Like [`Stream::read`] but never blocks and does not pop the matched
    /// packet from the stream.  Non-matching packets are discarded, exactly
    /// as a read with the same filter would.
    ///
    /// Only supported for buffered byte streams (files, TCP).
    pub fn peek(&mut self, filter: Option<&mut Filter>) -> Result<Option<CapPacket<'_>>> {
        let mut ctx = LinkCtx {
            stat: &mut self.stat,
            flushed: &mut self.flushed,
            policy: self.seq_policy,
            loopback: self.loopback,
            loopback_warned: &mut self.loopback_warned,
        };
        match &mut self.backend {
            Backend::File(b) => {
                let (buf, link) = b.split();
                match buffered_peek(buf, link, &mut ctx, filter)? {
                    Some((head, range)) => Ok(Some(CapPacket::new(head, &buf.data[range]))),
                    None => Ok(None),
                }
            }
            Backend::Tcp(b) => {
                let (buf, link) = b.split();
                match buffered_peek(buf, link, &mut ctx, filter)? {
                    Some((head, range)) => Ok(Some(CapPacket::new(head, &buf.data[range]))),
                    None => Ok(None),
                }
            }
            _ => Err(Error::NotImplemented),
        }
    }

    /// Read packets until the stream ends, applying `callback` to each
    /// matching packet.  The callback returns `false` to stop early.
    /// Timeouts are used internally so the loop remains interruptible.
    pub fn for_each<F>(&mut self, mut filter: Option<&mut Filter>, mut callback: F) -> Result<()>
    where
        F: FnMut(&CapPacket) -> bool,
    {
        loop {
            match self.read(filter.as_deref_mut(), Some(Duration::from_secs(1))) {
                Ok(Some(pkt)) => {
                    if !callback(&pkt) {
                        return Ok(());
                    }
                }
                Ok(None) => return Ok(()),
                Err(Error::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Write a captured frame (capture header plus payload) to the stream.
    /// For network backends the data must be a complete pre-built
    /// measurement frame no larger than the MTU.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            warn!("write called with invalid size 0");
            return Err(Error::invalid_input("zero-size write"));
        }
        match &mut self.backend {
            Backend::File(b) => b.write(data),
            Backend::Udp(b) => b.write(data),
            #[cfg(target_os = "linux")]
            Backend::Ethernet(b) => b.write(data),
            Backend::Tcp(_) => Err(Error::NotImplemented),
        }
    }

    /// Write a capture header and its payload from separate buffers.
    /// Should only be used with capfiles.
    pub fn write_separate(&mut self, head: &CapHeader, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            warn!("write called with invalid size 0");
            return Err(Error::invalid_input("zero-size write"));
        }
        self.write_all_parts(head, payload)
    }

    fn write_all_parts(&mut self, head: &CapHeader, payload: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(CAP_HEADER_SIZE + payload.len());
        head.put(&mut buf);
        buf.extend_from_slice(payload);
        self.write(&buf)
    }

    /// Copy a capture packet into the stream: header plus `caplen` payload
    /// bytes.
    pub fn copy(&mut self, pkt: &CapPacket) -> Result<()> {
        self.write_all_parts(&pkt.head, &pkt.payload[..pkt.head.caplen as usize])
    }

    /// Force flushing of an output stream.  No-op for backends without
    /// buffered output.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.backend {
            Backend::File(b) => b.flush(),
            _ => Ok(()),
        }
    }

    /// Stream statistics.
    pub fn stats(&self) -> &StreamStat {
        &self.stat
    }

    /// File-format version of the stream (zero until known).
    pub fn version(&self) -> FileVersion {
        self.version
    }

    /// MAMPid of the stream, empty if unknown.
    pub fn mampid(&self) -> &str {
        &self.mpid
    }

    /// The stream comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// The address this stream was opened or created with.
    pub fn addr(&self) -> &StreamAddr {
        &self.addr
    }

    /// Number of source addresses associated with this stream.
    pub fn num_addresses(&self) -> usize {
        match &self.backend {
            Backend::File(_) => 1,
            Backend::Tcp(_) => 1,
            Backend::Udp(b) => b.num_addresses(),
            #[cfg(target_os = "linux")]
            Backend::Ethernet(b) => b.num_addresses(),
        }
    }

    /// Print information about the stream.
    pub fn print_info(&self, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "{} capstream {} stream", self.addr, self.version)?;
        writeln!(
            w,
            "     mpid: {}",
            if self.mpid.is_empty() { "(unset)" } else { &self.mpid }
        )?;
        writeln!(w, "  comment: {}", self.comment.as_deref().unwrap_or("(unset)"))
    }

    /// Close the stream, releasing sockets and files.  Equivalent to
    /// dropping but reports flush errors.
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

fn make_fifo(path: &std::path::Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Error::invalid_input("path contains NUL"))?;
    if unsafe { libc::mkfifo(cpath.as_ptr(), 0o660) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EEXIST) {
            return Err(Error::CapfileFifoExist);
        }
        return Err(err.into());
    }
    Ok(())
}
