//! The TCP backend.
//!
//! On the wire a TCP stream is a send-header preamble followed by
//! measurement frames, each prefixed with its own send header.  The reader
//! strips the send headers while filling the byte buffer, tracking how many
//! packets remain in the current frame, so downstream consumption sees a
//! plain sequence of capture packets.  When the connection closes the
//! stream reaches end-of-file once the residual packets are delivered.
//!
//! Only the reading side exists; creating a TCP stream is not implemented
//! until a corresponding sender exists.

use super::{match_inc_seqnr, poll_read, ByteSource, LinkCtx, ReadBuffer};
use crate::capture::{CapHeader, CAP_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::wire::{SendHeader, SEND_HEADER_SIZE};
use std::io::{self, Read};
use std::net::{SocketAddrV4, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BUFFER_SIZE: usize = 175000;

/// Re-framing state machine.
enum Reframe {
    /// Waiting for the next send header (including the preamble).
    SendHeader,
    /// Waiting for the next capture header within the current frame.
    CapHeader { packets_left: u32 },
    /// Streaming the body of a capture packet through to the buffer.
    Payload { packets_left: u32, bytes_left: usize },
}

pub(super) struct TcpLink {
    sock: TcpStream,
    state: Reframe,
    /// Raw bytes received but not yet consumed by the state machine.
    raw: Vec<u8>,
    seqnum: u32,
    version_checked: bool,
}

pub(super) struct TcpBackend {
    link: TcpLink,
    buf: ReadBuffer,
}

impl TcpBackend {
    /// Listen on the address and accept a single sender.
    pub fn open(addr: SocketAddrV4) -> Result<TcpBackend> {
        let listener = TcpListener::bind(addr)?;
        let (sock, peer) = listener.accept()?;
        debug!(%peer, "accepted measurement stream sender");

        Ok(TcpBackend {
            link: TcpLink {
                sock,
                state: Reframe::SendHeader,
                raw: Vec::new(),
                seqnum: 0,
                version_checked: false,
            },
            buf: ReadBuffer::new(DEFAULT_BUFFER_SIZE),
        })
    }

    pub fn split(&mut self) -> (&mut ReadBuffer, &mut TcpLink) {
        (&mut self.buf, &mut self.link)
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.buf.data.len() as u64
    }
}

impl TcpLink {
    /// Consume buffered raw bytes, emitting packet bytes into `dst`.
    /// Returns the number of bytes written.
    fn drain(&mut self, dst: &mut [u8], ctx: &mut LinkCtx) -> usize {
        let mut consumed = 0;
        let mut written = 0;

        loop {
            let pending = &self.raw[consumed..];
            match self.state {
                Reframe::SendHeader => {
                    let Some(sh) = SendHeader::parse(pending) else {
                        break;
                    };
                    consumed += SEND_HEADER_SIZE;

                    if !self.version_checked {
                        // tolerate a zeroed preamble from older senders
                        if sh.version != (0, 0) && !sh.file_version().supported() {
                            warn!(
                                version = %sh.file_version(),
                                "invalid stream version on TCP stream"
                            );
                        }
                        self.version_checked = true;
                        self.seqnum = sh.sequence;
                    }
                    match_inc_seqnr(ctx, &mut self.seqnum, sh.sequence);
                    ctx.stat.recv += sh.nopkts as u64;

                    if sh.flush() {
                        info!("sender terminated");
                        *ctx.flushed = true;
                    }

                    self.state = if sh.nopkts > 0 {
                        Reframe::CapHeader {
                            packets_left: sh.nopkts,
                        }
                    } else {
                        Reframe::SendHeader
                    };
                }

                Reframe::CapHeader { packets_left } => {
                    if written + CAP_HEADER_SIZE > dst.len() {
                        break;
                    }
                    let Some(head) = CapHeader::parse(pending) else {
                        break;
                    };
                    dst[written..written + CAP_HEADER_SIZE]
                        .copy_from_slice(&pending[..CAP_HEADER_SIZE]);
                    written += CAP_HEADER_SIZE;
                    consumed += CAP_HEADER_SIZE;
                    self.state = Reframe::Payload {
                        packets_left,
                        bytes_left: head.caplen as usize,
                    };
                }

                Reframe::Payload {
                    packets_left,
                    bytes_left,
                } => {
                    let n = bytes_left.min(pending.len()).min(dst.len() - written);
                    dst[written..written + n].copy_from_slice(&pending[..n]);
                    written += n;
                    consumed += n;

                    let bytes_left = bytes_left - n;
                    if bytes_left > 0 {
                        // out of input or output space
                        self.state = Reframe::Payload {
                            packets_left,
                            bytes_left,
                        };
                        break;
                    }
                    self.state = if packets_left > 1 {
                        Reframe::CapHeader {
                            packets_left: packets_left - 1,
                        }
                    } else {
                        Reframe::SendHeader
                    };
                }
            }

            if consumed == self.raw.len() && written == dst.len() {
                break;
            }
        }

        self.raw.drain(..consumed);
        written
    }
}

impl ByteSource for TcpLink {
    fn fill(
        &mut self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<usize> {
        if dst.is_empty() {
            // a packet larger than the stream buffer cannot be delivered
            warn!("capture packet exceeds the stream buffer, closing stream");
            return Ok(0);
        }

        // flush whatever the state machine already holds
        let written = self.drain(dst, ctx);
        if written > 0 {
            return Ok(written);
        }

        loop {
            if !poll_read(self.sock.as_raw_fd(), timeout)? {
                return Err(Error::Timeout);
            }

            let mut chunk = [0u8; 8192];
            let n = match self.sock.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if !self.raw.is_empty() {
                    warn!("connection closed mid-frame, discarding residual bytes");
                }
                return Ok(0); // orderly shutdown
            }
            self.raw.extend_from_slice(&chunk[..n]);

            let written = self.drain(dst, ctx);
            if written > 0 {
                return Ok(written);
            }
            // not enough yet for a whole header; keep reading
        }
    }
}
