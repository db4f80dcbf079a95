//! The stream frame buffer.
//!
//! Network backends receive whole measurement frames but consumers read one
//! capture packet at a time.  The buffer holds a bounded ring of fixed-size
//! cells, each storing one validated measurement frame, plus a cursor into
//! the frame currently being consumed.  Whenever a packet is popped the
//! buffer opportunistically tops itself up with a zero-timeout read to keep
//! pressure off the kernel buffers.

use super::{LinkCtx, StreamStat};
use crate::capture::{CapHeader, CapPacket, CAP_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::wire::{SendHeader, SEND_HEADER_SIZE};
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, trace};

/// A backend able to produce complete measurement frames.
///
/// `read_frame` writes one whole frame (link header, send header and
/// packets) into `dst` and returns its size, or `None` on timeout.  The
/// implementation performs frame validation and sequence accounting through
/// `ctx` before handing the frame over.
pub(crate) trait FrameSource {
    fn read_frame(
        &mut self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<Option<usize>>;
}

pub(crate) struct FrameBuffer {
    cells: Vec<Box<[u8]>>,
    used: Vec<usize>,
    frame_size: usize,
    /// Offset of the send header within a frame (the link header size).
    header_offset: usize,
    read_pos: usize,
    write_pos: usize,
    /// Cursor into the current frame, `None` while no frame is in progress.
    cursor: Option<usize>,
    /// Packets left in the current frame.
    num_packets: u32,
}

impl FrameBuffer {
    pub fn new(num_frames: usize, frame_size: usize, header_offset: usize) -> FrameBuffer {
        FrameBuffer {
            cells: (0..num_frames)
                .map(|_| vec![0u8; frame_size].into_boxed_slice())
                .collect(),
            used: vec![0; num_frames],
            frame_size,
            header_offset,
            read_pos: 0,
            write_pos: 0,
            cursor: None,
            num_packets: 0,
        }
    }

    /// Total buffer capacity in bytes.
    pub fn capacity(&self) -> u64 {
        (self.cells.len() * self.frame_size) as u64
    }

    fn buffered_frames(&self) -> usize {
        (self.write_pos + self.cells.len() - self.read_pos) % self.cells.len()
    }

    /// Pull one frame from the link into the write cell.
    fn fill_one(
        &mut self,
        src: &mut dyn FrameSource,
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<bool> {
        let cell = self.write_pos;
        match src.read_frame(&mut self.cells[cell], timeout, ctx)? {
            Some(bytes) => {
                self.used[cell] = bytes;
                self.write_pos = (self.write_pos + 1) % self.cells.len();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Position the cursor at the first packet of the frame at `read_pos`,
    /// skipping degenerate frames without packets.
    fn load_frame(&mut self) {
        while self.read_pos != self.write_pos {
            let frame = &self.cells[self.read_pos][..self.used[self.read_pos]];
            match SendHeader::parse(&frame[self.header_offset.min(frame.len())..]) {
                Some(sh) if sh.nopkts > 0 => {
                    self.cursor = Some(self.header_offset + SEND_HEADER_SIZE);
                    self.num_packets = sh.nopkts;
                    return;
                }
                _ => {
                    trace!("skipping measurement frame without packets");
                    self.read_pos = (self.read_pos + 1) % self.cells.len();
                }
            }
        }
        self.cursor = None;
    }

    fn advance_frame(&mut self) {
        self.read_pos = (self.read_pos + 1) % self.cells.len();
        self.load_frame();
    }

    fn update_usage(&self, stat: &mut StreamStat) {
        stat.buffer_usage = (self.buffered_frames() * self.frame_size) as u64;
    }

    /// Read the next matching packet.
    ///
    /// Returns indices into the buffer (`cell`, payload range) so the caller
    /// can borrow the payload after this call.  `Ok(None)` once the sender
    /// has flushed and the buffer is drained; `Err(Timeout)` when no frame
    /// arrived in time.
    pub fn read(
        &mut self,
        src: &mut dyn FrameSource,
        ctx: &mut LinkCtx,
        mut filter: Option<&mut Filter>,
        timeout: Option<Duration>,
    ) -> Result<Option<(CapHeader, usize, Range<usize>)>> {
        let blocking = timeout.is_none();
        // poll in one-second slices when blocking so the caller's loop can
        // be brought down by a signal handler within a second
        let tv = timeout.or(Some(Duration::from_secs(1)));

        loop {
            // buffer empty: block for the next frame
            if self.cursor.is_none() {
                if *ctx.flushed {
                    return Ok(None);
                }
                if !self.fill_one(src, tv, ctx)? {
                    if *ctx.flushed {
                        return Ok(None);
                    }
                    if blocking {
                        continue;
                    }
                    return Err(Error::Timeout);
                }
                self.load_frame();
                if self.cursor.is_none() {
                    continue;
                }
            }

            // keep the buffer full; never wait here
            if self.write_pos != self.read_pos && !*ctx.flushed {
                let _ = self.fill_one(src, Some(Duration::ZERO), ctx);
            }

            let cell = self.read_pos;
            let frame_len = self.used[cell];
            let cursor = self.cursor.expect("frame in progress");

            let head = match CapHeader::parse(&self.cells[cell][cursor..frame_len]) {
                Some(head) => head,
                None => {
                    debug!("capture header past frame end, dropping frame");
                    self.advance_frame();
                    continue;
                }
            };
            let start = cursor + CAP_HEADER_SIZE;
            let end = start + head.caplen as usize;
            if end > frame_len {
                debug!("capture payload past frame end, dropping frame");
                self.advance_frame();
                continue;
            }

            self.num_packets -= 1;
            self.cursor = Some(end);
            if self.num_packets == 0 {
                self.advance_frame();
            }

            ctx.stat.read += 1;
            self.update_usage(ctx.stat);

            if let Some(f) = filter.as_deref_mut() {
                if !f.matches(&CapPacket::new(head, &self.cells[cell][start..end])) {
                    continue;
                }
            }

            ctx.stat.matched += 1;
            return Ok(Some((head, cell, start..end)));
        }
    }

    /// Borrow a payload range returned by [`FrameBuffer::read`].
    pub fn payload(&self, cell: usize, range: Range<usize>) -> &[u8] {
        &self.cells[cell][range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SeqPolicy;
    use crate::time::Picotime;
    use crate::wire::valid_frame;
    use bytes::BufMut;
    use std::collections::VecDeque;

    /// Feeds pre-built frames like a link backend would, including frame
    /// validation, accounting and the flush flag.
    struct FakeLink {
        frames: VecDeque<Vec<u8>>,
        seqnum: u32,
    }

    impl FrameSource for FakeLink {
        fn read_frame(
            &mut self,
            dst: &mut [u8],
            _timeout: Option<Duration>,
            ctx: &mut LinkCtx,
        ) -> Result<Option<usize>> {
            let Some(frame) = self.frames.pop_front() else {
                return Ok(None);
            };
            let Some(sh) = valid_frame(&frame, 0) else {
                return Ok(None);
            };
            ctx.stat.recv += sh.nopkts as u64;
            crate::stream::match_inc_seqnr(ctx, &mut self.seqnum, sh.sequence);
            if sh.flush() {
                *ctx.flushed = true;
            }
            dst[..frame.len()].copy_from_slice(&frame);
            Ok(Some(frame.len()))
        }
    }

    fn frame(seq: u32, payload_sizes: &[u32], flags: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        SendHeader::new(seq, payload_sizes.len() as u32, flags).put(&mut buf);
        for (i, caplen) in payload_sizes.iter().enumerate() {
            CapHeader::new(
                "eth0",
                "mp",
                Picotime::new(i as u32, 0),
                *caplen,
                *caplen,
            )
            .put(&mut buf);
            buf.put_bytes(i as u8, *caplen as usize);
        }
        buf
    }

    fn ctx<'a>(
        stat: &'a mut StreamStat,
        flushed: &'a mut bool,
        warned: &'a mut bool,
    ) -> LinkCtx<'a> {
        LinkCtx {
            stat,
            flushed,
            policy: SeqPolicy::Log,
            loopback: false,
            loopback_warned: warned,
        }
    }

    #[test]
    fn packets_are_delivered_in_order() {
        let mut link = FakeLink {
            frames: VecDeque::from(vec![
                frame(0, &[10, 20], 0),
                frame(1, &[30], crate::wire::SENDER_FLUSH),
            ]),
            seqnum: 0,
        };
        let mut fb = FrameBuffer::new(4, 2048, 0);
        let mut stat = StreamStat::default();
        let mut flushed = false;
        let mut warned = false;

        let mut sizes = Vec::new();
        loop {
            let mut c = ctx(&mut stat, &mut flushed, &mut warned);
            match fb.read(&mut link, &mut c, None, None) {
                Ok(Some((head, cell, range))) => {
                    assert_eq!(fb.payload(cell, range.clone()).len(), head.caplen as usize);
                    sizes.push(head.caplen);
                }
                Ok(None) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(sizes, vec![10, 20, 30]);
        assert_eq!(stat.recv, 3);
        assert_eq!(stat.read, 3);
        assert_eq!(stat.matched, 3);
    }

    #[test]
    fn empty_link_times_out() {
        let mut link = FakeLink {
            frames: VecDeque::new(),
            seqnum: 0,
        };
        let mut fb = FrameBuffer::new(4, 2048, 0);
        let mut stat = StreamStat::default();
        let mut flushed = false;
        let mut warned = false;
        let mut c = ctx(&mut stat, &mut flushed, &mut warned);
        assert!(matches!(
            fb.read(&mut link, &mut c, None, Some(Duration::ZERO)),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn filter_skips_packets() {
        let mut link = FakeLink {
            frames: VecDeque::from(vec![frame(0, &[60, 60, 60], crate::wire::SENDER_FLUSH)]),
            seqnum: 0,
        };
        let mut fb = FrameBuffer::new(4, 2048, 0);
        let mut stat = StreamStat::default();
        let mut flushed = false;
        let mut warned = false;

        // frames built by `frame` are not IP packets so any port filter
        // rejects them all
        let mut filter = Filter::new();
        filter.dst_port_set(53, 0xffff);

        let mut c = ctx(&mut stat, &mut flushed, &mut warned);
        let result = fb.read(&mut link, &mut c, Some(&mut filter), None);
        assert!(matches!(result, Ok(None)));
        assert_eq!(stat.read, 3);
        assert_eq!(stat.matched, 0);
    }

    #[test]
    fn sequence_gap_is_not_fatal() {
        let mut link = FakeLink {
            frames: VecDeque::from(vec![
                frame(10, &[10], 0),
                frame(13, &[20], crate::wire::SENDER_FLUSH),
            ]),
            seqnum: 0,
        };
        let mut fb = FrameBuffer::new(4, 2048, 0);
        let mut stat = StreamStat::default();
        let mut flushed = false;
        let mut warned = false;

        let mut sizes = Vec::new();
        loop {
            let mut c = ctx(&mut stat, &mut flushed, &mut warned);
            match fb.read(&mut link, &mut c, None, None) {
                Ok(Some((head, _, _))) => sizes.push(head.caplen),
                Ok(None) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        // both frames delivered despite the gap
        assert_eq!(sizes, vec![10, 20]);
        assert_eq!(stat.recv, 2);
    }
}
