//! The raw-socket Ethernet multicast backend (Linux only).
//!
//! Measurement frames arrive as Ethernet frames with EtherType 0x0810 sent
//! to one or more multicast groups.  The socket is bound to a specific
//! interface; each added group joins the multicast membership on that
//! interface.

use super::{match_inc_seqnr, poll_read, FrameBuffer, FrameSource, LinkCtx};
use crate::address::EtherAddr;
use crate::error::{Error, Result};
use crate::iface::Iface;
use crate::wire::{valid_frame, EthernetHeader, ETHERTYPE_MP, ETH_HEADER_SIZE};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_ADDRESS: usize = 100;

/// Default buffer: 250 frames worth of MTU.
const DEFAULT_FRAMES: usize = 250;

/// linux/if_packet.h: frames sent to a link-layer multicast address.
const PACKET_MULTICAST: libc::c_uchar = 2;

/// linux/if_packet.h: multicast membership request type.
const PACKET_MR_MULTICAST: libc::c_ushort = 0;

pub(super) struct EthernetLink {
    fd: RawFd,
    if_index: i32,
    mtu: usize,
    hwaddr: EtherAddr,
    addresses: Vec<EtherAddr>,
    seqnum: Vec<u32>,
}

pub(super) struct EthernetBackend {
    link: EthernetLink,
    fb: FrameBuffer,
}

fn open_socket(protocol: u16) -> Result<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            (protocol as u16).to_be() as i32,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(fd)
}

fn sockaddr_ll(if_index: i32, protocol: u16, hwaddr: &EtherAddr) -> libc::sockaddr_ll {
    let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    sll.sll_family = libc::AF_PACKET as u16;
    sll.sll_ifindex = if_index;
    sll.sll_protocol = (protocol).to_be();
    sll.sll_pkttype = PACKET_MULTICAST;
    sll.sll_halen = 6;
    sll.sll_addr[..6].copy_from_slice(&hwaddr.0);
    sll
}

impl EthernetLink {
    fn init(group: EtherAddr, iface: &str, protocol: u16, buffer_size: usize) -> Result<(EthernetBackend, bool)> {
        let ifstat = Iface::query(iface)?;
        let mtu = ifstat.mtu;

        let buffer_size = if buffer_size == 0 {
            DEFAULT_FRAMES * mtu
        } else {
            buffer_size
        };
        if buffer_size < mtu {
            return Err(Error::BufferLength);
        }
        if buffer_size % mtu != 0 {
            return Err(Error::BufferMultiple);
        }
        let num_frames = buffer_size / mtu;

        let fd = open_socket(protocol)?;
        let sll = sockaddr_ll(ifstat.index, protocol, &ifstat.hwaddr);
        let ret = unsafe {
            libc::bind(
                fd,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret == -1 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err.into());
        }

        let mut backend = EthernetBackend {
            link: EthernetLink {
                fd,
                if_index: ifstat.index,
                mtu,
                hwaddr: ifstat.hwaddr,
                addresses: Vec::new(),
                seqnum: Vec::new(),
            },
            // one cell holds a full frame: link header plus MTU
            fb: FrameBuffer::new(num_frames, mtu + ETH_HEADER_SIZE, ETH_HEADER_SIZE),
        };
        backend.add(group)?;
        Ok((backend, ifstat.loopback))
    }
}

impl EthernetBackend {
    /// Open a reading stream: receive everything on the interface and
    /// filter on EtherType and destination group in software.
    pub fn open(group: EtherAddr, iface: &str, buffer_size: usize) -> Result<(EthernetBackend, bool)> {
        EthernetLink::init(group, iface, libc::ETH_P_ALL as u16, buffer_size)
    }

    /// Open a writing stream bound to the MP EtherType.
    pub fn create(group: EtherAddr, iface: &str) -> Result<EthernetBackend> {
        let (backend, _) = EthernetLink::init(group, iface, ETHERTYPE_MP, 0)?;
        Ok(backend)
    }

    /// Join another multicast group on the same socket.
    pub fn add(&mut self, group: EtherAddr) -> Result<()> {
        if self.link.addresses.len() == MAX_ADDRESS {
            return Err(io::Error::from_raw_os_error(libc::EBUSY).into());
        }
        if !group.is_multicast() {
            return Err(Error::InvalidMulticast);
        }

        let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
        mreq.mr_ifindex = self.link.if_index;
        mreq.mr_type = PACKET_MR_MULTICAST;
        mreq.mr_alen = 6;
        mreq.mr_address[..6].copy_from_slice(&group.0);

        debug!(group = %group, "joining ethernet multicast group");
        let ret = unsafe {
            libc::setsockopt(
                self.link.fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error().into());
        }

        self.link.addresses.push(group);
        self.link.seqnum.push(0);
        Ok(())
    }

    pub fn num_addresses(&self) -> usize {
        self.link.addresses.len()
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.fb.capacity()
    }

    pub fn split(&mut self) -> (&mut FrameBuffer, &mut EthernetLink) {
        (&mut self.fb, &mut self.link)
    }

    /// Send one pre-built measurement frame.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.link.mtu + ETH_HEADER_SIZE {
            warn!(
                "packet is larger ({}) than MTU ({}), ignoring",
                data.len(),
                self.link.mtu
            );
            return Err(Error::invalid_input("frame exceeds MTU"));
        }
        let sll = sockaddr_ll(self.link.if_index, ETHERTYPE_MP, &self.link.hwaddr);
        let ret = unsafe {
            libc::sendto(
                self.link.fd,
                data.as_ptr() as *const libc::c_void,
                data.len(),
                0,
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl EthernetLink {
    /// Index of the joined group a frame was sent to, or `None` for
    /// unrelated traffic.
    fn match_ma_frame(&self, eth: &EthernetHeader) -> Option<usize> {
        if eth.ether_type != ETHERTYPE_MP {
            return None;
        }
        self.addresses
            .iter()
            .position(|group| group.0 == eth.dest)
    }
}

impl FrameSource for EthernetLink {
    fn read_frame(
        &mut self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<Option<usize>> {
        loop {
            if !poll_read(self.fd, timeout)? {
                return Ok(None);
            }

            let bytes = unsafe {
                libc::recvfrom(
                    self.fd,
                    dst.as_mut_ptr() as *mut libc::c_void,
                    dst.len(),
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if bytes < 0 {
                return Err(io::Error::last_os_error().into());
            }
            if bytes == 0 {
                return Ok(None);
            }
            let frame = &dst[..bytes as usize];

            let Some(eth) = EthernetHeader::parse(frame) else {
                continue;
            };
            let Some(source) = self.match_ma_frame(&eth) else {
                continue;
            };
            let Some(sh) = valid_frame(frame, ETH_HEADER_SIZE) else {
                continue;
            };

            ctx.stat.recv += sh.nopkts as u64;

            // before the first frame is accepted, verify the stream version
            if self.seqnum[source] == 0 {
                if !sh.file_version().supported() {
                    warn!(
                        version = %sh.file_version(),
                        "invalid stream version, dropping frame"
                    );
                    continue;
                }
                self.seqnum[source] = sh.sequence;
            }
            match_inc_seqnr(ctx, &mut self.seqnum[source], sh.sequence);

            if sh.flush() {
                info!("sender terminated");
                *ctx.flushed = true;
            }

            return Ok(Some(bytes as usize));
        }
    }
}

impl Drop for EthernetLink {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
