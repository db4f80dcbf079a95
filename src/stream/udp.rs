//! The UDP backend.
//!
//! Frames are laid out like Ethernet measurement frames but without the
//! link header: the send header sits at offset zero of each datagram.
//! Sources are identified by the IPv4 source address of the datagram and
//! sequence numbers are tracked per source.

use super::{match_inc_seqnr, poll_read, FrameBuffer, FrameSource, LinkCtx};
use crate::error::{Error, Result};
use crate::wire::valid_frame;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_ADDRESS: usize = 100;
const DEFAULT_FRAMES: usize = 250;
const FALLBACK_MTU: usize = 1500;

fn is_multicast(addr: Ipv4Addr) -> bool {
    addr.is_multicast()
}

/// Create a UDP socket with the reuse/broadcast options set before bind.
fn udp_socket() -> Result<UdpSocket> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let on: libc::c_int = 1;
    for opt in [libc::SO_REUSEADDR, libc::SO_BROADCAST] {
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &on as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
    Ok(unsafe { UdpSocket::from_raw_fd(fd) })
}

fn bind(sock: &UdpSocket, addr: SocketAddrV4) -> Result<()> {
    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    };
    let ret = unsafe {
        libc::bind(
            sock.as_raw_fd(),
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if ret == -1 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}

/// Path MTU towards the destination: ask the kernel after a connect, or
/// query the interface when one is named.  Falls back to 1500.
fn estimate_mtu(addr: SocketAddrV4, iface: Option<&str>) -> usize {
    #[cfg(target_os = "linux")]
    {
        if let Some(name) = iface {
            match crate::iface::Iface::query(name) {
                Ok(ifstat) => return ifstat.mtu,
                Err(e) => {
                    warn!("failed to query interface {name}: {e}");
                }
            }
        }

        let probe = || -> io::Result<usize> {
            let sock = UdpSocket::bind("0.0.0.0:0")?;
            sock.connect(addr)?;
            let mut mtu: libc::c_int = 0;
            let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
            let ret = unsafe {
                libc::getsockopt(
                    sock.as_raw_fd(),
                    libc::IPPROTO_IP,
                    libc::IP_MTU,
                    &mut mtu as *mut libc::c_int as *mut libc::c_void,
                    &mut len,
                )
            };
            if ret == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(mtu as usize)
        };
        match probe() {
            Ok(mtu) => mtu,
            Err(e) => {
                warn!("failed to estimate MTU, defaulting to {FALLBACK_MTU}: {e}");
                FALLBACK_MTU
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (addr, iface);
        FALLBACK_MTU
    }
}

pub(super) struct UdpLink {
    sock: UdpSocket,
    if_index: i32,
    mtu: usize,
    addresses: Vec<Ipv4Addr>,
    seqnum: Vec<u32>,
}

pub(super) struct UdpBackend {
    link: UdpLink,
    fb: FrameBuffer,
}

impl UdpBackend {
    fn init(sock: UdpSocket, mtu: usize, if_index: i32) -> UdpBackend {
        UdpBackend {
            link: UdpLink {
                sock,
                if_index,
                mtu,
                addresses: Vec::new(),
                seqnum: Vec::new(),
            },
            // the send header sits at offset 0: no link header
            fb: FrameBuffer::new(DEFAULT_FRAMES, mtu, 0),
        }
    }

    /// Open a reading stream.  Multicast addresses require an interface
    /// (for the membership and the MTU); unicast listens on the given
    /// address directly.
    pub fn open(addr: SocketAddrV4, iface: Option<&str>) -> Result<UdpBackend> {
        if is_multicast(*addr.ip()) && iface.is_none() {
            warn!("multicasting requires a capture interface");
            return Err(Error::InvalidIface);
        }

        let mtu = estimate_mtu(addr, iface);
        let sock = udp_socket()?;

        let bind_ip = if is_multicast(*addr.ip()) {
            Ipv4Addr::UNSPECIFIED
        } else {
            *addr.ip()
        };
        bind(&sock, SocketAddrV4::new(bind_ip, addr.port()))?;

        #[cfg(target_os = "linux")]
        let if_index = match iface {
            Some(name) => crate::iface::Iface::query(name)?.index,
            None => 0,
        };
        #[cfg(not(target_os = "linux"))]
        let if_index = 0;

        let mut backend = Self::init(sock, mtu, if_index);
        if is_multicast(*addr.ip()) {
            backend.add(*addr.ip())?;
        }
        Ok(backend)
    }

    /// Create a writing stream connected to the destination.
    pub fn create(addr: SocketAddrV4, iface: Option<&str>) -> Result<UdpBackend> {
        let mtu = estimate_mtu(addr, iface);
        let sock = udp_socket()?;
        sock.connect(addr)?;
        Ok(Self::init(sock, mtu, 0))
    }

    /// Track another source address; multicast groups are joined on the
    /// socket.
    pub fn add(&mut self, addr: Ipv4Addr) -> Result<()> {
        if self.link.addresses.len() == MAX_ADDRESS {
            return Err(io::Error::from_raw_os_error(libc::EBUSY).into());
        }
        if !is_multicast(addr) {
            return Err(Error::InvalidMulticast);
        }

        debug!(group = %addr, "joining IP multicast group");
        #[cfg(target_os = "linux")]
        {
            let mreq = libc::ip_mreqn {
                imr_multiaddr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(addr.octets()),
                },
                imr_address: libc::in_addr { s_addr: 0 },
                imr_ifindex: self.link.if_index,
            };
            let ret = unsafe {
                libc::setsockopt(
                    self.link.sock.as_raw_fd(),
                    libc::IPPROTO_IP,
                    libc::IP_ADD_MEMBERSHIP,
                    &mreq as *const libc::ip_mreqn as *const libc::c_void,
                    std::mem::size_of::<libc::ip_mreqn>() as libc::socklen_t,
                )
            };
            if ret == -1 {
                return Err(io::Error::last_os_error().into());
            }
        }
        #[cfg(not(target_os = "linux"))]
        self.link
            .sock
            .join_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED)?;

        self.link.addresses.push(addr);
        self.link.seqnum.push(0);
        Ok(())
    }

    pub fn num_addresses(&self) -> usize {
        self.link.addresses.len()
    }

    pub fn buffer_capacity(&self) -> u64 {
        self.fb.capacity()
    }

    pub fn split(&mut self) -> (&mut FrameBuffer, &mut UdpLink) {
        (&mut self.fb, &mut self.link)
    }

    /// Send one pre-built measurement frame.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.link.mtu {
            warn!(
                "packet is larger ({}) than MTU ({}), ignoring",
                data.len(),
                self.link.mtu
            );
            return Err(Error::invalid_input("frame exceeds MTU"));
        }
        self.link.sock.send(data)?;
        Ok(())
    }
}

impl UdpLink {
    /// Sequence-tracking slot for a source, adding new sources on demand.
    fn source_slot(&mut self, src: Ipv4Addr) -> Option<usize> {
        if let Some(i) = self.addresses.iter().position(|a| *a == src) {
            return Some(i);
        }
        if self.addresses.len() == MAX_ADDRESS {
            return None;
        }
        self.addresses.push(src);
        self.seqnum.push(0);
        Some(self.addresses.len() - 1)
    }
}

impl FrameSource for UdpLink {
    fn read_frame(
        &mut self,
        dst: &mut [u8],
        timeout: Option<Duration>,
        ctx: &mut LinkCtx,
    ) -> Result<Option<usize>> {
        loop {
            if !poll_read(self.sock.as_raw_fd(), timeout)? {
                return Ok(None);
            }

            let (bytes, peer) = self.sock.recv_from(dst)?;
            if bytes == 0 {
                return Ok(None);
            }
            let std::net::IpAddr::V4(src) = peer.ip() else {
                continue;
            };

            let frame = &dst[..bytes];
            let Some(sh) = valid_frame(frame, 0) else {
                continue;
            };
            let Some(source) = self.source_slot(src) else {
                continue;
            };

            ctx.stat.recv += sh.nopkts as u64;

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

            return Ok(Some(bytes));
        }
    }
}
