//! Network interface properties, queried via ioctl.

use crate::address::EtherAddr;
use crate::error::{Error, Result};
use std::io;
use std::os::unix::io::RawFd;

/// Properties of a network interface.
#[derive(Clone, Debug)]
pub struct Iface {
    pub name: String,
    pub hwaddr: EtherAddr,
    pub index: i32,
    pub mtu: usize,
    pub up: bool,
    pub loopback: bool,
    pub multicast: bool,
}

struct Sock(RawFd);

impl Drop for Sock {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

fn ifreq_for(name: &str) -> Result<libc::ifreq> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() >= libc::IFNAMSIZ {
        return Err(Error::InvalidIface);
    }
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn ioctl(fd: RawFd, request: libc::c_ulong, ifr: &mut libc::ifreq) -> Result<()> {
    if unsafe { libc::ioctl(fd, request as _, ifr as *mut libc::ifreq) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENODEV) {
            return Err(Error::InvalidIface);
        }
        return Err(err.into());
    }
    Ok(())
}

impl Iface {
    /// Query properties for the named interface, e.g. "eth0".
    pub fn query(name: &str) -> Result<Iface> {
        let mut ifr = ifreq_for(name)?;

        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let sock = Sock(fd);

        ioctl(sock.0, libc::SIOCGIFINDEX, &mut ifr)?;
        let index = unsafe { ifr.ifr_ifru.ifru_ifindex };

        ioctl(sock.0, libc::SIOCGIFMTU, &mut ifr)?;
        let mtu = unsafe { ifr.ifr_ifru.ifru_mtu } as usize;

        ioctl(sock.0, libc::SIOCGIFHWADDR, &mut ifr)?;
        let mut hwaddr = [0u8; 6];
        let sa_data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        for (dst, src) in hwaddr.iter_mut().zip(sa_data.iter()) {
            *dst = *src as u8;
        }

        ioctl(sock.0, libc::SIOCGIFFLAGS, &mut ifr)?;
        let flags = unsafe { ifr.ifr_ifru.ifru_flags } as libc::c_int;

        Ok(Iface {
            name: name.to_owned(),
            hwaddr: EtherAddr(hwaddr),
            index,
            mtu,
            up: flags & libc::IFF_UP != 0,
            loopback: flags & libc::IFF_LOOPBACK != 0,
            multicast: flags & libc::IFF_MULTICAST != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_names_rejected() {
        assert!(matches!(Iface::query(""), Err(Error::InvalidIface)));
        let long = "x".repeat(libc::IFNAMSIZ);
        assert!(matches!(Iface::query(&long), Err(Error::InvalidIface)));
    }

    #[test]
    fn loopback_properties() {
        // "lo" exists on any Linux machine this test runs on
        let iface = Iface::query("lo").unwrap();
        assert!(iface.loopback);
        assert!(iface.mtu > 0);
        assert!(iface.index > 0);
    }
}
