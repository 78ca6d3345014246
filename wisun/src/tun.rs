// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! TUN device carrying raw IPv6 datagrams between the kernel and the
//! 6LoWPAN adaptation layer.
//!
//! Only the MTU is configured here. Interface addresses are managed by
//! the external DHCP client, which also owns the sequencing of work
//! that must wait for an address to be assigned.

use std::io;
use std::os::unix::io::RawFd;

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfreqFlags {
    ifr_name: [u8; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

#[repr(C)]
struct IfreqMtu {
    ifr_name: [u8; IFNAMSIZ],
    ifr_mtu: libc::c_int,
    _pad: [u8; 20],
}

fn ifr_name(name: &str) -> io::Result<[u8; IFNAMSIZ]> {
    let mut ifr_name = [0; IFNAMSIZ];
    if name.len() >= IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "interface name too long",
        ));
    }
    ifr_name[..name.len()].copy_from_slice(name.as_bytes());
    Ok(ifr_name)
}

pub struct Tun {
    fd: RawFd,
    pub name: String,
}

impl Tun {
    /// Opens (creating if needed) the named TUN interface and sets its
    /// MTU. No packet-information header; the fd carries bare IPv6.
    pub fn open(name: &str, mtu: u16) -> io::Result<Tun> {
        // SAFETY: static path string, flags only.
        let fd = unsafe {
            libc::open(
                c"/dev/net/tun".as_ptr(),
                libc::O_RDWR | libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut ifr = IfreqFlags {
            ifr_name: ifr_name(name)?,
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _pad: [0; 22],
        };
        // SAFETY: ifr is a properly sized ifreq for TUNSETIFF.
        if unsafe { libc::ioctl(fd, TUNSETIFF, &mut ifr) } < 0 {
            let err = io::Error::last_os_error();
            // SAFETY: fd was opened above.
            unsafe { libc::close(fd) };
            return Err(err);
        }
        let tun = Tun {
            fd,
            name: name.to_string(),
        };
        tun.set_mtu(mtu)?;
        Ok(tun)
    }

    fn set_mtu(&self, mtu: u16) -> io::Result<()> {
        // SAFETY: plain socket creation.
        let sock = unsafe { libc::socket(libc::AF_INET6, libc::SOCK_DGRAM, 0) };
        if sock < 0 {
            return Err(io::Error::last_os_error());
        }
        let mut ifr = IfreqMtu {
            ifr_name: ifr_name(&self.name)?,
            ifr_mtu: mtu as libc::c_int,
            _pad: [0; 20],
        };
        // SAFETY: ifr is a properly sized ifreq for SIOCSIFMTU.
        let ret = unsafe { libc::ioctl(sock, libc::SIOCSIFMTU, &mut ifr) };
        let err = io::Error::last_os_error();
        // SAFETY: sock was opened above.
        unsafe { libc::close(sock) };
        if ret < 0 {
            return Err(err);
        }
        Ok(())
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Receives one datagram, `Ok(0)` when none is pending.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: reading into the caller's buffer on an owned fd.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        Ok(n as usize)
    }

    pub fn send(&self, pkt: &[u8]) -> io::Result<()> {
        // SAFETY: writing from the caller's buffer on an owned fd.
        let n = unsafe { libc::write(self.fd, pkt.as_ptr() as *const libc::c_void, pkt.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for Tun {
    fn drop(&mut self) {
        // SAFETY: fd is owned by self and closed exactly once.
        unsafe { libc::close(self.fd) };
    }
}
