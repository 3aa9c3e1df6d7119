// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A thin wrapper around `/dev/net/tun` in `IFF_TAP | IFF_NO_PI` mode, the host-side transport
//! used to bridge a guest NIC to a real Linux network interface.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;

use crate::error::Error;
use crate::error::Result;

const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;
// _IOW('T', 202, int), from linux/if_tun.h. libc doesn't expose tun/tap ioctls directly.
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFNAMSIZ: usize = 16;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_flags: libc::c_short,
    _pad: [u8; 22],
}

pub struct TapDevice {
    file: File,
    ifname: String,
}

impl TapDevice {
    /// Opens (or creates) the named tap interface. `name` may be empty to let the kernel pick a
    /// name (`tapN`).
    pub fn new(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(Error::Tap)?;

        let mut req: IfReq = unsafe { mem::zeroed() };
        req.ifr_flags = IFF_TAP | IFF_NO_PI;
        for (i, b) in name.bytes().take(IFNAMSIZ - 1).enumerate() {
            req.ifr_name[i] = b as libc::c_char;
        }

        // Safe because `req` is a valid, correctly sized buffer for `TUNSETIFF`.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req) };
        if ret < 0 {
            return Err(Error::Tap(io::Error::last_os_error()));
        }

        let ifname = unsafe {
            std::ffi::CStr::from_ptr(req.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        Ok(TapDevice { file, ifname })
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        self.file.write(pkt).map_err(Error::Send)
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Recv(e)),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
