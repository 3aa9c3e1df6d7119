// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! UNIX domain datagram socket transport, used to wire a guest NIC to another process on the
//! same host (e.g. a second dynamips instance) via a well-known socket path.

use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::path::PathBuf;

use crate::bandwidth::BandwidthGovernor;
use crate::error::Error;
use crate::error::Result;
use crate::governed_send;
use crate::Nio;
use crate::NioKind;

pub struct UnixNio {
    socket: UnixDatagram,
    remote: PathBuf,
    bandwidth: BandwidthGovernor,
}

impl UnixNio {
    pub fn new(local: &Path, remote: &Path) -> Result<Self> {
        let _ = std::fs::remove_file(local);
        let socket = UnixDatagram::bind(local).map_err(Error::Bind)?;
        socket.set_nonblocking(true).map_err(Error::Bind)?;
        Ok(UnixNio {
            socket,
            remote: remote.to_path_buf(),
            bandwidth: BandwidthGovernor::new(None),
        })
    }

    /// Builds a connected pair entirely in-process, skipping the filesystem path (used for
    /// cross-connecting two NIOs the way the reference implementation's FIFO transport does, but
    /// preserving the UNIX-socket wire semantics).
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = UnixDatagram::pair().map_err(Error::Bind)?;
        a.set_nonblocking(true).map_err(Error::Bind)?;
        b.set_nonblocking(true).map_err(Error::Bind)?;
        Ok((
            UnixNio {
                socket: a,
                remote: PathBuf::new(),
                bandwidth: BandwidthGovernor::new(None),
            },
            UnixNio {
                socket: b,
                remote: PathBuf::new(),
                bandwidth: BandwidthGovernor::new(None),
            },
        ))
    }
}

impl Nio for UnixNio {
    fn kind(&self) -> NioKind {
        NioKind::Unix
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        let socket = &self.socket;
        let remote = &self.remote;
        governed_send(&mut self.bandwidth, pkt, |pkt| {
            if remote.as_os_str().is_empty() {
                socket.send(pkt).map_err(Error::Send)
            } else {
                socket.send_to(pkt, remote).map_err(Error::Send)
            }
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(Error::Recv(e)),
        }
    }

    fn as_raw_fd(&self) -> Option<RawFd> {
        Some(self.socket.as_raw_fd())
    }

    fn can_transmit(&self, _len: usize) -> bool {
        true
    }

    fn bandwidth(&mut self) -> &mut BandwidthGovernor {
        &mut self.bandwidth
    }

    fn dropped(&self) -> u64 {
        self.bandwidth.dropped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_round_trips() {
        let (mut a, mut b) = UnixNio::pair().unwrap();
        a.send(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
