// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! UDP transport, with optional auto-binding over a local port range (used when several VMs on
//! the same host each want their own ephemeral NIO without the CLI having to pick free ports).

use std::io;
use std::net::SocketAddr;
use std::net::UdpSocket;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;

use crate::bandwidth::BandwidthGovernor;
use crate::error::Error;
use crate::error::Result;
use crate::governed_send;
use crate::Nio;
use crate::NioKind;

pub struct UdpNio {
    socket: UdpSocket,
    remote: SocketAddr,
    bandwidth: BandwidthGovernor,
}

impl UdpNio {
    /// Binds to `local` and targets `remote`.
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(local).map_err(Error::Bind)?;
        socket.set_nonblocking(true).map_err(Error::Bind)?;
        Ok(UdpNio {
            socket,
            remote,
            bandwidth: BandwidthGovernor::new(None),
        })
    }

    /// Binds to the first free port in `[port_lo, port_hi]` on `host`, returning the NIO and the
    /// port it landed on.
    pub fn new_auto_bind(
        host: std::net::IpAddr,
        port_lo: u16,
        port_hi: u16,
        remote: SocketAddr,
    ) -> Result<(Self, u16)> {
        for port in port_lo..=port_hi {
            let local = SocketAddr::new(host, port);
            match UdpSocket::bind(local) {
                Ok(socket) => {
                    socket.set_nonblocking(true).map_err(Error::Bind)?;
                    return Ok((
                        UdpNio {
                            socket,
                            remote,
                            bandwidth: BandwidthGovernor::new(None),
                        },
                        port,
                    ));
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(Error::Bind(e)),
            }
        }
        Err(Error::NoFreePort(port_lo, port_hi))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Nio for UdpNio {
    fn kind(&self) -> NioKind {
        NioKind::Udp
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        let remote = self.remote;
        let socket = &self.socket;
        governed_send(&mut self.bandwidth, pkt, |pkt| {
            socket.send_to(pkt, remote).map_err(Error::Send)
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
    fn loopback_round_trip() {
        // Bind both sides to ephemeral ports first so neither constructor needs to know the
        // other's address ahead of time, then rebuild each with the peer's resolved address.
        let probe_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let a_addr = probe_a.local_addr().unwrap();
        let probe_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let b_addr = probe_b.local_addr().unwrap();
        drop(probe_a);
        drop(probe_b);

        let mut a = UdpNio::new(a_addr, b_addr).unwrap();
        let mut b = UdpNio::new(b_addr, a_addr).unwrap();

        a.send(b"\xDE\xAD\xBE\xEF").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"\xDE\xAD\xBE\xEF");
    }

    #[test]
    fn auto_bind_finds_free_port_in_range() {
        let (nio, port) =
            UdpNio::new_auto_bind("127.0.0.1".parse().unwrap(), 31000, 31050, "127.0.0.1:1".parse().unwrap())
                .unwrap();
        assert!((31000..=31050).contains(&port));
        assert_eq!(nio.local_addr().unwrap().port(), port);
    }
}
