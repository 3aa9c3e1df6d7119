// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! TCP client and server NIO transports. Framing is length-prefixed (`u32` big-endian) so packet
//! boundaries survive TCP's byte-stream semantics; the reference implementation uses the same
//! convention for its TCP NIO.

use std::io;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;

use crate::bandwidth::BandwidthGovernor;
use crate::error::Error;
use crate::error::Result;
use crate::governed_send;
use crate::Nio;
use crate::NioKind;

fn write_framed(stream: &mut TcpStream, pkt: &[u8]) -> Result<usize> {
    let len = pkt.len() as u32;
    stream.write_all(&len.to_be_bytes()).map_err(Error::Send)?;
    stream.write_all(pkt).map_err(Error::Send)?;
    Ok(pkt.len())
}

fn read_framed(stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize> {
    let mut len_bytes = [0u8; 4];
    match stream.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
        Err(e) => return Err(Error::Recv(e)),
    }
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > buf.len() {
        return Err(Error::Recv(io::Error::new(
            io::ErrorKind::InvalidData,
            "framed packet larger than receive buffer",
        )));
    }
    stream.read_exact(&mut buf[..len]).map_err(Error::Recv)?;
    Ok(len)
}

pub struct TcpClientNio {
    stream: TcpStream,
    bandwidth: BandwidthGovernor,
}

impl TcpClientNio {
    pub fn connect(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote).map_err(Error::Connect)?;
        stream.set_nonblocking(true).map_err(Error::Connect)?;
        stream.set_nodelay(true).ok();
        Ok(TcpClientNio {
            stream,
            bandwidth: BandwidthGovernor::new(None),
        })
    }
}

impl Nio for TcpClientNio {
    fn kind(&self) -> NioKind {
        NioKind::TcpClient
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        let stream = &mut self.stream;
        governed_send(&mut self.bandwidth, pkt, |pkt| write_framed(stream, pkt))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_framed(&mut self.stream, buf)
    }

    fn as_raw_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
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

/// A TCP server NIO: listens and accepts exactly one peer connection (the reference
/// implementation's TCP NIO is a single point-to-point link, not a fan-in server), then behaves
/// like `TcpClientNio` against that peer.
pub struct TcpServerNio {
    listener: TcpListener,
    peer: Option<TcpStream>,
    bandwidth: BandwidthGovernor,
}

impl TcpServerNio {
    pub fn bind(local: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(local).map_err(Error::Bind)?;
        listener.set_nonblocking(true).map_err(Error::Bind)?;
        Ok(TcpServerNio {
            listener,
            peer: None,
            bandwidth: BandwidthGovernor::new(None),
        })
    }

    fn accept_if_needed(&mut self) {
        if self.peer.is_some() {
            return;
        }
        if let Ok((stream, _)) = self.listener.accept() {
            stream.set_nonblocking(true).ok();
            stream.set_nodelay(true).ok();
            self.peer = Some(stream);
        }
    }
}

impl Nio for TcpServerNio {
    fn kind(&self) -> NioKind {
        NioKind::TcpServer
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        self.accept_if_needed();
        let Some(peer) = self.peer.as_mut() else {
            return Ok(0);
        };
        governed_send(&mut self.bandwidth, pkt, |pkt| write_framed(peer, pkt))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.accept_if_needed();
        let Some(peer) = self.peer.as_mut() else {
            return Ok(0);
        };
        read_framed(peer, buf)
    }

    fn as_raw_fd(&self) -> Option<RawFd> {
        self.peer.as_ref().map(|p| p.as_raw_fd()).or(Some(self.listener.as_raw_fd()))
    }

    fn can_transmit(&self, _len: usize) -> bool {
        self.peer.is_some()
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
    fn client_server_round_trip() {
        let mut server = TcpServerNio::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = server.listener.local_addr().unwrap();
        let mut client = TcpClientNio::connect(addr).unwrap();

        // Give the listener a moment to accept in a real deployment; here we poll synchronously.
        for _ in 0..50 {
            server.accept_if_needed();
            if server.peer.is_some() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(server.peer.is_some());

        client.send(b"ping").unwrap();
        let mut buf = [0u8; 16];
        let mut n = 0;
        for _ in 0..50 {
            n = server.recv(&mut buf).unwrap();
            if n > 0 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(&buf[..n], b"ping");
    }
}
