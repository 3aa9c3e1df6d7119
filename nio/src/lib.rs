// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Network I/O: a uniform packet-endpoint abstraction over host transports, plus the RX listener
//! thread that multiplexes every attached transport and hands packets to a registered callback.
//! Concrete guest-facing devices (Ethernet chips, bridges) register against a `Nio` rather than
//! touching a socket or a tap fd directly.

mod bandwidth;
mod bridge;
mod error;
mod fifo;
mod null;
mod rx;
mod tap;
mod tcp;
mod udp;
mod unix;

pub use bandwidth::BandwidthGovernor;
pub use bridge::Bridge;
pub use bridge::SharedNio;
pub use error::{Error, Result};
pub use fifo::FifoPair;
pub use null::NullNio;
pub use rx::{RxHandler, RxListener};
pub use tap::TapDevice;
pub use tcp::{TcpClientNio, TcpServerNio};
pub use udp::UdpNio;
pub use unix::UnixNio;

use std::os::unix::io::RawFd;

/// The concrete transport kinds a `Nio` can wrap. Declared in full even where a constructor is
/// not implemented on this build, so callers get a typed `Unsupported` error rather than a
/// missing enum variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NioKind {
    Udp,
    Unix,
    Tap,
    TcpClient,
    TcpServer,
    Fifo,
    Null,
    /// Linux `AF_PACKET` raw Ethernet capture. Declared for protocol/CLI completeness; not
    /// implemented on this build.
    LinuxEth,
    /// VDE (`libvdeplug`) switch port. Declared for protocol/CLI completeness; not implemented on
    /// this build.
    Vde,
    /// Generic `libpcap`-shaped capture sink. Declared for protocol/CLI completeness; not
    /// implemented on this build.
    Pcap,
}

impl NioKind {
    pub fn name(&self) -> &'static str {
        match self {
            NioKind::Udp => "udp",
            NioKind::Unix => "unix",
            NioKind::Tap => "tap",
            NioKind::TcpClient => "tcp_cli",
            NioKind::TcpServer => "tcp_ser",
            NioKind::Fifo => "fifo",
            NioKind::Null => "null",
            NioKind::LinuxEth => "linux_eth",
            NioKind::Vde => "vde",
            NioKind::Pcap => "pcap",
        }
    }
}

/// The uniform endpoint every transport implements. `send`/`recv` never block past what the
/// underlying descriptor itself would (sockets and the tap device are non-blocking); `recv`
/// returning `Ok(0)` means "nothing available right now", not EOF.
pub trait Nio: Send {
    fn kind(&self) -> NioKind;

    fn send(&mut self, pkt: &[u8]) -> Result<usize>;

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The descriptor the RX listener should poll, if this transport has one. NIOs with no
    /// meaningful readiness signal (e.g. `Null`) return `None` and are never registered for RX.
    fn as_raw_fd(&self) -> Option<RawFd>;

    /// Whether a `send` right now would be accepted by the bandwidth governor. The caller still
    /// needs to call `send` to actually account the bytes; this is for callers (the periodic TX
    /// drain) that want to avoid building a packet they're about to drop.
    fn can_transmit(&self, len: usize) -> bool;

    fn bandwidth(&mut self) -> &mut BandwidthGovernor;

    /// Total bytes accepted and rejected so far, for the hypervisor protocol's `show_stats`.
    fn dropped(&self) -> u64 {
        0
    }
}

/// Applies the bandwidth governor around a transport's raw send, shared by every `Nio`
/// implementation so the drop-accounting policy in §4.D stays in one place.
pub(crate) fn governed_send<F>(gov: &mut BandwidthGovernor, pkt: &[u8], raw_send: F) -> Result<usize>
where
    F: FnOnce(&[u8]) -> Result<usize>,
{
    if !gov.allow(pkt.len()) {
        gov.record_drop();
        return Ok(0);
    }
    let n = raw_send(pkt)?;
    gov.record_sent(n);
    Ok(n)
}
