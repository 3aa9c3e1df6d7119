// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `/dev/null` of NIOs: accepts and discards everything, never has anything to receive. Used
//! to bind an interface slot without wiring it to a real transport.

use std::os::unix::io::RawFd;

use crate::bandwidth::BandwidthGovernor;
use crate::error::Result;
use crate::Nio;
use crate::NioKind;

pub struct NullNio {
    bandwidth: BandwidthGovernor,
}

impl NullNio {
    pub fn new() -> Self {
        NullNio {
            bandwidth: BandwidthGovernor::new(None),
        }
    }
}

impl Default for NullNio {
    fn default() -> Self {
        Self::new()
    }
}

impl Nio for NullNio {
    fn kind(&self) -> NioKind {
        NioKind::Null
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        self.bandwidth.record_sent(pkt.len());
        Ok(pkt.len())
    }

    fn recv(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn as_raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn can_transmit(&self, _len: usize) -> bool {
        true
    }

    fn bandwidth(&mut self) -> &mut BandwidthGovernor {
        &mut self.bandwidth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_always_succeeds_and_recv_is_always_empty() {
        let mut n = NullNio::new();
        assert_eq!(n.send(b"anything").unwrap(), 8);
        let mut buf = [0u8; 4];
        assert_eq!(n.recv(&mut buf).unwrap(), 0);
    }
}
