// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A cross-connectable in-process transport: two `Nio` endpoints that hand packets directly to
//! each other without touching the kernel. Used for in-process switching (a bridge between two
//! guests in the same dynamips process) and for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use crate::bandwidth::BandwidthGovernor;
use crate::error::Result;
use crate::governed_send;
use crate::Nio;
use crate::NioKind;

#[derive(Default)]
struct Inner {
    queue: VecDeque<Vec<u8>>,
}

/// One side of a cross-connected FIFO pair. Cloning `FifoPair::new()`'s two return values into
/// separate `Nio` handles lets a bridge forward from one guest's NIC straight into another's
/// without an intervening socket.
pub struct FifoNio {
    inbox: Arc<Mutex<Inner>>,
    outbox: Arc<Mutex<Inner>>,
    bandwidth: BandwidthGovernor,
}

impl FifoNio {
    fn new(inbox: Arc<Mutex<Inner>>, outbox: Arc<Mutex<Inner>>) -> Self {
        FifoNio {
            inbox,
            outbox,
            bandwidth: BandwidthGovernor::new(None),
        }
    }
}

/// A connected pair of `FifoNio` endpoints; whatever is sent into `.0` is read back out of `.1`
/// and vice versa.
pub struct FifoPair(pub FifoNio, pub FifoNio);

impl FifoPair {
    pub fn new() -> Self {
        let a_box = Arc::new(Mutex::new(Inner::default()));
        let b_box = Arc::new(Mutex::new(Inner::default()));
        FifoPair(
            FifoNio::new(b_box.clone(), a_box.clone()),
            FifoNio::new(a_box, b_box),
        )
    }
}

impl Default for FifoPair {
    fn default() -> Self {
        Self::new()
    }
}

impl Nio for FifoNio {
    fn kind(&self) -> NioKind {
        NioKind::Fifo
    }

    fn send(&mut self, pkt: &[u8]) -> Result<usize> {
        let outbox = &self.outbox;
        governed_send(&mut self.bandwidth, pkt, |pkt| {
            outbox.lock().unwrap().queue.push_back(pkt.to_vec());
            Ok(pkt.len())
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inbox.lock().unwrap();
        match inner.queue.pop_front() {
            Some(pkt) => {
                let n = pkt.len().min(buf.len());
                buf[..n].copy_from_slice(&pkt[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn as_raw_fd(&self) -> Option<std::os::unix::io::RawFd> {
        None
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
    fn cross_connected_pair_delivers_in_order() {
        let FifoPair(mut a, mut b) = FifoPair::new();
        a.send(b"one").unwrap();
        a.send(b"two").unwrap();
        let mut buf = [0u8; 16];
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"one");
        let n = b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"two");
        assert_eq!(b.recv(&mut buf).unwrap(), 0);
    }
}
