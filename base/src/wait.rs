// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A `poll(2)`-based multiplexer, used by the NIO RX listener thread to block on every attached
//! transport's descriptor at once instead of spawning one thread per transport.

use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::POLLIN;

use crate::error::errno_result;
use crate::Result;

/// One descriptor to watch, tagged with a caller-chosen token so the caller can tell which
/// registered source became readable without a second lookup.
#[derive(Debug, Clone, Copy)]
pub struct WaitToken(pub u32);

struct Entry {
    fd: RawFd,
    token: WaitToken,
}

/// A set of descriptors polled together. Entries are a flat `Vec` rather than an epoll instance:
/// the NIO listener's fan-in is small (one descriptor per attached transport on a single NIO
/// object), so `poll(2)`'s O(n) scan costs nothing a dedicated `epoll` fd would save.
pub struct WaitContext {
    entries: Vec<Entry>,
}

/// A descriptor that had data ready, identified by the token it was registered with.
#[derive(Debug, Clone, Copy)]
pub struct WaitEvent {
    pub token: WaitToken,
}

impl WaitContext {
    pub fn new() -> Self {
        WaitContext {
            entries: Vec::new(),
        }
    }

    /// Registers `fd` for readability notifications, associated with `token`.
    pub fn add(&mut self, fd: &dyn AsRawFd, token: WaitToken) {
        self.entries.push(Entry {
            fd: fd.as_raw_fd(),
            token,
        });
    }

    /// Removes a previously-added descriptor.
    pub fn remove(&mut self, fd: &dyn AsRawFd) {
        let raw = fd.as_raw_fd();
        self.entries.retain(|e| e.fd != raw);
    }

    /// Blocks until at least one registered descriptor is readable, or `timeout` elapses.
    /// Returns the tokens of every descriptor that became readable, in registration order.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Vec<WaitEvent>> {
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut pfds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|e| libc::pollfd {
                fd: e.fd,
                events: POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = match timeout {
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        // Safe because `pfds` is a valid, uniquely-owned buffer of the length passed.
        let ret = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            return errno_result();
        }

        let events = pfds
            .iter()
            .zip(self.entries.iter())
            .filter(|(pfd, _)| pfd.revents & POLLIN != 0)
            .map(|(_, entry)| WaitEvent { token: entry.token })
            .collect();
        Ok(events)
    }
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixDatagram;

    #[test]
    fn wait_reports_readable_socket() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let mut ctx = WaitContext::new();
        ctx.add(&a, WaitToken(7));
        b.send(b"hi").unwrap();
        let events = ctx.wait(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token.0, 7);
    }

    #[test]
    fn wait_times_out_with_nothing_ready() {
        let (a, _b) = UnixDatagram::pair().unwrap();
        let mut ctx = WaitContext::new();
        ctx.add(&a, WaitToken(1));
        let events = ctx.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn remove_stops_reporting_that_descriptor() {
        let (a, b) = UnixDatagram::pair().unwrap();
        let mut ctx = WaitContext::new();
        ctx.add(&a, WaitToken(1));
        ctx.remove(&a);
        b.send(b"x").ok();
        let events = ctx.wait(Some(Duration::from_millis(10))).unwrap();
        assert!(events.is_empty());
    }
}
