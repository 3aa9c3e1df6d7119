// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A moving 1-second-window byte counter, enforced per-NIO so a single runaway transport can't
//! starve the RX listener thread's poll loop.

use std::time::Duration;
use std::time::Instant;

/// Tracks bytes transmitted in the current 1-second window and rejects sends once a configured
/// limit is exceeded, resetting when the window rolls over.
pub struct BandwidthGovernor {
    limit_bytes_per_sec: Option<u64>,
    window_start: Instant,
    window_bytes: u64,
    dropped: u64,
}

const WINDOW: Duration = Duration::from_secs(1);

impl BandwidthGovernor {
    pub fn new(limit_bytes_per_sec: Option<u64>) -> Self {
        BandwidthGovernor {
            limit_bytes_per_sec,
            window_start: Instant::now(),
            window_bytes: 0,
            dropped: 0,
        }
    }

    pub fn set_limit(&mut self, limit_bytes_per_sec: Option<u64>) {
        self.limit_bytes_per_sec = limit_bytes_per_sec;
    }

    fn roll_window_if_needed(&mut self) {
        if self.window_start.elapsed() >= WINDOW {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }

    /// Returns whether `len` additional bytes may be sent in the current window. On rejection
    /// the caller is expected to drop the packet and call `record_drop`.
    pub fn allow(&mut self, len: usize) -> bool {
        self.roll_window_if_needed();
        match self.limit_bytes_per_sec {
            None => true,
            Some(limit) => self.window_bytes + len as u64 <= limit,
        }
    }

    /// Accounts `len` bytes as sent in the current window.
    pub fn record_sent(&mut self, len: usize) {
        self.window_bytes += len as u64;
    }

    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_allows() {
        let mut g = BandwidthGovernor::new(None);
        assert!(g.allow(1_000_000));
    }

    #[test]
    fn rejects_once_limit_exceeded_within_window() {
        let mut g = BandwidthGovernor::new(Some(100));
        assert!(g.allow(60));
        g.record_sent(60);
        assert!(!g.allow(60));
        g.record_drop();
        assert_eq!(g.dropped(), 1);
    }
}
