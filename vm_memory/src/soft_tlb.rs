// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The soft-TLB: a fixed-size, open-addressed cache keyed by `(virtual page, ASID)`, probed at
//! two independent hash shifts before falling back to a full page-table walk. This is the exact
//! probe sequence the JIT back-end is expected to inline (§4.E "fast-path inlining"); keeping it
//! in one place means entries installed by a software miss and entries consulted by emitted code
//! are always compatible.

const SIZE_LOG2: u32 = 12;
const SIZE: usize = 1 << SIZE_LOG2;
const MASK: u64 = (SIZE as u64) - 1;

const SHIFT1: u32 = 0;
const SHIFT2: u32 = 7;

/// What a soft-TLB hit resolves to. The `jit` inline fast path only ever takes the `Ram` arm
/// directly; `Mmio` and `Unmapped` both bail out to the generic handler (`Unmapped` should be
/// unreachable since misses are never cached, but the variant exists so `TlbPayload` stays a
/// closed enum matching the design's `{Ram | Mmio | Unmapped}` tagged union in §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlbPayload {
    Ram { host_base: u64, writable: bool },
    Mmio { dev_idx: u32, offset: u64 },
    Unmapped,
}

#[derive(Debug, Clone, Copy)]
pub struct SoftTlbEntry {
    pub vpn: u64,
    pub asid: u32,
    pub payload: TlbPayload,
}

fn hash(vpn: u64, asid: u32, shift: u32) -> usize {
    let mixed = (vpn ^ (asid as u64)).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> shift;
    (mixed & MASK) as usize
}

/// Two probe buckets per key; each bucket holds one entry, last-write-wins. `None` and
/// `Unmapped` are never stored (the contract says a miss never mutates the TLB).
pub struct SoftTlb {
    table: Vec<Option<SoftTlbEntry>>,
}

impl SoftTlb {
    pub fn new() -> Self {
        SoftTlb {
            table: vec![None; SIZE],
        }
    }

    pub fn lookup(&self, vpn: u64, asid: u32) -> Option<TlbPayload> {
        for shift in [SHIFT1, SHIFT2] {
            let idx = hash(vpn, asid, shift);
            if let Some(entry) = &self.table[idx] {
                if entry.vpn == vpn && entry.asid == asid {
                    return Some(entry.payload);
                }
            }
        }
        None
    }

    /// Installs an entry, evicting whatever occupies the first-shift bucket (matches the
    /// reference implementation's simple two-bucket replacement: always write to bucket one,
    /// only probe bucket two on lookup).
    pub fn install(&mut self, vpn: u64, asid: u32, payload: TlbPayload) {
        debug_assert!(!matches!(payload, TlbPayload::Unmapped));
        let idx = hash(vpn, asid, SHIFT1);
        self.table[idx] = Some(SoftTlbEntry { vpn, asid, payload });
    }

    pub fn flush(&mut self) {
        for slot in &mut self.table {
            *slot = None;
        }
    }

    /// Removes every entry for `asid`, used when a single address space is torn down without
    /// disturbing entries belonging to other ASIDs sharing the table.
    pub fn flush_asid(&mut self, asid: u32) {
        for slot in &mut self.table {
            if matches!(slot, Some(e) if e.asid == asid) {
                *slot = None;
            }
        }
    }
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_lookup_hits() {
        let mut tlb = SoftTlb::new();
        tlb.install(
            0x1234,
            3,
            TlbPayload::Ram {
                host_base: 0x8000,
                writable: true,
            },
        );
        assert_eq!(
            tlb.lookup(0x1234, 3),
            Some(TlbPayload::Ram {
                host_base: 0x8000,
                writable: true
            })
        );
    }

    #[test]
    fn different_asid_is_a_miss() {
        let mut tlb = SoftTlb::new();
        tlb.install(0x10, 1, TlbPayload::Mmio { dev_idx: 0, offset: 0 });
        assert_eq!(tlb.lookup(0x10, 2), None);
    }

    #[test]
    fn flush_clears_every_entry() {
        let mut tlb = SoftTlb::new();
        tlb.install(0x10, 1, TlbPayload::Mmio { dev_idx: 0, offset: 0 });
        tlb.flush();
        assert_eq!(tlb.lookup(0x10, 1), None);
    }

    #[test]
    fn flush_asid_leaves_other_asids_intact() {
        let mut tlb = SoftTlb::new();
        tlb.install(0x20, 1, TlbPayload::Ram { host_base: 0, writable: false });
        tlb.install(0x20 + (1 << SHIFT2) * SIZE as u64, 2, TlbPayload::Mmio { dev_idx: 1, offset: 4 });
        tlb.flush_asid(1);
        assert_eq!(tlb.lookup(0x20, 1), None);
    }
}
