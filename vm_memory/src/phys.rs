// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Flat guest physical memory: a host-backed byte array, optionally mapped from a file so
//! identical ROM/IOS images can be shared copy-on-write between VMs (the "ghost image" path), with
//! a per-page "executable" tag bit used by SMC detection.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use base::MemoryMapping;

pub const PAGE_SIZE: u64 = 4096;

/// Guest RAM/ROM backing. `exec_tags[pp]` is set iff at least one live translation block
/// references physical page `pp` (the invariant in §3); `vm_memory` itself never sets these —
/// `jit` does, through the `AddressSpace::is_exec_tagged` query and the owning VM's wiring of
/// `SmcNotify`.
pub struct PhysMem {
    mapping: MemoryMapping,
    exec_tags: Vec<AtomicBool>,
}

impl PhysMem {
    /// Allocates `size` bytes of anonymous, zero-filled RAM.
    pub fn new(size: u64) -> base::Result<Self> {
        let mapping = MemoryMapping::new_anon(size as usize)?;
        let pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        Ok(PhysMem {
            mapping,
            exec_tags: (0..pages).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    /// Maps a ROM/IOS image file read-only-shared (ghost-image sharing between VMs that reference
    /// the same path, per the Open Question in §9: this implementation compares by path, not
    /// content hash, matching the reference implementation).
    pub fn from_file_ro(path: &Path) -> base::Result<Self> {
        let mapping = MemoryMapping::from_file_ro(path)?;
        let pages = (mapping.size() as u64 + PAGE_SIZE - 1) / PAGE_SIZE;
        Ok(PhysMem {
            mapping,
            exec_tags: (0..pages).map(|_| AtomicBool::new(false)).collect(),
        })
    }

    pub fn size(&self) -> u64 {
        self.mapping.size() as u64
    }

    fn page_of(&self, pa: u64) -> Option<usize> {
        let pp = (pa / PAGE_SIZE) as usize;
        if pp < self.exec_tags.len() {
            Some(pp)
        } else {
            None
        }
    }

    pub fn is_exec(&self, pa: u64) -> bool {
        self.page_of(pa)
            .map(|pp| self.exec_tags[pp].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn mark_exec(&self, pa: u64) {
        if let Some(pp) = self.page_of(pa) {
            self.exec_tags[pp].store(true, Ordering::Release);
        }
    }

    pub fn clear_exec(&self, pa: u64) {
        if let Some(pp) = self.page_of(pa) {
            self.exec_tags[pp].store(false, Ordering::Release);
        }
    }

    fn in_range(&self, pa: u64, len: u64) -> bool {
        pa.checked_add(len).map(|end| end <= self.size()).unwrap_or(false)
    }

    pub fn read_bytes(&self, pa: u64, len: u64) -> Option<&[u8]> {
        if !self.in_range(pa, len) {
            return None;
        }
        Some(&self.mapping.as_slice()[pa as usize..(pa + len) as usize])
    }

    /// Writes `data` at `pa`. The caller (the owning `AddressSpace` impl) is responsible for
    /// calling `SmcNotify::invalidate_phys_page` *before* this is observable, per the SMC
    /// invariant in §3 — this method only performs the store.
    pub fn write_bytes(&mut self, pa: u64, data: &[u8]) -> Option<()> {
        if !self.in_range(pa, data.len() as u64) {
            return None;
        }
        let start = pa as usize;
        self.mapping.as_mut_slice()[start..start + data.len()].copy_from_slice(data);
        Some(())
    }

    pub fn read_u8(&self, pa: u64) -> Option<u8> {
        self.read_bytes(pa, 1).map(|b| b[0])
    }

    pub fn read_u16_be(&self, pa: u64) -> Option<u16> {
        self.read_bytes(pa, 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&self, pa: u64) -> Option<u32> {
        self.read_bytes(pa, 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_be(&self, pa: u64) -> Option<u64> {
        self.read_bytes(pa, 8).map(|b| {
            u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    pub fn read_u16_le(&self, pa: u64) -> Option<u16> {
        self.read_bytes(pa, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_le(&self, pa: u64) -> Option<u32> {
        self.read_bytes(pa, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&self, pa: u64) -> Option<u64> {
        self.read_bytes(pa, 8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    pub fn write_u8(&mut self, pa: u64, v: u8) -> Option<()> {
        self.write_bytes(pa, &[v])
    }

    pub fn write_u16_be(&mut self, pa: u64, v: u16) -> Option<()> {
        self.write_bytes(pa, &v.to_be_bytes())
    }

    pub fn write_u32_be(&mut self, pa: u64, v: u32) -> Option<()> {
        self.write_bytes(pa, &v.to_be_bytes())
    }

    pub fn write_u64_be(&mut self, pa: u64, v: u64) -> Option<()> {
        self.write_bytes(pa, &v.to_be_bytes())
    }

    pub fn write_u16_le(&mut self, pa: u64, v: u16) -> Option<()> {
        self.write_bytes(pa, &v.to_le_bytes())
    }

    pub fn write_u32_le(&mut self, pa: u64, v: u32) -> Option<()> {
        self.write_bytes(pa, &v.to_le_bytes())
    }

    pub fn write_u64_le(&mut self, pa: u64, v: u64) -> Option<()> {
        self.write_bytes(pa, &v.to_le_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_tag_is_per_page() {
        let mem = PhysMem::new(3 * PAGE_SIZE).unwrap();
        assert!(!mem.is_exec(PAGE_SIZE));
        mem.mark_exec(PAGE_SIZE + 4);
        assert!(mem.is_exec(PAGE_SIZE));
        assert!(!mem.is_exec(0));
        assert!(!mem.is_exec(2 * PAGE_SIZE));
        mem.clear_exec(PAGE_SIZE);
        assert!(!mem.is_exec(PAGE_SIZE));
    }

    #[test]
    fn read_write_round_trip_big_endian() {
        let mut mem = PhysMem::new(PAGE_SIZE).unwrap();
        mem.write_u32_be(0x10, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32_be(0x10), Some(0xdead_beef));
        assert_eq!(mem.read_bytes(0x10, 4).unwrap(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn out_of_range_access_returns_none() {
        let mem = PhysMem::new(PAGE_SIZE).unwrap();
        assert_eq!(mem.read_u32_be(PAGE_SIZE - 2), None);
        assert_eq!(mem.read_u8(PAGE_SIZE), None);
    }
}
