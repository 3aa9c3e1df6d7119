// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! PowerPC-32 address translation: block address translation (BAT) registers for large fixed
//! mappings, the 16 segment registers (`SR[0..15]`) that classify an effective address into a
//! virtual segment, and a simplified hashed page table walk for anything neither BATs nor a
//! direct real-mode mapping cover.

use std::sync::Arc;

use crate::mts_core::MtsCore;
use crate::phys::PhysMem;
use crate::phys::PAGE_SIZE;
use crate::soft_tlb::TlbPayload;
use crate::AddressSpace;
use crate::Exception;
use crate::MmioBus;
use crate::Result;
use crate::SmcNotify;

/// One BAT register pair (`BATU`/`BATL` combined), covering a power-of-two-sized, naturally
/// aligned block.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ppc32Bat {
    pub valid: bool,
    pub effective_base: u32,
    pub length: u32,
    pub phys_base: u32,
    pub writable: bool,
}

impl Ppc32Bat {
    fn covers(&self, ea: u32) -> bool {
        self.valid && ea >= self.effective_base && ea < self.effective_base.wrapping_add(self.length)
    }

    fn translate(&self, ea: u32) -> u64 {
        (self.phys_base.wrapping_add(ea - self.effective_base)) as u64
    }
}

const BAT_COUNT: usize = 4;

/// A hashed page table entry (PTE), the software-visible fallback once BATs and real-mode
/// addressing are exhausted. The reference hashed page table is a hardware-walked structure in
/// guest memory; this implementation models the same lookup contract with a host-side map keyed
/// by `(segment, virtual page)`, which is sufficient because nothing in this engine is exposed to
/// code that inspects the PTE format directly.
#[derive(Debug, Clone, Copy)]
struct Pte {
    phys_page: u32,
    writable: bool,
}

pub struct Ppc32Mmu {
    core: MtsCore,
    pub ibat: [Ppc32Bat; BAT_COUNT],
    pub dbat: [Ppc32Bat; BAT_COUNT],
    pub sr: [u32; 16],
    pub msr_dr: bool,
    pub msr_ir: bool,
    hash_pt: std::collections::HashMap<(u32, u32), Pte>,
}

impl Ppc32Mmu {
    pub fn new(phys: PhysMem, mmio: Arc<dyn MmioBus>, smc: Arc<dyn SmcNotify>) -> Self {
        Ppc32Mmu {
            core: MtsCore::new(phys, mmio, smc),
            ibat: [Ppc32Bat::default(); BAT_COUNT],
            dbat: [Ppc32Bat::default(); BAT_COUNT],
            sr: [0; 16],
            msr_dr: false,
            msr_ir: false,
            hash_pt: std::collections::HashMap::new(),
        }
    }

    /// Inserts or replaces a page table entry for `(segment, vpage)`; the boot loader / MMU
    /// setup code calls this the way the reference implementation populates the guest's hashed
    /// page table, since this crate does not walk guest-resident hash chains directly.
    pub fn map_page(&mut self, segment: u32, vpage: u32, phys_page: u32, writable: bool) {
        self.hash_pt.insert((segment, vpage), Pte { phys_page, writable });
        self.core.tlb.flush();
    }

    /// Carves out a device window in this CPU's physical address space; see
    /// `MtsCore::map_device`. Flushes the soft-TLB so no cached `Ram` payload shadows the new
    /// window.
    pub fn map_device(&mut self, base: u64, len: u64, dev_idx: u32) {
        self.core.map_device(base, len, dev_idx);
        self.core.tlb.flush();
    }

    pub fn unmap_device(&mut self, dev_idx: u32) {
        self.core.unmap_device(dev_idx);
        self.core.tlb.flush();
    }

    /// Direct physical-memory access bypassing translation, for loading a boot image into guest
    /// RAM before the CPU starts running. Returns `None` if `buf` does not fit in the backing
    /// `PhysMem`.
    pub fn phys_write_block(&mut self, pa: u64, buf: &[u8]) -> Option<()> {
        self.core.phys.write_bytes(pa, buf)
    }

    pub fn write_sr(&mut self, n: usize, value: u32) {
        if let Some(slot) = self.sr.get_mut(n) {
            *slot = value;
        }
        self.core.tlb.flush();
    }

    fn bat_payload(&self, ea: u32, write: bool, data: bool) -> Option<TlbPayload> {
        let bats = if data { &self.dbat } else { &self.ibat };
        for bat in bats {
            if bat.covers(ea) {
                if write && !bat.writable {
                    return None;
                }
                return Some(TlbPayload::Ram {
                    host_base: bat.translate(ea),
                    writable: bat.writable,
                });
            }
        }
        None
    }

    fn hash_payload(&self, ea: u32, write: bool) -> Result<TlbPayload> {
        let segment = (ea >> 28) & 0xf;
        let vsid = self.sr[segment as usize] & 0x00ff_ffff;
        let vpage = ea & 0x0fff_ffff;
        match self.hash_pt.get(&(vsid, vpage)) {
            None => Err(Exception::TlbMiss {
                vaddr: ea as u64,
                write,
            }),
            Some(pte) => {
                if write && !pte.writable {
                    return Err(Exception::ProtectionViolation {
                        vaddr: ea as u64,
                        write,
                    });
                }
                Ok(TlbPayload::Ram {
                    host_base: (pte.phys_page as u64) * PAGE_SIZE,
                    writable: pte.writable,
                })
            }
        }
    }

    fn resolve(&mut self, vaddr: u64, write: bool, data: bool) -> Result<TlbPayload> {
        let ea = vaddr as u32;
        let translation_enabled = if data { self.msr_dr } else { self.msr_ir };
        if !translation_enabled {
            return Ok(TlbPayload::Ram {
                host_base: ea as u64,
                writable: true,
            });
        }
        let vpn = vaddr / PAGE_SIZE;
        let asid = 0;
        if let Some(payload) = self.core.tlb.lookup(vpn, asid) {
            return Ok(payload);
        }
        let payload = match self.bat_payload(ea, write, data) {
            Some(p) => p,
            None => self.hash_payload(ea, write)?,
        };
        self.core.tlb.install(vpn, asid, payload);
        Ok(payload)
    }
}

impl AddressSpace for Ppc32Mmu {
    fn read(&mut self, vaddr: u64, size: u8) -> Result<u64> {
        MtsCore::check_align(vaddr, size, false)?;
        let payload = self.resolve(vaddr, false, true)?;
        self.core.read_payload(payload, vaddr, size)
    }

    fn write(&mut self, vaddr: u64, size: u8, value: u64) -> Result<()> {
        MtsCore::check_align(vaddr, size, true)?;
        let payload = self.resolve(vaddr, true, true)?;
        self.core.write_payload(payload, vaddr, size, value)
    }

    fn read_block(&mut self, vaddr: u64, buf: &mut [u8]) -> Result<()> {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read(vaddr + i as u64, 1)? as u8;
        }
        Ok(())
    }

    fn write_block(&mut self, vaddr: u64, buf: &[u8]) -> Result<()> {
        for (i, &b) in buf.iter().enumerate() {
            self.write(vaddr + i as u64, 1, b as u64)?;
        }
        Ok(())
    }

    fn flush_tlb(&mut self) {
        self.core.tlb.flush();
    }

    fn is_exec_tagged(&mut self, vaddr: u64) -> bool {
        match self.resolve(vaddr, false, false) {
            Ok(payload) => self.core.is_exec_tagged(payload, vaddr),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBus;
    impl MmioBus for NullBus {
        fn mmio_read(&self, _dev_idx: u32, _offset: u64, _size: u8) -> u64 {
            0
        }
        fn mmio_write(&self, _dev_idx: u32, _offset: u64, _size: u8, _value: u64) {}
    }
    struct NullSmc;
    impl SmcNotify for NullSmc {
        fn invalidate_phys_page(&self, _pp: u64) {}
    }

    fn mmu(size: u64) -> Ppc32Mmu {
        Ppc32Mmu::new(PhysMem::new(size).unwrap(), Arc::new(NullBus), Arc::new(NullSmc))
    }

    #[test]
    fn real_mode_maps_effective_to_physical_identity() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        mmu.write(0x100, 4, 0xcafef00d).unwrap();
        assert_eq!(mmu.read(0x100, 4).unwrap(), 0xcafef00d);
    }

    #[test]
    fn dbat_covers_translated_range_once_enabled() {
        let mut mmu = mmu(PAGE_SIZE * 8);
        mmu.msr_dr = true;
        mmu.dbat[0] = Ppc32Bat {
            valid: true,
            effective_base: 0x1000_0000,
            length: 0x1000_0000,
            phys_base: 0,
            writable: true,
        };
        mmu.write(0x1000_0004, 4, 42).unwrap();
        assert_eq!(mmu.read(0x1000_0004, 4).unwrap(), 42);
    }

    #[test]
    fn translation_enabled_without_bat_or_pte_misses() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        mmu.msr_dr = true;
        assert!(matches!(
            mmu.read(0x2000_0000, 4),
            Err(Exception::TlbMiss { .. })
        ));
    }

    #[test]
    fn hashed_page_table_entry_is_consulted_after_bat_miss() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        mmu.msr_dr = true;
        let segment = (0x3000_0000u32 >> 28) & 0xf;
        mmu.write_sr(segment as usize, 0x55);
        mmu.map_page(0x55, 0x0000_0000, 0, true);
        mmu.write(0x3000_0000, 4, 7).unwrap();
        assert_eq!(mmu.read(0x3000_0000, 4).unwrap(), 7);
    }
}
