// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! MIPS64 address translation: the fixed kseg/kuseg segmentation for 32-bit addressing, the
//! 36-bit XKPHYS window for 64-bit addressing, and a variable-page-size TLB with ASID tagging.
//! Constants below are carried from the original implementation's `mips64.h` (not guessable from
//! the distilled spec): segment bases/sizes, the XKPHYS zone mask/shift, and the ROM reset
//! vector/stack pointer.

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

pub const KUSEG_BASE: u64 = 0x0000_0000;
pub const KUSEG_SIZE: u64 = 0x8000_0000;
pub const KSEG0_BASE: u64 = 0xffff_ffff_8000_0000;
pub const KSEG0_SIZE: u64 = 0x2000_0000;
pub const KSEG1_BASE: u64 = 0xffff_ffff_a000_0000;
pub const KSEG1_SIZE: u64 = 0x2000_0000;
pub const KSSEG_BASE: u64 = 0xffff_ffff_c000_0000;
pub const KSSEG_SIZE: u64 = 0x2000_0000;
pub const KSEG3_BASE: u64 = 0xffff_ffff_e000_0000;
pub const KSEG3_SIZE: u64 = 0x2000_0000;

pub const XKPHYS_ZONE_MASK: u64 = 0xF800_0000_0000_0000;
pub const XKPHYS_PHYS_SIZE: u64 = 1u64 << 36;
pub const XKPHYS_PHYS_MASK: u64 = XKPHYS_PHYS_SIZE - 1;
pub const XKPHYS_CCA_SHIFT: u32 = 59;

/// Reset PC and stack pointer for a MIPS64 CPU out of reset, sign-extended 32-bit addresses as
/// the reference implementation stores them.
pub const ROM_PC: u64 = 0xffff_ffff_bfc0_0000;
pub const ROM_SP: u64 = 0xffff_ffff_8000_4000;

pub const PRID_R4600: u32 = 0x0000_2012;
pub const PRID_R4700: u32 = 0x0000_2112;
pub const PRID_R5000: u32 = 0x0000_2312;
pub const PRID_R7000: u32 = 0x0000_2721;
pub const PRID_R527X: u32 = 0x0000_2812;
pub const PRID_BCM1250: u32 = 0x0004_0102;

/// One hardware TLB entry: MIPS64's TLB supports variable page sizes via `page_mask`, and two
/// physical-page mappings per entry (even/odd virtual page, selected by the low unmasked bit of
/// the VPN) — modeled here with `lo0`/`lo1` mirroring `EntryLo0`/`EntryLo1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mips64TlbEntry {
    pub mask: u64,
    pub vpn2: u64,
    pub asid: u32,
    pub global: bool,
    pub lo0_pfn: u64,
    pub lo0_valid: bool,
    pub lo0_dirty: bool,
    pub lo1_pfn: u64,
    pub lo1_valid: bool,
    pub lo1_dirty: bool,
}

const TLB_ENTRIES: usize = 48;

/// Execution privilege, set by CP0 `Status`, that gates which segments are reachable and whether
/// the TLB or a direct kseg mapping is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Kernel,
    Supervisor,
    User,
}

pub struct Mips64Mmu {
    core: MtsCore,
    tlb: [Mips64TlbEntry; TLB_ENTRIES],
    pub asid: u32,
    pub mode: Mode,
    pub addr64: bool,
}

impl Mips64Mmu {
    pub fn new(phys: PhysMem, mmio: Arc<dyn MmioBus>, smc: Arc<dyn SmcNotify>) -> Self {
        Mips64Mmu {
            core: MtsCore::new(phys, mmio, smc),
            tlb: [Mips64TlbEntry::default(); TLB_ENTRIES],
            asid: 0,
            mode: Mode::Kernel,
            addr64: false,
        }
    }

    pub fn write_tlb_entry(&mut self, index: usize, entry: Mips64TlbEntry) {
        if let Some(slot) = self.tlb.get_mut(index) {
            *slot = entry;
            // A TLB write can change the mapping for a VPN that had a cached soft-TLB entry;
            // flush unconditionally rather than trying to prove non-overlap.
            self.core.tlb.flush();
        }
    }

    pub fn tlb_entry(&self, index: usize) -> Option<Mips64TlbEntry> {
        self.tlb.get(index).copied()
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

    pub fn probe_tlb(&self, vpn2: u64, asid: u32) -> Option<usize> {
        self.tlb.iter().position(|e| {
            let vpn2_mask = !(e.mask | 0x1fff) >> 1;
            (e.global || e.asid == asid) && (e.vpn2 & vpn2_mask) == (vpn2 & vpn2_mask)
        })
    }

    fn direct_kseg_payload(&self, vaddr: u64) -> Option<TlbPayload> {
        if !self.addr64 {
            if (KSEG0_BASE..KSEG0_BASE + KSEG0_SIZE).contains(&vaddr) {
                let pa = vaddr - KSEG0_BASE;
                return Some(self.core.classify_phys(pa, true));
            }
            if (KSEG1_BASE..KSEG1_BASE + KSEG1_SIZE).contains(&vaddr) {
                let pa = vaddr - KSEG1_BASE;
                return Some(self.core.classify_phys(pa, true));
            }
        } else if (vaddr >> 62) == 0b10 {
            // XKPHYS: bits 63:62 == 0b10 select the direct-mapped 36-bit physical window; the
            // remaining high bits (zone/CCA) are masked off rather than interpreted, per the
            // Open Question in §9 treating rarely used CP0/addressing bits as opaque pass-through.
            let pa = vaddr & XKPHYS_PHYS_MASK;
            return Some(self.core.classify_phys(pa, true));
        }
        None
    }

    /// Walks the hardware TLB for `vaddr`, honoring variable page sizes. Returns `None` if no
    /// entry covers it (a `TlbMiss`, not a `BusError`: the distinction the reference
    /// implementation's MMU exception codes preserve).
    fn tlb_walk(&self, vaddr: u64, write: bool) -> Result<TlbPayload> {
        let vpn2 = vaddr >> 13;
        match self.probe_tlb(vpn2, self.asid) {
            None => Err(Exception::TlbMiss { vaddr, write }),
            Some(idx) => {
                let e = &self.tlb[idx];
                let page_size = (e.mask + 1) * PAGE_SIZE.min(PAGE_SIZE);
                let odd = (vaddr / page_size.max(PAGE_SIZE)) & 1 != 0;
                let (valid, dirty, pfn) = if odd {
                    (e.lo1_valid, e.lo1_dirty, e.lo1_pfn)
                } else {
                    (e.lo0_valid, e.lo0_dirty, e.lo0_pfn)
                };
                if !valid {
                    return Err(Exception::TlbMiss { vaddr, write });
                }
                if write && !dirty {
                    return Err(Exception::ProtectionViolation { vaddr, write });
                }
                let offset_mask = page_size.max(PAGE_SIZE) - 1;
                let pa = (pfn * PAGE_SIZE) + (vaddr & offset_mask);
                Ok(self.core.classify_phys(pa, dirty))
            }
        }
    }

    fn resolve(&mut self, vaddr: u64, write: bool) -> Result<TlbPayload> {
        let vpn = vaddr / PAGE_SIZE;
        if let Some(payload) = self.core.tlb.lookup(vpn, self.asid) {
            return Ok(payload);
        }
        let payload = match self.direct_kseg_payload(vaddr) {
            Some(p) => p,
            None => self.tlb_walk(vaddr, write)?,
        };
        self.core.tlb.install(vpn, self.asid, payload);
        Ok(payload)
    }
}

impl AddressSpace for Mips64Mmu {
    fn read(&mut self, vaddr: u64, size: u8) -> Result<u64> {
        MtsCore::check_align(vaddr, size, false)?;
        let payload = self.resolve(vaddr, false)?;
        self.core.read_payload(payload, vaddr, size)
    }

    fn write(&mut self, vaddr: u64, size: u8, value: u64) -> Result<()> {
        MtsCore::check_align(vaddr, size, true)?;
        let payload = self.resolve(vaddr, true)?;
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
        match self.resolve(vaddr, false) {
            Ok(payload) => self.core.is_exec_tagged(payload, vaddr),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys::PhysMem;
    use std::sync::Arc;

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

    fn mmu(size: u64) -> Mips64Mmu {
        Mips64Mmu::new(PhysMem::new(size).unwrap(), Arc::new(NullBus), Arc::new(NullSmc))
    }

    #[test]
    fn kseg0_maps_directly_to_physical_zero() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        mmu.write(KSEG0_BASE + 0x10, 4, 0xdead_beef).unwrap();
        assert_eq!(mmu.read(KSEG0_BASE + 0x10, 4).unwrap(), 0xdead_beef);
    }

    #[test]
    fn unmapped_kuseg_address_without_tlb_entry_misses() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        assert!(matches!(
            mmu.read(KUSEG_BASE + 0x1000, 4),
            Err(Exception::TlbMiss { .. })
        ));
    }

    #[test]
    fn misaligned_access_is_address_error() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        assert!(matches!(
            mmu.read(KSEG0_BASE + 1, 4),
            Err(Exception::AddressError { .. })
        ));
    }

    #[test]
    fn tlb_write_flushes_soft_tlb_and_maps_entry() {
        let mut mmu = mmu(PAGE_SIZE * 8);
        // warm the soft-TLB via kseg0 for an unrelated page, then install a hardware TLB entry
        // covering a kuseg page and confirm it becomes reachable.
        mmu.write(KSEG0_BASE, 4, 1).unwrap();
        mmu.write_tlb_entry(
            0,
            Mips64TlbEntry {
                mask: 0,
                vpn2: 0,
                asid: 0,
                global: true,
                lo0_pfn: 1,
                lo0_valid: true,
                lo0_dirty: true,
                lo1_pfn: 2,
                lo1_valid: true,
                lo1_dirty: true,
            },
        );
        mmu.write(KUSEG_BASE, 4, 0x42).unwrap();
        assert_eq!(mmu.read(KUSEG_BASE, 4).unwrap(), 0x42);
    }

    #[test]
    fn flush_tlb_forces_a_fresh_walk() {
        let mut mmu = mmu(PAGE_SIZE * 4);
        mmu.write(KSEG0_BASE, 4, 7).unwrap();
        mmu.flush_tlb();
        assert_eq!(mmu.read(KSEG0_BASE, 4).unwrap(), 7);
    }
}
