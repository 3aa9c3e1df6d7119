// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared plumbing between the MIPS64 and PowerPC-32 MMU flavours: the soft-TLB probe, the
//! physical-memory/MMIO dispatch once a payload is known, and the SMC-invalidate-before-write
//! ordering. Each architecture module only supplies the page-table/BAT walk that turns a miss
//! into a `TlbPayload`.

use std::sync::Arc;

use crate::phys::PhysMem;
use crate::phys::PAGE_SIZE;
use crate::soft_tlb::SoftTlb;
use crate::soft_tlb::TlbPayload;
use crate::Exception;
use crate::MmioBus;
use crate::Result;
use crate::SmcNotify;

/// A physical address range routed to a device instead of RAM, e.g. a PCI BAR or the NVRAM
/// window carved out of the physical map at VM-build time.
#[derive(Debug, Clone, Copy)]
struct IoWindow {
    base: u64,
    len: u64,
    dev_idx: u32,
}

pub struct MtsCore {
    pub tlb: SoftTlb,
    pub phys: PhysMem,
    pub mmio: Arc<dyn MmioBus>,
    pub smc: Arc<dyn SmcNotify>,
    io_windows: Vec<IoWindow>,
}

impl MtsCore {
    pub fn new(phys: PhysMem, mmio: Arc<dyn MmioBus>, smc: Arc<dyn SmcNotify>) -> Self {
        MtsCore {
            tlb: SoftTlb::new(),
            phys,
            mmio,
            smc,
            io_windows: Vec::new(),
        }
    }

    pub fn check_align(vaddr: u64, size: u8, write: bool) -> Result<()> {
        if size > 1 && vaddr % size as u64 != 0 {
            return Err(Exception::AddressError { vaddr, write });
        }
        Ok(())
    }

    /// Carves out `[base, base + len)` of the physical address space for `dev_idx`; accesses
    /// landing in the range dispatch through `mmio` instead of `phys`. Does not check for
    /// overlap with an existing window, matching the reference implementation's device map where
    /// later registrations simply shadow earlier ones within `classify_phys`.
    pub fn map_device(&mut self, base: u64, len: u64, dev_idx: u32) {
        self.io_windows.push(IoWindow { base, len, dev_idx });
    }

    pub fn unmap_device(&mut self, dev_idx: u32) {
        self.io_windows.retain(|w| w.dev_idx != dev_idx);
    }

    fn device_window(&self, pa: u64) -> Option<(u32, u64)> {
        self.io_windows
            .iter()
            .rev()
            .find(|w| pa >= w.base && pa < w.base + w.len)
            .map(|w| (w.dev_idx, pa - w.base))
    }

    /// Turns a fully-resolved physical address into its dispatch payload: a registered device
    /// window wins over RAM. `host_base` is stored page-aligned; `read_payload`/`write_payload`
    /// add back the intra-page offset from the faulting `vaddr`.
    pub fn classify_phys(&self, pa: u64, writable: bool) -> TlbPayload {
        match self.device_window(pa) {
            Some((dev_idx, offset)) => TlbPayload::Mmio { dev_idx, offset },
            None => TlbPayload::Ram {
                host_base: pa & !(PAGE_SIZE - 1),
                writable,
            },
        }
    }

    pub fn read_payload(&self, payload: TlbPayload, vaddr: u64, size: u8) -> Result<u64> {
        match payload {
            TlbPayload::Ram { host_base, .. } => {
                let pa = host_base + (vaddr & (PAGE_SIZE - 1));
                let v = match size {
                    1 => self.phys.read_u8(pa).map(|b| b as u64),
                    2 => self.phys.read_u16_be(pa).map(|b| b as u64),
                    4 => self.phys.read_u32_be(pa).map(|b| b as u64),
                    8 => self.phys.read_u64_be(pa),
                    _ => None,
                };
                v.ok_or(Exception::BusError { vaddr, write: false })
            }
            TlbPayload::Mmio { dev_idx, offset } => Ok(self.mmio.mmio_read(dev_idx, offset, size)),
            TlbPayload::Unmapped => Err(Exception::BusError { vaddr, write: false }),
        }
    }

    pub fn write_payload(&mut self, payload: TlbPayload, vaddr: u64, size: u8, value: u64) -> Result<()> {
        match payload {
            TlbPayload::Ram { host_base, writable } => {
                if !writable {
                    return Err(Exception::ProtectionViolation { vaddr, write: true });
                }
                let pa = host_base + (vaddr & (PAGE_SIZE - 1));
                // SMC invariant (§3): invalidate before the store becomes observable to future
                // instruction fetches.
                if self.phys.is_exec(pa) {
                    self.smc.invalidate_phys_page(pa / PAGE_SIZE);
                }
                let ok = match size {
                    1 => self.phys.write_u8(pa, value as u8),
                    2 => self.phys.write_u16_be(pa, value as u16),
                    4 => self.phys.write_u32_be(pa, value as u32),
                    8 => self.phys.write_u64_be(pa, value),
                    _ => None,
                };
                ok.ok_or(Exception::BusError { vaddr, write: true })
            }
            TlbPayload::Mmio { dev_idx, offset } => {
                self.mmio.mmio_write(dev_idx, offset, size, value);
                Ok(())
            }
            TlbPayload::Unmapped => Err(Exception::BusError { vaddr, write: true }),
        }
    }

    pub fn is_exec_tagged(&self, payload: TlbPayload, vaddr: u64) -> bool {
        match payload {
            TlbPayload::Ram { host_base, .. } => {
                self.phys.is_exec(host_base + (vaddr & (PAGE_SIZE - 1)))
            }
            _ => false,
        }
    }
}
