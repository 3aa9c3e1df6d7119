// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Memory Translation Subsystem (MTS): guest virtual address to host pointer translation
//! through a software TLB, MMIO dispatch to device callbacks, and the MIPS64/PowerPC-32 MMU walks
//! that fill the soft-TLB on a miss.
//!
//! This crate knows nothing about instruction semantics; it is the seam `cpu` calls into for
//! every load/store and the seam the JIT back-end inlines a fast path against (the soft-TLB probe
//! sequence in `soft_tlb` is shared verbatim between the interpreter's miss handler and the
//! emitted inline probe, so entries either one installs are compatible, per the fast-path
//! contract in the design).

mod exception;
pub mod mips64;
mod mts_core;
mod phys;
pub mod ppc32;
mod soft_tlb;

pub use exception::Exception;
pub use mips64::Mips64Mmu;
pub use mips64::Mips64TlbEntry;
pub use phys::PhysMem;
pub use ppc32::Ppc32Bat;
pub use ppc32::Ppc32Mmu;
pub use soft_tlb::SoftTlb;
pub use soft_tlb::SoftTlbEntry;
pub use soft_tlb::TlbPayload;

pub type Result<T> = std::result::Result<T, Exception>;

/// Dispatches a guest MMIO access to the device that owns the containing region. Implemented by
/// the `devices` crate's bus; kept as a trait here so `vm_memory` never depends on `devices`
/// (`vm` wires the two together), the same "define the seam where it's consumed" shape the
/// teacher uses for `devices::BusDevice`.
pub trait MmioBus: Send + Sync {
    fn mmio_read(&self, dev_idx: u32, offset: u64, size: u8) -> u64;
    fn mmio_write(&self, dev_idx: u32, offset: u64, size: u8, value: u64);
}

/// Notified before a write to an `exec`-tagged physical page becomes visible, so the translation
/// cache can invalidate any translation block covering that page. Implemented by the `jit` crate.
pub trait SmcNotify: Send + Sync {
    fn invalidate_phys_page(&self, pp: u64);
}

/// The uniform contract both MMU flavours (`Mips64Mmu`, `Ppc32Mmu`) present to the CPU executor:
/// a `read`/`write` pair plus bulk block copy, all going through the soft-TLB first.
pub trait AddressSpace: Send {
    /// Reads `size` bytes (1, 2, 4 or 8) at `vaddr`, honoring the architecture's endianness, and
    /// returns them zero-extended into a `u64`.
    fn read(&mut self, vaddr: u64, size: u8) -> Result<u64>;

    /// Writes the low `size` bytes of `value` at `vaddr`.
    fn write(&mut self, vaddr: u64, size: u8, value: u64) -> Result<()>;

    /// Bulk copy from guest memory starting at `vaddr` into `buf`, used by the boot loader and
    /// NVRAM/image loaders. Faults exactly as a sequence of byte reads would.
    fn read_block(&mut self, vaddr: u64, buf: &mut [u8]) -> Result<()>;

    /// Bulk copy from `buf` into guest memory starting at `vaddr`.
    fn write_block(&mut self, vaddr: u64, buf: &[u8]) -> Result<()>;

    /// Flushes every soft-TLB entry. Called whenever the CPU writes an MMU control register
    /// (`ASID`, `EntryHi`, PPC32 `SR[n]`/BAT registers) so no stale entry can be consulted.
    fn flush_tlb(&mut self);

    /// Whether the given virtual address currently resolves to an executable-tagged physical
    /// page, consulted by `jit` when deciding whether a freshly walked page can be trusted not to
    /// be self-modified later without notice.
    fn is_exec_tagged(&mut self, vaddr: u64) -> bool;
}
