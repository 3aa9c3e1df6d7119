// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error as ThisError;

/// An MMU/bus fault raised by an access through the `AddressSpace` contract. Every variant is
/// delivered to the guest through its architectural exception vector (§4.E); none of these ever
/// surface to the host process except via the CPU's double-fault handling.
#[sorted]
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// Misaligned access for the requested size (e.g. a 4-byte load at an address not a
    /// multiple of 4).
    #[error("address error at {vaddr:#x} (write={write})")]
    AddressError { vaddr: u64, write: bool },
    /// The physical address resolved by the MMU walk has no backing RAM or device.
    #[error("bus error at {vaddr:#x} (write={write})")]
    BusError { vaddr: u64, write: bool },
    /// A privileged access was attempted from a mode that doesn't permit it, or a write was
    /// attempted against a read-only mapping.
    #[error("protection violation at {vaddr:#x} (write={write})")]
    ProtectionViolation { vaddr: u64, write: bool },
    /// No soft-TLB entry and no page-table/BAT/segment entry covers `vaddr`.
    #[error("TLB miss at {vaddr:#x} (write={write})")]
    TlbMiss { vaddr: u64, write: bool },
}

impl Exception {
    pub fn vaddr(&self) -> u64 {
        match *self {
            Exception::AddressError { vaddr, .. }
            | Exception::BusError { vaddr, .. }
            | Exception::ProtectionViolation { vaddr, .. }
            | Exception::TlbMiss { vaddr, .. } => vaddr,
        }
    }

    pub fn is_write(&self) -> bool {
        match *self {
            Exception::AddressError { write, .. }
            | Exception::BusError { write, .. }
            | Exception::ProtectionViolation { write, .. }
            | Exception::TlbMiss { write, .. } => write,
        }
    }
}
