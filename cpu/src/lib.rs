// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Guest CPU cores: register files, table-driven decoders, and the interpreter leaves both
//! architectures' opcodes bottom out in. Each core calls into `jit::TbCache` to keep its
//! per-page translation cache warm, but decoding and execution both run directly against
//! `self.gpr`/`self.cp0`/`self.msr` — there is no separate emission back-end.

mod irq;
mod mips64;
mod ppc32;

pub use irq::PendingIrqs;
pub use mips64::Cp0;
pub use mips64::Mips64Cpu;
pub use ppc32::Ppc32Cpu;

/// A CPU's run state, sampled by the VM lifecycle and by the CPU's own dispatcher loop at safe
/// points (instruction boundaries, never mid-instruction).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    Halted,
    Suspended,
}

/// Architecture-neutral exception/trap classification. Each core maps these onto its own vector
/// table and register side effects (MIPS `Cause`/`EPC`/`Status`, PPC `SRR0`/`SRR1`/`MSR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    TlbMiss,
    AddressError,
    BusError,
    Syscall,
    Breakpoint,
    ReservedInstruction,
    Overflow,
    ExternalInterrupt,
}

/// The shared contract both cores present to the VM container. `run_cpu` is a blocking call: it
/// returns only once `run_state()` leaves `Running` (stopped, or halted at an idle PC with
/// nothing left to simulate until the next external event wakes it).
pub trait GuestCpu: Send {
    fn id(&self) -> u32;
    fn reset(&mut self);
    fn run_cpu(&mut self);
    fn trigger_exception(&mut self, kind: Trap, aux: u64);
    fn set_irq(&mut self, line: u32);
    fn clear_irq(&mut self, line: u32);
    fn run_state(&self) -> RunState;
    fn set_run_state(&mut self, state: RunState);
    fn pc(&self) -> u64;

    /// Advances this CPU's free-running architectural counter by one tick, called from the VM's
    /// periodic-task thread rather than the dispatcher itself so counter advance keeps happening
    /// while the CPU is halted at its idle PC. A no-op for cores with no such counter.
    fn tick(&mut self) {}
}
