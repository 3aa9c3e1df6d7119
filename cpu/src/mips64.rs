// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The MIPS64 core: register file, CP0, and a table-driven decoder over the common 32-bit integer
//! subset (arithmetic/logic/shift, branches, loads/stores, syscall/break, and the CP0 move/TLB
//! instructions a boot loader needs). The 64-bit-suffixed (`DADDU`, `DSLL`, ...) and unaligned
//! load/store (`LWL`/`LWR`/`SWL`/`SWR`) forms are out of scope for this subset — reserved-
//! instruction faults cover anything this decoder doesn't recognize, the same fallback the
//! reference implementation's `mips64_exec_*` tables use for unimplemented opcodes.

use std::sync::Arc;
use std::sync::Mutex;

use jit::ExecState;
use jit::TbCache;
use vm_memory::AddressSpace;
use vm_memory::Mips64Mmu;

use crate::irq::PendingIrqs;
use crate::GuestCpu;
use crate::RunState;
use crate::Trap;

const GENERAL_VECTOR: u64 = 0xffff_ffff_8000_0180;

/// Coprocessor 0: the subset of control registers a boot loader and interrupt handler touch.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cp0 {
    pub status: u32,
    pub cause: u32,
    pub epc: u64,
    pub count: u32,
    pub compare: u32,
    pub entry_hi: u64,
    pub entry_lo0: u64,
    pub entry_lo1: u64,
    pub page_mask: u32,
    pub index: u32,
    pub random: u32,
    pub wired: u32,
    pub prid: u32,
    pub config: u32,
}

const STATUS_IE: u32 = 1 << 0;
const STATUS_EXL: u32 = 1 << 1;

pub struct Mips64Cpu {
    id: u32,
    gpr: [u64; 32],
    hi: u64,
    lo: u64,
    pc: u64,
    delay_branch: Option<u64>,
    in_delay_slot: bool,
    cp0: Cp0,
    mmu: Mips64Mmu,
    tb_cache: Arc<Mutex<TbCache>>,
    irqs: PendingIrqs,
    run_state: RunState,
    idle_pc: Option<u64>,
}

impl Mips64Cpu {
    pub fn new(id: u32, mmu: Mips64Mmu, tb_cache: Arc<Mutex<TbCache>>, prid: u32) -> Self {
        let mut cpu = Mips64Cpu {
            id,
            gpr: [0; 32],
            hi: 0,
            lo: 0,
            pc: 0,
            delay_branch: None,
            in_delay_slot: false,
            cp0: Cp0::default(),
            mmu,
            tb_cache,
            irqs: PendingIrqs::new(),
            run_state: RunState::Stopped,
            idle_pc: None,
        };
        cpu.cp0.prid = prid;
        cpu
    }

    pub fn set_idle_pc(&mut self, pc: Option<u64>) {
        self.idle_pc = pc;
    }

    pub fn gpr(&self, n: usize) -> u64 {
        if n == 0 {
            0
        } else {
            self.gpr[n]
        }
    }

    fn set_gpr(&mut self, n: usize, value: u64) {
        if n != 0 {
            self.gpr[n] = value;
        }
    }

    pub fn cp0(&self) -> &Cp0 {
        &self.cp0
    }

    /// Current 4 KiB-aligned virtual page the CPU is fetching from, used to key the translation
    /// block cache per §3's `{vaddr_page, ...}` data model.
    fn current_exec_state(&self) -> ExecState {
        ExecState {
            big_endian: true,
            addr64: self.mmu.addr64,
            kernel_mode: self.mmu.mode == vm_memory::mips64::Mode::Kernel,
        }
    }

    fn touch_page_cache(&mut self, vaddr: u64) {
        let vaddr_page = vaddr & !(jit::MIN_PAGE as u64 - 1);
        let mut page = vec![0u8; jit::MIN_PAGE];
        if self.mmu.read_block(vaddr_page, &mut page).is_err() {
            return;
        }
        let exec_state = self.current_exec_state();
        let _ = self
            .tb_cache
            .lock()
            .unwrap()
            .get_or_build(vaddr_page, vaddr_page, exec_state, &page, 0);
    }

    fn fetch(&mut self) -> Option<u32> {
        self.mmu.read(self.pc, 4).ok().map(|v| v as u32)
    }

    fn step(&mut self) {
        // IRQs are sampled before the idle-PC check so a CPU parked at its idle PC still takes a
        // pending interrupt instead of re-halting without ever looking at the pending bitmap.
        self.check_irq();
        if let Some(pc) = self.idle_pc {
            if self.pc == pc {
                self.run_state = RunState::Halted;
                return;
            }
        }
        if self.run_state != RunState::Running {
            return;
        }

        let page = self.pc & !(jit::MIN_PAGE as u64 - 1);
        if self.pc == page {
            self.touch_page_cache(self.pc);
        }

        let Some(word) = self.fetch() else {
            self.trigger_exception(Trap::BusError, self.pc);
            return;
        };

        let mut branch_target = None;
        self.execute(word, &mut branch_target);

        let old_pc = self.pc;
        self.pc = match self.delay_branch.take() {
            Some(target) => {
                self.in_delay_slot = false;
                target
            }
            None => old_pc.wrapping_add(4),
        };
        if let Some(target) = branch_target {
            self.delay_branch = Some(target);
            self.in_delay_slot = true;
        }
    }

    fn check_irq(&mut self) {
        if self.irqs.any_pending()
            && self.cp0.status & STATUS_IE != 0
            && self.cp0.status & STATUS_EXL == 0
        {
            self.trigger_exception(Trap::ExternalInterrupt, 0);
        }
    }

    fn execute(&mut self, word: u32, branch_target: &mut Option<u64>) {
        let op = word >> 26;
        let rs = ((word >> 21) & 0x1f) as usize;
        let rt = ((word >> 16) & 0x1f) as usize;
        let rd = ((word >> 11) & 0x1f) as usize;
        let sh = (word >> 6) & 0x1f;
        let funct = word & 0x3f;
        let imm = (word & 0xffff) as u16;
        let simm = imm as i16 as i64 as u64;
        let target = word & 0x03ff_ffff;

        match op {
            0x00 => self.execute_special(rs, rt, rd, sh, funct, branch_target),
            0x01 => self.execute_regimm(rs, rt, imm, branch_target),
            0x02 => {
                *branch_target = Some((self.pc.wrapping_add(4) & !0x0fff_ffff) | ((target as u64) << 2));
            }
            0x03 => {
                self.set_gpr(31, self.pc.wrapping_add(8));
                *branch_target = Some((self.pc.wrapping_add(4) & !0x0fff_ffff) | ((target as u64) << 2));
            }
            0x04 => self.branch_if(self.gpr(rs) == self.gpr(rt), simm, branch_target),
            0x05 => self.branch_if(self.gpr(rs) != self.gpr(rt), simm, branch_target),
            0x06 => self.branch_if((self.gpr(rs) as i64) <= 0, simm, branch_target),
            0x07 => self.branch_if((self.gpr(rs) as i64) > 0, simm, branch_target),
            0x08 => {
                let a = self.gpr(rs) as i32;
                let b = simm as i64 as i32;
                match a.checked_add(b) {
                    Some(v) => self.set_gpr(rt, v as i64 as u64),
                    None => self.trigger_exception(Trap::Overflow, self.pc),
                }
            }
            0x09 => {
                let v = self.gpr(rs).wrapping_add(simm);
                self.set_gpr(rt, v);
            }
            0x0a => {
                let v = ((self.gpr(rs) as i64) < (simm as i64)) as u64;
                self.set_gpr(rt, v);
            }
            0x0b => {
                let v = (self.gpr(rs) < simm) as u64;
                self.set_gpr(rt, v);
            }
            0x0c => self.set_gpr(rt, self.gpr(rs) & imm as u64),
            0x0d => self.set_gpr(rt, self.gpr(rs) | imm as u64),
            0x0e => self.set_gpr(rt, self.gpr(rs) ^ imm as u64),
            0x0f => self.set_gpr(rt, (imm as u64) << 16),
            0x10 => self.execute_cop0(rs, rt, word, branch_target),
            0x20 => self.load(rt, rs, simm, 1, true),
            0x21 => self.load(rt, rs, simm, 2, true),
            0x23 => self.load(rt, rs, simm, 4, true),
            0x24 => self.load(rt, rs, simm, 1, false),
            0x25 => self.load(rt, rs, simm, 2, false),
            0x28 => self.store(rt, rs, simm, 1),
            0x29 => self.store(rt, rs, simm, 2),
            0x2b => self.store(rt, rs, simm, 4),
            _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
        }
    }

    fn execute_special(
        &mut self,
        rs: usize,
        rt: usize,
        rd: usize,
        sh: u32,
        funct: u32,
        branch_target: &mut Option<u64>,
    ) {
        match funct {
            0x00 => self.set_gpr(rd, self.gpr(rt) << sh),
            0x02 => self.set_gpr(rd, ((self.gpr(rt) as u32) >> sh) as u64),
            0x03 => self.set_gpr(rd, ((self.gpr(rt) as i32) >> sh) as i64 as u64),
            0x04 => self.set_gpr(rd, self.gpr(rt) << (self.gpr(rs) & 0x1f)),
            0x06 => self.set_gpr(rd, ((self.gpr(rt) as u32) >> (self.gpr(rs) & 0x1f)) as u64),
            0x07 => self.set_gpr(rd, ((self.gpr(rt) as i32) >> (self.gpr(rs) & 0x1f)) as i64 as u64),
            0x08 => *branch_target = Some(self.gpr(rs)),
            0x09 => {
                self.set_gpr(rd, self.pc.wrapping_add(8));
                *branch_target = Some(self.gpr(rs));
            }
            0x0c => self.trigger_exception(Trap::Syscall, 0),
            0x0d => self.trigger_exception(Trap::Breakpoint, 0),
            0x10 => self.set_gpr(rd, self.hi),
            0x11 => self.hi = self.gpr(rs),
            0x12 => self.set_gpr(rd, self.lo),
            0x13 => self.lo = self.gpr(rs),
            0x18 => {
                let prod = (self.gpr(rs) as i32 as i64) * (self.gpr(rt) as i32 as i64);
                self.lo = prod as u32 as u64;
                self.hi = (prod >> 32) as u32 as u64;
            }
            0x19 => {
                let prod = (self.gpr(rs) as u32 as u64) * (self.gpr(rt) as u32 as u64);
                self.lo = prod & 0xffff_ffff;
                self.hi = prod >> 32;
            }
            0x1a => {
                let a = self.gpr(rs) as i32;
                let b = self.gpr(rt) as i32;
                if b != 0 {
                    self.lo = (a / b) as u32 as u64;
                    self.hi = (a % b) as u32 as u64;
                }
            }
            0x1b => {
                let a = self.gpr(rs) as u32;
                let b = self.gpr(rt) as u32;
                if b != 0 {
                    self.lo = (a / b) as u64;
                    self.hi = (a % b) as u64;
                }
            }
            0x20 => {
                let a = self.gpr(rs) as i32;
                let b = self.gpr(rt) as i32;
                match a.checked_add(b) {
                    Some(v) => self.set_gpr(rd, v as i64 as u64),
                    None => self.trigger_exception(Trap::Overflow, self.pc),
                }
            }
            0x21 => self.set_gpr(rd, self.gpr(rs).wrapping_add(self.gpr(rt))),
            0x22 => {
                let a = self.gpr(rs) as i32;
                let b = self.gpr(rt) as i32;
                match a.checked_sub(b) {
                    Some(v) => self.set_gpr(rd, v as i64 as u64),
                    None => self.trigger_exception(Trap::Overflow, self.pc),
                }
            }
            0x23 => self.set_gpr(rd, self.gpr(rs).wrapping_sub(self.gpr(rt))),
            0x24 => self.set_gpr(rd, self.gpr(rs) & self.gpr(rt)),
            0x25 => self.set_gpr(rd, self.gpr(rs) | self.gpr(rt)),
            0x26 => self.set_gpr(rd, self.gpr(rs) ^ self.gpr(rt)),
            0x27 => self.set_gpr(rd, !(self.gpr(rs) | self.gpr(rt))),
            0x2a => self.set_gpr(rd, ((self.gpr(rs) as i64) < (self.gpr(rt) as i64)) as u64),
            0x2b => self.set_gpr(rd, (self.gpr(rs) < self.gpr(rt)) as u64),
            _ => self.trigger_exception(Trap::ReservedInstruction, funct as u64),
        }
    }

    fn execute_regimm(&mut self, rs: usize, rt: usize, imm: u16, branch_target: &mut Option<u64>) {
        let simm = imm as i16 as i64 as u64;
        match rt {
            0x00 => self.branch_if((self.gpr(rs) as i64) < 0, simm, branch_target),
            0x01 => self.branch_if((self.gpr(rs) as i64) >= 0, simm, branch_target),
            _ => self.trigger_exception(Trap::ReservedInstruction, rt as u64),
        }
    }

    fn execute_cop0(&mut self, rs: usize, rt: usize, word: u32, _branch_target: &mut Option<u64>) {
        match rs {
            0x00 => {
                let v = self.cp0_read(word);
                self.set_gpr(rt, v);
            }
            0x04 => {
                let v = self.gpr(rt);
                self.cp0_write(word, v);
            }
            0x10 => {
                // CO format: funct selects the TLB/ERET operation.
                match word & 0x3f {
                    0x02 => self.mmu.write_tlb_entry(
                        self.cp0.index as usize,
                        vm_memory::Mips64TlbEntry {
                            mask: self.cp0.page_mask as u64,
                            vpn2: self.cp0.entry_hi >> 13,
                            asid: (self.cp0.entry_hi & 0xff) as u32,
                            global: (self.cp0.entry_lo0 & 1) != 0 && (self.cp0.entry_lo1 & 1) != 0,
                            lo0_pfn: self.cp0.entry_lo0 >> 6,
                            lo0_valid: self.cp0.entry_lo0 & 2 != 0,
                            lo0_dirty: self.cp0.entry_lo0 & 4 != 0,
                            lo1_pfn: self.cp0.entry_lo1 >> 6,
                            lo1_valid: self.cp0.entry_lo1 & 2 != 0,
                            lo1_dirty: self.cp0.entry_lo1 & 4 != 0,
                        },
                    ),
                    0x06 => {
                        let idx = self.cp0.random as usize % 48;
                        let entry = vm_memory::Mips64TlbEntry {
                            mask: self.cp0.page_mask as u64,
                            vpn2: self.cp0.entry_hi >> 13,
                            asid: (self.cp0.entry_hi & 0xff) as u32,
                            global: (self.cp0.entry_lo0 & 1) != 0 && (self.cp0.entry_lo1 & 1) != 0,
                            lo0_pfn: self.cp0.entry_lo0 >> 6,
                            lo0_valid: self.cp0.entry_lo0 & 2 != 0,
                            lo0_dirty: self.cp0.entry_lo0 & 4 != 0,
                            lo1_pfn: self.cp0.entry_lo1 >> 6,
                            lo1_valid: self.cp0.entry_lo1 & 2 != 0,
                            lo1_dirty: self.cp0.entry_lo1 & 4 != 0,
                        };
                        self.mmu.write_tlb_entry(idx, entry);
                    }
                    0x08 => {
                        let vpn2 = self.cp0.entry_hi >> 13;
                        match self.mmu.probe_tlb(vpn2, (self.cp0.entry_hi & 0xff) as u32) {
                            Some(idx) => self.cp0.index = idx as u32,
                            None => self.cp0.index = 1 << 31,
                        }
                    }
                    0x18 => {
                        self.cp0.status &= !STATUS_EXL;
                        self.pc = self.cp0.epc;
                        self.in_delay_slot = false;
                    }
                    _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
                }
            }
            _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
        }
    }

    fn cp0_read(&self, word: u32) -> u64 {
        match (word >> 11) & 0x1f {
            0 => self.cp0.index as u64,
            1 => self.cp0.random as u64,
            8 => self.cp0.entry_lo0,
            9 => self.cp0.count as u64,
            10 => self.cp0.entry_hi,
            11 => self.cp0.compare as u64,
            12 => self.cp0.status as u64,
            13 => self.cp0.cause as u64,
            14 => self.cp0.epc,
            15 => self.cp0.prid as u64,
            16 => self.cp0.config as u64,
            _ => 0,
        }
    }

    fn cp0_write(&mut self, word: u32, value: u64) {
        match (word >> 11) & 0x1f {
            0 => self.cp0.index = value as u32,
            5 => self.cp0.page_mask = value as u32,
            6 => self.cp0.wired = value as u32,
            8 => self.cp0.entry_lo0 = value,
            9 => self.cp0.count = value as u32,
            10 => {
                self.cp0.entry_hi = value;
                self.mmu.asid = (value & 0xff) as u32;
                self.mmu.flush_tlb();
            }
            11 => self.cp0.compare = value as u32,
            12 => self.cp0.status = value as u32,
            13 => self.cp0.cause = value as u32,
            14 => self.cp0.epc = value,
            16 => self.cp0.config = value as u32,
            _ => {}
        }
    }

    fn branch_if(&mut self, cond: bool, simm: u64, branch_target: &mut Option<u64>) {
        if cond {
            *branch_target = Some(self.pc.wrapping_add(4).wrapping_add(simm << 2));
        }
    }

    fn load(&mut self, rt: usize, rs: usize, off: u64, size: u8, signed: bool) {
        let vaddr = self.gpr(rs).wrapping_add(off);
        match self.mmu.read(vaddr, size) {
            Ok(v) => {
                let ext = if signed {
                    sign_extend(v, size)
                } else {
                    v
                };
                self.set_gpr(rt, ext);
            }
            Err(e) => self.raise_mmu_exception(e),
        }
    }

    fn store(&mut self, rt: usize, rs: usize, off: u64, size: u8) {
        let vaddr = self.gpr(rs).wrapping_add(off);
        if let Err(e) = self.mmu.write(vaddr, size, self.gpr(rt)) {
            self.raise_mmu_exception(e);
        }
    }

    fn raise_mmu_exception(&mut self, e: vm_memory::Exception) {
        let trap = match e {
            vm_memory::Exception::AddressError { .. } => Trap::AddressError,
            vm_memory::Exception::BusError { .. } => Trap::BusError,
            vm_memory::Exception::TlbMiss { .. } | vm_memory::Exception::ProtectionViolation { .. } => {
                Trap::TlbMiss
            }
        };
        self.trigger_exception(trap, e.vaddr());
    }
}

fn sign_extend(v: u64, size: u8) -> u64 {
    match size {
        1 => v as u8 as i8 as i64 as u64,
        2 => v as u16 as i16 as i64 as u64,
        4 => v as u32 as i32 as i64 as u64,
        _ => v,
    }
}

impl GuestCpu for Mips64Cpu {
    fn id(&self) -> u32 {
        self.id
    }

    fn reset(&mut self) {
        self.gpr = [0; 32];
        self.hi = 0;
        self.lo = 0;
        self.delay_branch = None;
        self.in_delay_slot = false;
        // IE set from reset: this core never models a boot loader that explicitly unmasks
        // interrupts, and an idling CPU must still be wakeable by set_irq (§8 "IRQ delivery
        // timing").
        self.cp0.status = STATUS_IE;
        self.cp0.cause = 0;
        self.pc = vm_memory::mips64::ROM_PC;
        self.set_gpr(29, vm_memory::mips64::ROM_SP);
        self.mmu.flush_tlb();
        self.run_state = RunState::Stopped;
    }

    fn run_cpu(&mut self) {
        self.run_state = RunState::Running;
        while self.run_state == RunState::Running {
            self.step();
        }
    }

    fn trigger_exception(&mut self, kind: Trap, aux: u64) {
        if self.cp0.status & STATUS_EXL == 0 {
            self.cp0.epc = if self.in_delay_slot {
                self.pc.wrapping_sub(4)
            } else {
                self.pc
            };
        }
        let code: u32 = match kind {
            Trap::TlbMiss => 2,
            Trap::AddressError => 4,
            Trap::BusError => 6,
            Trap::Syscall => 8,
            Trap::Breakpoint => 9,
            Trap::ReservedInstruction => 10,
            Trap::Overflow => 12,
            Trap::ExternalInterrupt => 0,
        };
        self.cp0.cause = (self.cp0.cause & !0x7c) | (code << 2) | if self.in_delay_slot { 1 << 31 } else { 0 };
        let _ = aux;
        self.cp0.status |= STATUS_EXL;
        self.pc = GENERAL_VECTOR;
        self.delay_branch = None;
        self.in_delay_slot = false;
    }

    fn set_irq(&mut self, line: u32) {
        self.irqs.set(line);
    }

    fn clear_irq(&mut self, line: u32) {
        self.irqs.clear(line);
    }

    fn run_state(&self) -> RunState {
        self.run_state
    }

    fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    fn pc(&self) -> u64 {
        self.pc
    }

    /// CP0 `Count` is a free-running counter a real MIPS core increments every other cycle; this
    /// subset increments it once per tick since nothing here models cycle-accurate timing.
    fn tick(&mut self) {
        self.cp0.count = self.cp0.count.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vm_memory::MmioBus;
    use vm_memory::PhysMem;
    use vm_memory::SmcNotify;

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

    fn cpu(mem_bytes: u64) -> Mips64Cpu {
        let mmu = Mips64Mmu::new(PhysMem::new(mem_bytes).unwrap(), Arc::new(NullBus), Arc::new(NullSmc));
        let tb_cache = Arc::new(Mutex::new(TbCache::new(Arc::new(jit::SharedPool::new()))));
        let mut cpu = Mips64Cpu::new(0, mmu, tb_cache, vm_memory::mips64::PRID_R7000);
        cpu.reset();
        cpu
    }

    fn assemble_and_run(cpu: &mut Mips64Cpu, program: &[u32], start: u64) {
        for (i, &word) in program.iter().enumerate() {
            cpu.mmu.write(start + (i as u64) * 4, 4, word as u64).unwrap();
        }
        cpu.pc = start;
        cpu.run_state = RunState::Running;
        for _ in 0..program.len() {
            cpu.step();
        }
        cpu.run_state = RunState::Stopped;
    }

    #[test]
    fn addiu_sets_register() {
        let mut cpu = cpu(0x10000);
        // addiu $t0, $zero, 42
        let instr = (0x09 << 26) | (0 << 21) | (8 << 16) | 42u32;
        assemble_and_run(&mut cpu, &[instr], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.gpr(8), 42);
    }

    #[test]
    fn beq_takes_branch_after_delay_slot() {
        let mut cpu = cpu(0x10000);
        // beq $zero, $zero, 2 ; addiu $t1, $zero, 7 (delay slot) ; addiu $t0, $zero, 99 (skipped)
        let beq = (0x04 << 26) | 2u32;
        let addiu_t1 = (0x09 << 26) | (9 << 16) | 7u32;
        let addiu_t0 = (0x09 << 26) | (8 << 16) | 99u32;
        let addiu_t2 = (0x09 << 26) | (10 << 16) | 5u32;
        assemble_and_run(
            &mut cpu,
            &[beq, addiu_t1, addiu_t0, addiu_t2],
            vm_memory::mips64::KSEG0_BASE,
        );
        assert_eq!(cpu.gpr(9), 7);
        assert_eq!(cpu.gpr(10), 5);
        assert_eq!(cpu.gpr(8), 0);
    }

    #[test]
    fn syscall_redirects_to_general_vector_and_sets_epc() {
        let mut cpu = cpu(0x10000);
        let syscall = 0x0c;
        assemble_and_run(&mut cpu, &[syscall], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.pc(), GENERAL_VECTOR);
        assert_eq!(cpu.cp0().epc, vm_memory::mips64::KSEG0_BASE);
        assert_ne!(cpu.cp0().status & STATUS_EXL, 0);
    }

    #[test]
    fn idle_pc_halts_cpu() {
        let mut cpu = cpu(0x10000);
        cpu.set_idle_pc(Some(vm_memory::mips64::ROM_PC));
        cpu.run_cpu();
        assert_eq!(cpu.run_state(), RunState::Halted);
    }

    #[test]
    fn tick_advances_cp0_count() {
        let mut cpu = cpu(0x10000);
        for _ in 0..5 {
            cpu.tick();
        }
        assert_eq!(cpu.cp0().count, 5);
    }

    #[test]
    fn addi_traps_on_signed_overflow_but_addiu_wraps() {
        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MAX as u32 as u64);
        // addi $t1, $t0, 1
        let addi = (0x08 << 26) | (8 << 21) | (9 << 16) | 1u32;
        assemble_and_run(&mut cpu, &[addi], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.pc(), GENERAL_VECTOR);
        assert_ne!(cpu.cp0().status & STATUS_EXL, 0);
        assert_eq!(cpu.gpr(9), 0);

        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MAX as u32 as u64);
        // addiu $t1, $t0, 1
        let addiu = (0x09 << 26) | (8 << 21) | (9 << 16) | 1u32;
        assemble_and_run(&mut cpu, &[addiu], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.gpr(9), i32::MIN as u32 as u64);
    }

    #[test]
    fn add_traps_on_signed_overflow_but_addu_wraps() {
        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MAX as u32 as u64);
        cpu.set_gpr(9, 1);
        // add $t2, $t0, $t1
        let add = (8 << 21) | (9 << 16) | (10 << 11) | 0x20u32;
        assemble_and_run(&mut cpu, &[add], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.pc(), GENERAL_VECTOR);
        assert_ne!(cpu.cp0().status & STATUS_EXL, 0);
        assert_eq!(cpu.gpr(10), 0);

        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MAX as u32 as u64);
        cpu.set_gpr(9, 1);
        // addu $t2, $t0, $t1
        let addu = (8 << 21) | (9 << 16) | (10 << 11) | 0x21u32;
        assemble_and_run(&mut cpu, &[addu], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.gpr(10), i32::MIN as u32 as u64);
    }

    #[test]
    fn sub_traps_on_signed_overflow_but_subu_wraps() {
        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MIN as u32 as u64);
        cpu.set_gpr(9, 1);
        // sub $t2, $t0, $t1
        let sub = (8 << 21) | (9 << 16) | (10 << 11) | 0x22u32;
        assemble_and_run(&mut cpu, &[sub], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.pc(), GENERAL_VECTOR);
        assert_ne!(cpu.cp0().status & STATUS_EXL, 0);
        assert_eq!(cpu.gpr(10), 0);

        let mut cpu = cpu(0x10000);
        cpu.set_gpr(8, i32::MIN as u32 as u64);
        cpu.set_gpr(9, 1);
        // subu $t2, $t0, $t1
        let subu = (8 << 21) | (9 << 16) | (10 << 11) | 0x23u32;
        assemble_and_run(&mut cpu, &[subu], vm_memory::mips64::KSEG0_BASE);
        assert_eq!(cpu.gpr(10), i32::MAX as u32 as u64);
    }

    #[test]
    fn reset_leaves_interrupts_enabled_so_idle_cpu_wakes_on_irq() {
        let mut cpu = cpu(0x10000);
        assert_ne!(cpu.cp0().status & STATUS_IE, 0);
        cpu.set_idle_pc(Some(vm_memory::mips64::ROM_PC));
        cpu.run_cpu();
        assert_eq!(cpu.run_state(), RunState::Halted);

        cpu.set_irq(0);
        cpu.run_state = RunState::Running;
        cpu.step();
        assert_eq!(cpu.run_state(), RunState::Running);
        assert_ne!(cpu.pc(), vm_memory::mips64::ROM_PC);
    }
}
