// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The PowerPC-32 core: register file (GPRs, LR/CTR/XER, packed CR, MSR, segment registers,
//! SPRG, decrementer/time base) and a table-driven decoder over the common integer subset. Like
//! the MIPS64 core, this is a representative subset (arithmetic/logic, branches with the common
//! `BO` encodings, loads/stores, `mtspr`/`mfspr`, `mtsr`, `sc`, `rfi`) rather than the full
//! instruction set; anything else takes a `ReservedInstruction` trap.

use std::sync::Arc;
use std::sync::Mutex;

use jit::ExecState;
use jit::TbCache;
use vm_memory::AddressSpace;
use vm_memory::Ppc32Mmu;

use crate::irq::PendingIrqs;
use crate::GuestCpu;
use crate::RunState;
use crate::Trap;

const MSR_EE: u32 = 1 << 15;
const MSR_IR: u32 = 1 << 5;
const MSR_DR: u32 = 1 << 4;

const VEC_SYSTEM_CALL: u32 = 0x0000_0c00;
const VEC_PROGRAM: u32 = 0x0000_0700;
const VEC_ALIGNMENT: u32 = 0x0000_0600;
const VEC_EXTERNAL: u32 = 0x0000_0500;
const VEC_DSI: u32 = 0x0000_0300;

pub struct Ppc32Cpu {
    id: u32,
    gpr: [u32; 32],
    lr: u32,
    ctr: u32,
    xer: u32,
    xer_ca: bool,
    cr: u32,
    msr: u32,
    sprg: [u32; 4],
    srr0: u32,
    srr1: u32,
    dec: u32,
    tb: u64,
    pc: u32,
    mmu: Ppc32Mmu,
    tb_cache: Arc<Mutex<TbCache>>,
    irqs: PendingIrqs,
    run_state: RunState,
    idle_pc: Option<u32>,
}

impl Ppc32Cpu {
    pub fn new(id: u32, mmu: Ppc32Mmu, tb_cache: Arc<Mutex<TbCache>>) -> Self {
        Ppc32Cpu {
            id,
            gpr: [0; 32],
            lr: 0,
            ctr: 0,
            xer: 0,
            xer_ca: false,
            cr: 0,
            msr: 0,
            sprg: [0; 4],
            srr0: 0,
            srr1: 0,
            dec: 0,
            tb: 0,
            pc: 0,
            mmu,
            tb_cache,
            irqs: PendingIrqs::new(),
            run_state: RunState::Stopped,
            idle_pc: None,
        }
    }

    pub fn set_idle_pc(&mut self, pc: Option<u32>) {
        self.idle_pc = pc;
    }

    pub fn gpr(&self, n: usize) -> u32 {
        if n == 0 {
            0
        } else {
            self.gpr[n]
        }
    }

    fn set_gpr(&mut self, n: usize, value: u32) {
        if n != 0 {
            self.gpr[n] = value;
        }
    }

    pub fn cr(&self) -> u32 {
        self.cr
    }

    pub fn msr(&self) -> u32 {
        self.msr
    }

    fn cr_bit(&self, bi: u32) -> bool {
        (self.cr >> (31 - bi)) & 1 != 0
    }

    fn set_cr_bit(&mut self, bi: u32, value: bool) {
        let mask = 1u32 << (31 - bi);
        if value {
            self.cr |= mask;
        } else {
            self.cr &= !mask;
        }
    }

    /// Updates `CR0` the way every `Rc=1` integer op does: LT/GT/EQ against zero, SO copied from
    /// XER.
    fn update_cr0(&mut self, result: i32) {
        self.set_cr_bit(0, result < 0);
        self.set_cr_bit(1, result > 0);
        self.set_cr_bit(2, result == 0);
        self.set_cr_bit(3, self.xer & (1 << 31) != 0);
    }

    fn current_exec_state(&self) -> ExecState {
        ExecState {
            big_endian: true,
            addr64: false,
            kernel_mode: self.msr & (MSR_IR | MSR_DR) == 0,
        }
    }

    fn touch_page_cache(&mut self, vaddr: u32) {
        let vaddr_page = (vaddr as u64) & !(jit::MIN_PAGE as u64 - 1);
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
        self.mmu.read(self.pc as u64, 4).ok().map(|v| v as u32)
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

        let page = self.pc & !(jit::MIN_PAGE as u32 - 1);
        if self.pc == page {
            self.touch_page_cache(self.pc);
        }

        let Some(word) = self.fetch() else {
            self.trigger_exception(Trap::BusError, self.pc as u64);
            return;
        };

        let mut next_pc = None;
        self.execute(word, &mut next_pc);
        self.pc = next_pc.unwrap_or_else(|| self.pc.wrapping_add(4));
    }

    fn check_irq(&mut self) {
        if self.irqs.any_pending() && self.msr & MSR_EE != 0 {
            self.trigger_exception(Trap::ExternalInterrupt, 0);
        }
    }

    fn execute(&mut self, word: u32, next_pc: &mut Option<u32>) {
        let op = word >> 26;
        let rt = ((word >> 21) & 0x1f) as usize;
        let ra = ((word >> 16) & 0x1f) as usize;
        let rb = ((word >> 11) & 0x1f) as usize;
        let d = (word & 0xffff) as i16 as i32;
        let rc = word & 1;

        match op {
            14 => self.set_gpr(rt, (self.gpr(ra) as i32).wrapping_add(d) as u32),
            15 => self.set_gpr(rt, self.gpr(ra).wrapping_add((d as u32) << 16)),
            17 => self.trigger_exception(Trap::Syscall, 0),
            16 => self.branch_conditional(word, next_pc),
            18 => self.branch_unconditional(word, next_pc),
            19 => self.execute_cr_or_sys(word, next_pc),
            24 => self.set_gpr(rt, self.gpr(ra) | (d as u32 & 0xffff)),
            25 => self.set_gpr(rt, self.gpr(ra) | ((d as u32 & 0xffff) << 16)),
            26 => self.set_gpr(rt, self.gpr(ra) ^ (d as u32 & 0xffff)),
            27 => self.set_gpr(rt, self.gpr(ra) ^ ((d as u32 & 0xffff) << 16)),
            28 => {
                let v = self.gpr(ra) & (d as u32 & 0xffff);
                self.set_gpr(rt, v);
                self.update_cr0(v as i32);
            }
            31 => self.execute_extended(word, rt, ra, rb, rc),
            32 => self.load(rt, ra, d, 4, false),
            34 => self.load(rt, ra, d, 1, false),
            36 => self.store(rt, ra, d, 4),
            38 => self.store(rt, ra, d, 1),
            40 => self.load(rt, ra, d, 2, false),
            44 => self.store(rt, ra, d, 2),
            _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
        }
    }

    fn execute_extended(&mut self, word: u32, rt: usize, ra: usize, rb: usize, rc: u32) {
        let ext = (word >> 1) & 0x3ff;
        match ext {
            266 => {
                let v = self.gpr(ra).wrapping_add(self.gpr(rb));
                self.set_gpr(rt, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            40 => {
                let v = self.gpr(rb).wrapping_sub(self.gpr(ra));
                self.set_gpr(rt, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            28 => {
                let v = self.gpr(rt) & self.gpr(rb);
                self.set_gpr(ra, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            444 => {
                let v = self.gpr(rt) | self.gpr(rb);
                self.set_gpr(ra, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            316 => {
                let v = self.gpr(rt) ^ self.gpr(rb);
                self.set_gpr(ra, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            124 => {
                let v = !(self.gpr(rt) | self.gpr(rb));
                self.set_gpr(ra, v);
                if rc != 0 {
                    self.update_cr0(v as i32);
                }
            }
            339 => {
                let spr = (((word >> 16) & 0x1f) | (((word >> 11) & 0x1f) << 5)) as u32;
                let v = self.read_spr(spr);
                self.set_gpr(rt, v);
            }
            467 => {
                let spr = (((word >> 16) & 0x1f) | (((word >> 11) & 0x1f) << 5)) as u32;
                self.write_spr(spr, self.gpr(rt));
            }
            210 => {
                let sr = ((word >> 16) & 0xf) as usize;
                self.mmu.write_sr(sr, self.gpr(rt));
            }
            595 => {
                let sr = ((word >> 16) & 0xf) as usize;
                self.set_gpr(rt, self.mmu.sr[sr]);
            }
            _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
        }
    }

    fn execute_cr_or_sys(&mut self, word: u32, _next_pc: &mut Option<u32>) {
        let ext = (word >> 1) & 0x3ff;
        match ext {
            50 => {
                // rfi
                self.msr = self.srr1;
                self.pc = self.srr0;
            }
            _ => self.trigger_exception(Trap::ReservedInstruction, word as u64),
        }
    }

    fn read_spr(&self, spr: u32) -> u32 {
        match spr {
            1 => self.xer,
            8 => self.lr,
            9 => self.ctr,
            22 => self.dec,
            272..=275 => self.sprg[(spr - 272) as usize],
            _ => 0,
        }
    }

    fn write_spr(&mut self, spr: u32, value: u32) {
        match spr {
            1 => self.xer = value,
            8 => self.lr = value,
            9 => self.ctr = value,
            22 => self.dec = value,
            272..=275 => self.sprg[(spr - 272) as usize] = value,
            _ => {}
        }
    }

    fn branch_unconditional(&mut self, word: u32, next_pc: &mut Option<u32>) {
        let li = (word & 0x03ff_fffc) as i32;
        let li = (li << 6) >> 6; // sign-extend 26-bit field already masked to multiple of 4
        let aa = word & 2 != 0;
        let lk = word & 1 != 0;
        let base = if aa { 0 } else { self.pc };
        let target = base.wrapping_add(li as u32);
        if lk {
            self.lr = self.pc.wrapping_add(4);
        }
        *next_pc = Some(target);
    }

    fn branch_conditional(&mut self, word: u32, next_pc: &mut Option<u32>) {
        let bo = (word >> 21) & 0x1f;
        let bi = (word >> 16) & 0x1f;
        let bd = (word & 0xfffc) as i16 as i32;
        let aa = word & 2 != 0;
        let lk = word & 1 != 0;

        if bo & 0x04 == 0 {
            self.ctr = self.ctr.wrapping_sub(1);
        }
        let ctr_ok = bo & 0x04 != 0 || ((self.ctr != 0) == (bo & 0x02 == 0));
        let cond_ok = bo & 0x10 != 0 || (self.cr_bit(bi) == (bo & 0x08 != 0));

        if ctr_ok && cond_ok {
            let base = if aa { 0 } else { self.pc };
            let target = base.wrapping_add(bd as u32);
            if lk {
                self.lr = self.pc.wrapping_add(4);
            }
            *next_pc = Some(target);
        }
    }

    fn load(&mut self, rt: usize, ra: usize, d: i32, size: u8, signed: bool) {
        let vaddr = self.gpr(ra).wrapping_add(d as u32);
        match self.mmu.read(vaddr as u64, size) {
            Ok(v) => {
                let ext = if signed {
                    sign_extend(v as u32, size)
                } else {
                    v as u32
                };
                self.set_gpr(rt, ext);
            }
            Err(e) => self.raise_mmu_exception(e),
        }
    }

    fn store(&mut self, rt: usize, ra: usize, d: i32, size: u8) {
        let vaddr = self.gpr(ra).wrapping_add(d as u32);
        if let Err(e) = self.mmu.write(vaddr as u64, size, self.gpr(rt) as u64) {
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

fn sign_extend(v: u32, size: u8) -> u32 {
    match size {
        1 => v as u8 as i8 as i32 as u32,
        2 => v as u16 as i16 as i32 as u32,
        _ => v,
    }
}

impl GuestCpu for Ppc32Cpu {
    fn id(&self) -> u32 {
        self.id
    }

    fn reset(&mut self) {
        self.gpr = [0; 32];
        self.lr = 0;
        self.ctr = 0;
        self.xer = 0;
        self.xer_ca = false;
        self.cr = 0;
        self.msr = 0;
        self.sprg = [0; 4];
        self.srr0 = 0;
        self.srr1 = 0;
        self.pc = 0xfff0_0100;
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
        self.srr0 = self.pc;
        self.srr1 = self.msr;
        let vector = match kind {
            Trap::Syscall => VEC_SYSTEM_CALL,
            Trap::ReservedInstruction => VEC_PROGRAM,
            Trap::AddressError => VEC_ALIGNMENT,
            Trap::ExternalInterrupt => VEC_EXTERNAL,
            Trap::TlbMiss | Trap::BusError | Trap::Overflow | Trap::Breakpoint => VEC_DSI,
        };
        let _ = aux;
        self.msr &= !(MSR_IR | MSR_DR | MSR_EE);
        self.pc = vector;
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
        self.pc as u64
    }

    /// The time base free-runs regardless of decrementer state; the decrementer itself counts
    /// down, matching the two real PPC counters this subset models.
    fn tick(&mut self) {
        self.tb = self.tb.wrapping_add(1);
        self.dec = self.dec.wrapping_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn cpu(mem_bytes: u64) -> Ppc32Cpu {
        let mmu = Ppc32Mmu::new(PhysMem::new(mem_bytes).unwrap(), Arc::new(NullBus), Arc::new(NullSmc));
        let tb_cache = Arc::new(Mutex::new(TbCache::new(Arc::new(jit::SharedPool::new()))));
        let mut cpu = Ppc32Cpu::new(0, mmu, tb_cache);
        cpu.reset();
        cpu.pc = 0;
        cpu
    }

    fn assemble_and_run(cpu: &mut Ppc32Cpu, program: &[u32], start: u32) {
        for (i, &word) in program.iter().enumerate() {
            cpu.mmu.write((start + (i as u32) * 4) as u64, 4, word as u64).unwrap();
        }
        cpu.pc = start;
        cpu.run_state = RunState::Running;
        for _ in 0..program.len() {
            cpu.step();
        }
        cpu.run_state = RunState::Stopped;
    }

    #[test]
    fn addi_sets_register() {
        let mut cpu = cpu(0x10000);
        // addi r3, r0, 42
        let instr = (14u32 << 26) | (3 << 21) | (0 << 16) | 42u32;
        assemble_and_run(&mut cpu, &[instr], 0);
        assert_eq!(cpu.gpr(3), 42);
    }

    #[test]
    fn add_x_form_updates_cr0_when_rc_set() {
        let mut cpu = cpu(0x10000);
        let addi_r1 = (14u32 << 26) | (1 << 21) | (0 << 16) | 5u32;
        // add. r3, r1, r1  (rc = 1): ext = 266, rc bit = 1
        let add_rc = (31u32 << 26) | (3 << 21) | (1 << 16) | (1 << 11) | (266 << 1) | 1;
        assemble_and_run(&mut cpu, &[addi_r1, add_rc], 0);
        assert_eq!(cpu.gpr(3), 10);
        assert!(cpu.cr_bit(1)); // GT
    }

    #[test]
    fn unconditional_branch_with_link_sets_lr() {
        let mut cpu = cpu(0x10000);
        // b +8, AA=0, LK=1
        let instr = (18u32 << 26) | 8 | 1;
        assemble_and_run(&mut cpu, &[instr], 0);
        assert_eq!(cpu.pc(), 8);
        assert_eq!(cpu.lr, 4);
    }

    #[test]
    fn sc_redirects_to_system_call_vector() {
        let mut cpu = cpu(0x10000);
        let sc = 17u32 << 26;
        assemble_and_run(&mut cpu, &[sc], 0);
        assert_eq!(cpu.pc(), VEC_SYSTEM_CALL as u64);
        assert_eq!(cpu.srr0, 0);
    }

    #[test]
    fn idle_pc_halts_cpu() {
        let mut cpu = cpu(0x10000);
        cpu.set_idle_pc(Some(0));
        cpu.run_cpu();
        assert_eq!(cpu.run_state(), RunState::Halted);
    }

    #[test]
    fn tick_advances_time_base_and_decrements_decrementer() {
        let mut cpu = cpu(0x10000);
        cpu.tick();
        cpu.tick();
        assert_eq!(cpu.tb, 2);
        assert_eq!(cpu.dec, u32::MAX - 1);
    }
}
