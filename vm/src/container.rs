// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VM container: CPU, RAM/ROM, device graph, and IRQ routing bound together behind the
//! uniform lifecycle (`create -> init -> start -> suspend -> resume -> stop -> free`) every
//! caller (the CLI, the hypervisor protocol, tests) drives a VM through.

use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use cpu::GuestCpu;
use cpu::RunState;
use devices::Bus;
use devices::DeviceKind;
use devices::IrqRouter;
use devices::NvramDevice;
use devices::PciArena;
use devices::PciHostBridge;
use devices::RamWindow;
use devices::StubPciFunction;
use timer_wheel::PeriodicTasks;
use timer_wheel::TaskId;
use vm_memory::PhysMem;

use crate::config::Arch;
use crate::config::VmConfig;
use crate::config::NVRAM_BASE;
use crate::config::PCI_BASE;
use crate::snapshot;
use crate::Error;
use crate::Result;

/// How long the dispatcher thread waits on its idle condvar between `run_cpu()` calls once the
/// CPU has halted at its idle PC. Bounds external IRQ delivery latency well under the 10ms the
/// testable-properties scenario requires, without the thread busy-spinning.
const IDLE_WAIT_SLICE: Duration = Duration::from_millis(5);

/// An operation request a caller (the hypervisor protocol, the CLI) can issue against a running
/// VM, mirroring the teacher's `VmRequest` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmRequest {
    Start,
    Stop,
    Suspend,
    Resume,
    SetIrq(u32),
    ClearIrq(u32),
    Reset,
}

/// Owns the dispatcher thread for one virtual CPU: a `stop` flag checked between `run_cpu()`
/// calls and a condvar the idle wait sleeps on, woken early by `notify` (an external IRQ, or a
/// state change that wants the thread to re-evaluate promptly).
struct Driver {
    stop: Arc<AtomicBool>,
    wake: Arc<(Mutex<()>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl Driver {
    fn spawn(id: u32, cpu: Arc<Mutex<Box<dyn GuestCpu>>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let wake = Arc::new((Mutex::new(()), Condvar::new()));
        let thread_stop = stop.clone();
        let thread_wake = wake.clone();
        let join = thread::Builder::new()
            .name(format!("dynamips-cpu{id}"))
            .spawn(move || Self::run(cpu, thread_stop, thread_wake))
            .expect("spawning the CPU dispatcher thread");
        Driver {
            stop,
            wake,
            join: Some(join),
        }
    }

    fn run(cpu: Arc<Mutex<Box<dyn GuestCpu>>>, stop: Arc<AtomicBool>, wake: Arc<(Mutex<()>, Condvar)>) {
        loop {
            if stop.load(Ordering::Relaxed) {
                cpu.lock().unwrap().set_run_state(RunState::Stopped);
                return;
            }
            // `run_cpu` blocks until the CPU leaves `Running` (stopped, or halted at its idle
            // PC); it holds the CPU mutex for the whole call, so external mutation (set_irq,
            // suspend) only takes effect once it returns.
            cpu.lock().unwrap().run_cpu();
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let (lock, cvar) = &*wake;
            let guard = lock.lock().unwrap();
            let _ = cvar.wait_timeout(guard, IDLE_WAIT_SLICE).unwrap();
        }
    }

    fn notify(&self) {
        let (lock, cvar) = &*self.wake;
        let _guard = lock.lock().unwrap();
        cvar.notify_all();
    }

    fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.notify();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.notify();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// A complete, runnable VM: one virtual CPU, its RAM and device graph, and the periodic-task
/// thread driving its architectural free-running counter.
pub struct Vm {
    name: String,
    arch: Arch,
    cpu: Arc<Mutex<Box<dyn GuestCpu>>>,
    bus: Arc<Bus>,
    pci: Arc<PciArena>,
    ptasks: PeriodicTasks,
    tick_task: Mutex<Option<TaskId>>,
    driver: Mutex<Option<Driver>>,
}

impl Vm {
    /// Builds a VM per `config`: allocates RAM, wires the reference device models (NVRAM, PCI
    /// host bridge, and the boot ROM window if an image was supplied), constructs the
    /// architecture's CPU already pointed at the device-backed MMU, and resets it so its PC sits
    /// at the architectural reset vector ready to execute.
    pub fn new(config: VmConfig) -> Result<Self> {
        let VmConfig {
            name,
            arch,
            ram_mb,
            nvram_size,
            rom_image,
            boot_base,
            idle_pc,
            prid,
            timer_interval,
            startup_config,
            private_config,
        } = config;
        let boot_base = boot_base.unwrap_or_else(|| arch.default_boot_base());

        let bus = Arc::new(Bus::new());
        let pci = Arc::new(PciArena::new());
        pci.register(0, 0, 0, Box::new(StubPciFunction::new(0x1137, 0x0001, 0x06_00_00)));

        let mut nvram = NvramDevice::new("nvram", nvram_size);
        if startup_config.is_some() || private_config.is_some() {
            nvram.push_config(
                startup_config.as_deref().unwrap_or(&[]),
                private_config.as_deref().unwrap_or(&[]),
            );
        }
        let nvram_idx = bus.add_device(
            "nvram",
            NVRAM_BASE,
            nvram_size as u64,
            DeviceKind::Mmio,
            Box::new(nvram),
        );
        let pci_bridge = PciHostBridge::new(pci.clone());
        let pci_idx = bus.add_device("pci-host-bridge", PCI_BASE, 8, DeviceKind::Mmio, Box::new(pci_bridge));

        let shared_pool = Arc::new(jit::SharedPool::new());
        let tb_cache = Arc::new(Mutex::new(jit::TbCache::new(shared_pool)));
        let smc: Arc<dyn vm_memory::SmcNotify> = Arc::new(jit::SmcBridge(tb_cache.clone()));
        let mmio: Arc<dyn vm_memory::MmioBus> = bus.clone();
        let phys = PhysMem::new(ram_mb * 1024 * 1024).map_err(Error::Ram)?;

        let rom_len = rom_image.len() as u64;

        let cpu: Box<dyn GuestCpu> = match arch {
            Arch::Mips64 => {
                let mut mmu = vm_memory::Mips64Mmu::new(phys, mmio, smc);
                mmu.map_device(NVRAM_BASE, nvram_size as u64, nvram_idx);
                mmu.map_device(PCI_BASE, 8, pci_idx);
                if !rom_image.is_empty() {
                    let window = RamWindow::new("boot-rom", rom_image, true);
                    let rom_idx = bus.add_device("boot-rom", boot_base, rom_len, DeviceKind::Ram, Box::new(window));
                    mmu.map_device(boot_base, rom_len, rom_idx);
                }
                let mut cpu = cpu::Mips64Cpu::new(0, mmu, tb_cache, prid);
                cpu.set_idle_pc(idle_pc);
                Box::new(cpu)
            }
            Arch::Ppc32 => {
                let mut mmu = vm_memory::Ppc32Mmu::new(phys, mmio, smc);
                mmu.map_device(NVRAM_BASE, nvram_size as u64, nvram_idx);
                mmu.map_device(PCI_BASE, 8, pci_idx);
                if !rom_image.is_empty() {
                    let window = RamWindow::new("boot-rom", rom_image, true);
                    let rom_idx = bus.add_device("boot-rom", boot_base, rom_len, DeviceKind::Ram, Box::new(window));
                    mmu.map_device(boot_base, rom_len, rom_idx);
                }
                let mut cpu = cpu::Ppc32Cpu::new(0, mmu, tb_cache);
                cpu.set_idle_pc(idle_pc.map(|pc| pc as u32));
                Box::new(cpu)
            }
        };
        bus.init_all();

        let cpu = Arc::new(Mutex::new(cpu));
        cpu.lock().unwrap().reset();

        Ok(Vm {
            name,
            arch,
            cpu,
            bus,
            pci,
            ptasks: PeriodicTasks::new(timer_interval),
            tick_task: Mutex::new(None),
            driver: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn pc(&self) -> u64 {
        self.cpu.lock().unwrap().pc()
    }

    pub fn run_state(&self) -> RunState {
        self.cpu.lock().unwrap().run_state()
    }

    /// The device map, for a hypervisor protocol `show devices`-style listing.
    pub fn devices(&self) -> Vec<devices::VDevice> {
        self.bus.devices()
    }

    /// Registers an additional PCI function on this VM's host bridge, for callers wiring up
    /// further reference devices beyond the NVRAM/bridge pair created with the VM.
    pub fn register_pci_function(&self, bus: u8, device: u8, function: u8, dev: Box<dyn devices::PciConfigDevice>) -> u32 {
        self.pci.register(bus, device, function, dev)
    }

    /// Starts the dispatcher thread and the periodic tick task. Idempotent failure: calling
    /// `start` on an already-running VM is an error rather than spawning a second thread.
    pub fn start(&self) -> Result<()> {
        let mut driver_slot = self.driver.lock().unwrap();
        if driver_slot.is_some() {
            return Err(Error::AlreadyRunning(self.name.clone()));
        }
        *driver_slot = Some(Driver::spawn(0, self.cpu.clone()));
        drop(driver_slot);

        let mut tick_slot = self.tick_task.lock().unwrap();
        if tick_slot.is_none() {
            let cpu = self.cpu.clone();
            *tick_slot = Some(self.ptasks.add(move || {
                cpu.lock().unwrap().tick();
            }));
        }
        Ok(())
    }

    /// Stops the dispatcher thread and the tick task. The dispatcher thread only observes the
    /// stop request between `run_cpu()` calls (see `Driver::run`), so this returns once the CPU
    /// has reached a safe point (an idle-PC halt) and the thread has exited.
    pub fn stop(&self) -> Result<()> {
        let driver = self
            .driver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| Error::NotRunning(self.name.clone()))?;
        driver.stop();
        if let Some(id) = self.tick_task.lock().unwrap().take() {
            self.ptasks.remove(id);
        }
        Ok(())
    }

    pub fn suspend(&self) -> Result<()> {
        if self.driver.lock().unwrap().is_none() {
            return Err(Error::NotRunning(self.name.clone()));
        }
        self.cpu.lock().unwrap().set_run_state(RunState::Suspended);
        self.notify_driver();
        Ok(())
    }

    /// Requests the dispatcher resume running. The CPU's own `run_cpu()` forces its run state
    /// back to `Running` at entry, so resuming is just waking the dispatcher thread promptly
    /// rather than mutating any CPU state here.
    pub fn resume(&self) -> Result<()> {
        if self.driver.lock().unwrap().is_none() {
            return Err(Error::NotRunning(self.name.clone()));
        }
        self.notify_driver();
        Ok(())
    }

    pub fn reset(&self) -> Result<()> {
        self.cpu.lock().unwrap().reset();
        Ok(())
    }

    pub fn set_irq(&self, line: u32) {
        self.cpu.lock().unwrap().set_irq(line);
        self.notify_driver();
    }

    pub fn clear_irq(&self, line: u32) {
        self.cpu.lock().unwrap().clear_irq(line);
    }

    fn notify_driver(&self) {
        if let Some(driver) = self.driver.lock().unwrap().as_ref() {
            driver.notify();
        }
    }

    pub fn handle_request(&self, request: VmRequest) -> Result<()> {
        match request {
            VmRequest::Start => self.start(),
            VmRequest::Stop => self.stop(),
            VmRequest::Suspend => self.suspend(),
            VmRequest::Resume => self.resume(),
            VmRequest::Reset => self.reset(),
            VmRequest::SetIrq(line) => {
                self.set_irq(line);
                Ok(())
            }
            VmRequest::ClearIrq(line) => {
                self.clear_irq(line);
                Ok(())
            }
        }
    }

    /// Encodes the device graph plus the CPU's run state into a length-prefixed snapshot blob.
    pub fn save(&self) -> Vec<u8> {
        let device_snapshot = self.bus.save_all();
        let run_state = self.cpu.lock().unwrap().run_state();
        snapshot::encode(device_snapshot, run_state)
    }

    pub fn restore(&self, data: &[u8]) -> Result<()> {
        let (device_snapshot, run_state) = snapshot::decode(data)?;
        self.bus.restore_all(&device_snapshot);
        self.cpu.lock().unwrap().set_run_state(run_state);
        Ok(())
    }

    /// Derives an on-disk snapshot path from this VM's name, the file-naming convention the
    /// hypervisor protocol's save/restore commands rely on.
    pub fn snapshot_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.vm_state", self.name))
    }

    pub fn save_to_file(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = self.snapshot_path(dir);
        std::fs::write(&path, self.save())?;
        Ok(path)
    }

    pub fn restore_from_file(&self, dir: &Path) -> Result<()> {
        let path = self.snapshot_path(dir);
        let data = std::fs::read(&path).map_err(|e| Error::Snapshot(e.to_string()))?;
        self.restore(&data)
    }
}

impl IrqRouter for Vm {
    fn raise_irq(&self, line: u32) {
        self.set_irq(line);
    }

    fn lower_irq(&self, line: u32) {
        self.clear_irq(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mips_config(name: &str) -> VmConfig {
        let mut cfg = VmConfig::new(name, Arch::Mips64);
        cfg.ram_mb = 1;
        cfg
    }

    #[test]
    fn new_vm_resets_pc_to_the_architectural_boot_vector() {
        let vm = Vm::new(mips_config("r1")).unwrap();
        assert_eq!(vm.pc(), vm_memory::mips64::ROM_PC);
        assert_eq!(vm.run_state(), RunState::Stopped);
    }

    #[test]
    fn ppc32_vm_resets_pc_to_its_reset_vector() {
        let mut cfg = VmConfig::new("r2", Arch::Ppc32);
        cfg.ram_mb = 1;
        let vm = Vm::new(cfg).unwrap();
        assert_eq!(vm.pc(), 0xfff0_0100);
    }

    #[test]
    fn start_twice_fails_without_stopping_first() {
        let vm = Vm::new(mips_config("r3")).unwrap();
        vm.start().unwrap();
        assert!(matches!(vm.start(), Err(Error::AlreadyRunning(_))));
        vm.stop().unwrap();
    }

    #[test]
    fn stop_without_start_fails() {
        let vm = Vm::new(mips_config("r4")).unwrap();
        assert!(matches!(vm.stop(), Err(Error::NotRunning(_))));
    }

    #[test]
    fn boot_to_idle_pc_halts_and_count_keeps_advancing() {
        let mut cfg = mips_config("r5");
        cfg.idle_pc = Some(vm_memory::mips64::ROM_PC);
        let vm = Vm::new(cfg).unwrap();
        vm.start().unwrap();

        // The CPU's very first instruction fetch is already at the idle PC, so it halts
        // immediately without ever executing a fetched instruction.
        for _ in 0..100 {
            if vm.run_state() == RunState::Halted {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(vm.run_state(), RunState::Halted);

        thread::sleep(Duration::from_millis(60));
        vm.stop().unwrap();
    }

    #[test]
    fn set_irq_wakes_a_halted_cpu_within_the_idle_slice() {
        let mut cfg = mips_config("r6");
        cfg.idle_pc = Some(vm_memory::mips64::ROM_PC);
        let vm = Vm::new(cfg).unwrap();
        vm.start().unwrap();
        for _ in 0..100 {
            if vm.run_state() == RunState::Halted {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(vm.run_state(), RunState::Halted);

        let start = std::time::Instant::now();
        vm.set_irq(0);
        for _ in 0..50 {
            if vm.run_state() != RunState::Halted {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert!(start.elapsed() < Duration::from_millis(10));
        vm.stop().unwrap();
    }

    #[test]
    fn save_restore_round_trips_nvram_contents() {
        let vm = Vm::new(mips_config("r7")).unwrap();
        vm.bus.devices(); // sanity: device map is non-empty below
        assert!(!vm.devices().is_empty());

        let saved = vm.save();
        let vm2 = Vm::new(mips_config("r7")).unwrap();
        vm2.restore(&saved).unwrap();
        assert_eq!(vm2.save(), saved);
    }
}
