// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::time::Duration;

use vm_memory::mips64::PRID_R7000;

/// The CPU core a VM is built around. A VM owns exactly one virtual CPU (§1's Non-goals exclude
/// SMP guests), so this also selects the one and only dispatcher thread's architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Mips64,
    Ppc32,
}

impl Arch {
    /// The physical address the architecture's CPU core resets to, and therefore where a boot
    /// ROM image must be windowed unless `VmConfig::boot_base` overrides it. MIPS64 fetches
    /// through the unmapped KSEG1 window, so `ROM_PC - KSEG1_BASE` is the effective physical
    /// base; PPC32 resets with translation disabled, so its reset PC is already physical.
    pub fn default_boot_base(self) -> u64 {
        match self {
            Arch::Mips64 => 0x1fc0_0000,
            Arch::Ppc32 => 0xfff0_0100,
        }
    }
}

/// Physical base of the NVRAM device window, carved out of every VM's address space regardless
/// of architecture (outside both architectures' default RAM and boot-ROM windows).
pub const NVRAM_BASE: u64 = 0x1e00_0000;
/// Physical base of the two-register PCI host bridge (CONFIG_ADDRESS/CONFIG_DATA).
pub const PCI_BASE: u64 = 0x1c00_0000;

/// Everything needed to build a `Vm`: RAM size, boot image, device windows, and the handful of
/// CLI-exposed toggles from the hypervisor surface (`--idle-pc`, `--timer-itv`, NVRAM config
/// pushes).
#[derive(Debug, Clone)]
pub struct VmConfig {
    pub name: String,
    pub arch: Arch,
    /// Guest RAM size in megabytes, identity-mapped starting at physical address 0.
    pub ram_mb: u64,
    /// NVRAM image size in bytes.
    pub nvram_size: usize,
    /// Raw boot image bytes, windowed read-only at `boot_base` (or the architecture default).
    pub rom_image: Vec<u8>,
    pub boot_base: Option<u64>,
    /// Halts the CPU's dispatcher thread on a condvar whenever PC equals this value, the
    /// `--idle-pc` CLI toggle.
    pub idle_pc: Option<u64>,
    /// MIPS64 `PRId` value; ignored for `Arch::Ppc32`.
    pub prid: u32,
    /// Tick interval driving the architectural free-running counter (CP0 `Count` / PPC
    /// TB+decrementer), the `--timer-itv` CLI toggle.
    pub timer_interval: Duration,
    /// NVRAM startup-config blob pushed at boot (`--startup-config`).
    pub startup_config: Option<Vec<u8>>,
    /// NVRAM private-config blob pushed at boot (`--private-config`).
    pub private_config: Option<Vec<u8>>,
}

impl VmConfig {
    pub fn new(name: impl Into<String>, arch: Arch) -> Self {
        VmConfig {
            name: name.into(),
            arch,
            ram_mb: 64,
            nvram_size: 4096,
            rom_image: Vec::new(),
            boot_base: None,
            idle_pc: None,
            prid: PRID_R7000,
            timer_interval: Duration::from_millis(10),
            startup_config: None,
            private_config: None,
        }
    }

    pub fn boot_base(&self) -> u64 {
        self.boot_base.unwrap_or_else(|| self.arch.default_boot_base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_boot_base_matches_each_architecture_reset_vector() {
        assert_eq!(Arch::Mips64.default_boot_base(), 0x1fc0_0000);
        assert_eq!(Arch::Ppc32.default_boot_base(), 0xfff0_0100);
    }

    #[test]
    fn explicit_boot_base_overrides_the_architecture_default() {
        let mut cfg = VmConfig::new("r1", Arch::Mips64);
        cfg.boot_base = Some(0x1000_0000);
        assert_eq!(cfg.boot_base(), 0x1000_0000);
    }
}
