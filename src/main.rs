// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `dynamips` binary: parses the standalone CLI, boots one VM from it, and serves the
//! hypervisor line protocol on a TCP listener for everything else (additional VMs, NIOs,
//! bridges) for the remainder of the process's life.

mod protocol;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use registry::Registry;

/// MIPS64/PPC32 router emulator.
#[derive(FromArgs)]
struct Args {
    /// raw boot image to load (ROM monitor or IOS-style image)
    #[argh(positional)]
    image: Option<PathBuf>,

    /// router platform: `mips64` or `ppc32`
    #[argh(option, default = "\"mips64\".to_string()")]
    platform: String,

    /// size of PCMCIA disk0 in MB
    #[argh(option, default = "0")]
    disk0_size: u64,

    /// size of PCMCIA disk1 in MB
    #[argh(option, default = "0")]
    disk1_size: u64,

    /// executable-JIT area size in MB
    #[argh(option, default = "64")]
    exec_area: u64,

    /// halt the CPU while PC equals this address
    #[argh(option)]
    idle_pc: Option<u64>,

    /// timer-wheel tick interval in milliseconds
    #[argh(option, default = "10")]
    timer_itv: u64,

    /// enable verbose debug logging
    #[argh(switch)]
    vm_debug: bool,

    /// allocate guest RAM lazily instead of up front (accepted, backing allocator is always
    /// lazy-committed anonymous memory)
    #[argh(switch)]
    sparse_mem: bool,

    /// disable the hypervisor control TCP listener
    #[argh(switch)]
    noctrl: bool,

    /// suppress the console's startup banner line
    #[argh(switch)]
    notelmsg: bool,

    /// write the process id to this file on startup
    #[argh(option)]
    filepid: Option<PathBuf>,

    /// IOMEM area size in MB
    #[argh(option, default = "1")]
    iomem_size: u64,

    /// guest RAM size in MB
    #[argh(option, default = "64")]
    ram_size: u64,

    /// push this file into NVRAM as the startup-config blob on boot
    #[argh(option)]
    startup_config: Option<PathBuf>,

    /// push this file into NVRAM as the private-config blob on boot
    #[argh(option)]
    private_config: Option<PathBuf>,

    /// bind address for the hypervisor control TCP listener
    #[argh(option, default = "\"127.0.0.1:7200\".to_string()")]
    console_binding_addr: String,
}

/// Usage/configuration error: bad flag, unknown platform, missing image.
const EXIT_USAGE: u8 = 1;
/// The VM failed to come up (RAM allocation, boot image didn't fit its window).
const EXIT_BOOT_FAILURE: u8 = 2;
/// The VM died after a successful boot (double fault, fatal bus error).
const EXIT_RUNTIME_FATAL: u8 = 3;

fn main() -> ExitCode {
    base::init();
    let args: Args = argh::from_env();
    run(args)
}

fn run(args: Args) -> ExitCode {
    if let Some(path) = &args.filepid {
        if let Err(e) = std::fs::write(path, std::process::id().to_string()) {
            log::error!("FATAL: failed to write pid file {}: {e}", path.display());
            return ExitCode::from(EXIT_USAGE);
        }
    }
    if args.vm_debug {
        base::init_with(base::LogConfig {
            default_filter: log::LevelFilter::Debug,
            log_file: None,
        })
        .ok();
    }

    let arch = match args.platform.as_str() {
        "mips64" => vm::Arch::Mips64,
        "ppc32" => vm::Arch::Ppc32,
        other => {
            log::error!("unknown --platform '{other}', expected mips64 or ppc32");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let mut config = vm::VmConfig::new("vm0", arch);
    config.ram_mb = args.ram_size;
    config.idle_pc = args.idle_pc;
    config.timer_interval = Duration::from_millis(args.timer_itv);
    if args.sparse_mem {
        log::debug!("--sparse-mem accepted; backing allocator is already lazily committed");
    }
    if args.disk0_size != 0 || args.disk1_size != 0 {
        log::debug!(
            "--disk0-size/--disk1-size accepted; PCMCIA disk models are outside this build's device set"
        );
    }
    if args.exec_area != 64 {
        log::debug!("--exec-area accepted; the JIT arena grows on demand and ignores this size hint");
    }
    if args.iomem_size != 1 {
        log::debug!("--iomem-size accepted; IOMEM is not a modeled device window on this build");
    }

    if let Some(image) = &args.image {
        match vm::load_image(image) {
            Ok(bytes) => config.rom_image = bytes,
            Err(e) => {
                log::error!("FATAL: failed to read boot image {}: {e}", image.display());
                return ExitCode::from(EXIT_BOOT_FAILURE);
            }
        }
    }
    match vm::load_config(args.startup_config.as_deref()) {
        Ok(bytes) if !bytes.is_empty() => config.startup_config = Some(bytes),
        Ok(_) => {}
        Err(e) => {
            log::error!("FATAL: failed to read --startup-config: {e}");
            return ExitCode::from(EXIT_BOOT_FAILURE);
        }
    }
    match vm::load_config(args.private_config.as_deref()) {
        Ok(bytes) if !bytes.is_empty() => config.private_config = Some(bytes),
        Ok(_) => {}
        Err(e) => {
            log::error!("FATAL: failed to read --private-config: {e}");
            return ExitCode::from(EXIT_BOOT_FAILURE);
        }
    }

    let registry = Registry::new();
    let vm = match vm::Vm::new(config) {
        Ok(vm) => Arc::new(vm),
        Err(e) => {
            log::error!("FATAL: {e}");
            return ExitCode::from(EXIT_BOOT_FAILURE);
        }
    };
    if let Err(e) = registry.add(registry::ObjectType::Vm, "vm0", vm.clone()) {
        log::error!("FATAL: {e}");
        return ExitCode::from(EXIT_BOOT_FAILURE);
    }
    if let Err(e) = vm.start() {
        log::error!("FATAL: {e}");
        return ExitCode::from(EXIT_BOOT_FAILURE);
    }
    log::info!("vm0 booted at pc {:#x}", vm.pc());

    if args.noctrl {
        log::info!("--noctrl set; hypervisor control listener disabled, running until killed");
        loop {
            std::thread::sleep(Duration::from_secs(3600));
        }
    }

    let addr: SocketAddr = match args.console_binding_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            log::error!("FATAL: bad --console-binding-addr: {e}");
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if !args.notelmsg {
        log::info!("dynamips hypervisor listening on {addr}");
    }
    match protocol::serve(addr, registry) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("FATAL: hypervisor listener: {e}");
            ExitCode::from(EXIT_RUNTIME_FATAL)
        }
    }
}
