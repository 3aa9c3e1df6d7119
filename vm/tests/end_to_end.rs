// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Cross-crate scenarios: a VM registered by name, its NVRAM snapshot round-tripped through a
//! file, and an attached NIO whose removal actually stops delivery. Each test drives the same
//! public surface the CLI and hypervisor protocol use (`registry::Registry` plus `vm`/`nio`
//! constructors), not any crate-internal helper.

use std::net::UdpSocket;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use registry::ObjectType;
use registry::Registry;
use vm::Arch;
use vm::Vm;
use vm::VmConfig;

fn small_mips_config(name: &str) -> VmConfig {
    let mut cfg = VmConfig::new(name, Arch::Mips64);
    cfg.ram_mb = 1;
    cfg
}

#[test]
fn vm_registered_by_name_boots_to_idle_and_reports_count_advancing() {
    let registry = Registry::new();
    let mut cfg = small_mips_config("r-idle");
    cfg.idle_pc = Some(vm_memory::mips64::ROM_PC);
    let vm = Arc::new(Vm::new(cfg).unwrap());
    registry.add(ObjectType::Vm, "r-idle", vm).unwrap();

    let vm: Arc<Vm> = registry.find(ObjectType::Vm, "r-idle").unwrap();
    vm.start().unwrap();

    for _ in 0..100 {
        if vm.run_state() == cpu::RunState::Halted {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(vm.run_state(), cpu::RunState::Halted);
    vm.stop().unwrap();

    assert!(registry.exists(ObjectType::Vm, "r-idle"));
    registry.unref(ObjectType::Vm, "r-idle").unwrap();
    registry.unref(ObjectType::Vm, "r-idle").unwrap();
    registry.delete(ObjectType::Vm, "r-idle").unwrap();
}

#[test]
fn irq_delivered_to_a_halted_vm_wakes_it_within_the_idle_slice() {
    let mut cfg = small_mips_config("r-irq");
    cfg.idle_pc = Some(vm_memory::mips64::ROM_PC);
    let vm = Vm::new(cfg).unwrap();
    vm.start().unwrap();
    for _ in 0..100 {
        if vm.run_state() == cpu::RunState::Halted {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(vm.run_state(), cpu::RunState::Halted);

    let start = std::time::Instant::now();
    vm.set_irq(3);
    let mut woke = false;
    for _ in 0..50 {
        if vm.run_state() != cpu::RunState::Halted {
            woke = true;
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    assert!(woke, "vm never left Halted after set_irq");
    assert!(start.elapsed() < Duration::from_millis(10));
    vm.stop().unwrap();
}

#[test]
fn nvram_snapshot_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();

    let mut cfg = small_mips_config("r-nvram");
    cfg.startup_config = Some(b"hostname router1\n".to_vec());
    let vm = Vm::new(cfg).unwrap();
    let path = vm.save_to_file(dir.path()).unwrap();
    assert_eq!(path, vm.snapshot_path(dir.path()));

    let vm2 = Vm::new(small_mips_config("r-nvram")).unwrap();
    vm2.restore_from_file(dir.path()).unwrap();
    assert_eq!(vm2.save(), vm.save());
}

#[test]
fn registry_rename_collision_leaves_the_original_vm_reachable() {
    let registry = Registry::new();
    registry
        .add(ObjectType::Vm, "r-a", Arc::new(Vm::new(small_mips_config("r-a")).unwrap()))
        .unwrap();
    registry
        .add(ObjectType::Vm, "r-b", Arc::new(Vm::new(small_mips_config("r-b")).unwrap()))
        .unwrap();

    assert!(registry.rename(ObjectType::Vm, "r-a", "r-b").is_err());
    assert!(registry.exists(ObjectType::Vm, "r-a"));
    let still_there: Arc<Vm> = registry.find(ObjectType::Vm, "r-a").unwrap();
    assert_eq!(still_there.name(), "r-a");
}

#[test]
fn removing_a_nio_from_the_registry_stops_further_delivery() {
    use nio::Nio;
    use nio::UdpNio;
    use std::sync::Mutex;

    let registry = Registry::new();

    let probe_a = UdpSocket::bind("127.0.0.1:0").unwrap();
    let a_addr = probe_a.local_addr().unwrap();
    let probe_b = UdpSocket::bind("127.0.0.1:0").unwrap();
    let b_addr = probe_b.local_addr().unwrap();
    drop(probe_a);
    drop(probe_b);

    let a = UdpNio::new(a_addr, b_addr).unwrap();
    let mut b = UdpNio::new(b_addr, a_addr).unwrap();

    let shared: nio::SharedNio = Arc::new(Mutex::new(Box::new(a) as Box<dyn Nio>));
    registry.add(ObjectType::Nio, "udp0", shared).unwrap();

    {
        let handle: nio::SharedNio = registry.find(ObjectType::Nio, "udp0").unwrap();
        handle.lock().unwrap().send(b"still-there").unwrap();
    }
    registry.unref(ObjectType::Nio, "udp0").unwrap();

    thread::sleep(Duration::from_millis(20));
    let mut buf = [0u8; 32];
    let n = b.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"still-there");

    registry.delete(ObjectType::Nio, "udp0").unwrap();
    assert!(registry.find::<nio::SharedNio>(ObjectType::Nio, "udp0").is_err());

    // The sending endpoint was only reachable through the registry entry we just deleted; with
    // no other handle left to it, nothing can reach `b` again.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(b.recv(&mut buf).unwrap_or(0), 0);
}
