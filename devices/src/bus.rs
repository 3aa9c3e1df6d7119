// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The vdevice table: a sorted list of address-mapped devices plus the arena that backs
//! `vm_memory::MmioBus` dispatch. Kept as an index-based arena (per the cyclic-graph guidance in
//! the design's §9, generalized here from PCI to the whole device map) rather than a table of
//! trait-object pointers devices reference each other by.

use std::sync::Mutex;

use vm_memory::MmioBus;

/// Distinguishes a RAM-like window (whose fast path is the owning `vm`'s flat `PhysMem`, never
/// this bus) from a true MMIO device that must be called back on every access, per §3's device
/// map data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Ram,
    Mmio,
}

/// One entry in the sorted device map. `dev_idx` is the index this device holds in the owning
/// `Bus`'s arena, the same index `vm_memory::MmioBus::mmio_read`/`mmio_write` are dispatched
/// with.
#[derive(Debug, Clone)]
pub struct VDevice {
    pub name: String,
    pub base: u64,
    pub length: u64,
    pub kind: DeviceKind,
    pub dev_idx: u32,
}

/// The callback surface every bus-attached device implements: `init`/`reset`/`free` bracket the
/// device's lifecycle inside a VM, `read`/`write` serve one access each.
pub trait BusDevice: Send {
    fn name(&self) -> &str;

    fn init(&mut self) {}

    fn read(&mut self, offset: u64, size: u8) -> u64;

    fn write(&mut self, offset: u64, size: u8, value: u64);

    fn reset(&mut self) {}

    /// Dumps this device's persisted state for `vm`'s save/restore walk (§4.H). Most devices are
    /// pure MMIO with nothing worth persisting; only backing-store devices (NVRAM, RAM/ROM
    /// windows) override this.
    fn save(&self) -> Vec<u8> {
        Vec::new()
    }

    fn restore(&mut self, _data: &[u8]) {}
}

/// The VM-wide device map: a sorted `Vec<VDevice>` for address lookup and an arena of live
/// `BusDevice`s dispatched by index. Implements `vm_memory::MmioBus` directly so a `vm` only has
/// to hand `vm_memory`'s MMU constructors an `Arc<Bus>`.
pub struct Bus {
    devices: Mutex<Vec<Box<dyn BusDevice>>>,
    map: Mutex<Vec<VDevice>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            devices: Mutex::new(Vec::new()),
            map: Mutex::new(Vec::new()),
        }
    }

    /// Registers `device` at `[base, base + length)`, returning the `dev_idx` to pass to
    /// `vm_memory`'s `MtsCore::map_device` for this range. The map stays sorted by `base` so a
    /// future address-ordered lookup (e.g. a CLI `show devices`) doesn't need to re-sort.
    pub fn add_device(
        &self,
        name: &str,
        base: u64,
        length: u64,
        kind: DeviceKind,
        device: Box<dyn BusDevice>,
    ) -> u32 {
        let mut devices = self.devices.lock().unwrap();
        let dev_idx = devices.len() as u32;
        devices.push(device);
        drop(devices);

        let mut map = self.map.lock().unwrap();
        let entry = VDevice {
            name: name.to_string(),
            base,
            length,
            kind,
            dev_idx,
        };
        let pos = map.partition_point(|d| d.base < base);
        map.insert(pos, entry);
        dev_idx
    }

    pub fn devices(&self) -> Vec<VDevice> {
        self.map.lock().unwrap().clone()
    }

    pub fn find_by_addr(&self, pa: u64) -> Option<VDevice> {
        self.map
            .lock()
            .unwrap()
            .iter()
            .find(|d| pa >= d.base && pa < d.base + d.length)
            .cloned()
    }

    pub fn init_all(&self) {
        let mut devices = self.devices.lock().unwrap();
        for device in devices.iter_mut() {
            device.init();
        }
    }

    pub fn reset_all(&self) {
        let mut devices = self.devices.lock().unwrap();
        for device in devices.iter_mut() {
            device.reset();
        }
    }

    /// Walks the device graph in `dev_idx` order, collecting each device's `save()` blob keyed by
    /// name, for `vm`'s save/restore lifecycle.
    pub fn save_all(&self) -> Vec<(String, Vec<u8>)> {
        let devices = self.devices.lock().unwrap();
        let map = self.map.lock().unwrap();
        map.iter()
            .map(|d| (d.name.clone(), devices[d.dev_idx as usize].save()))
            .collect()
    }

    /// Restores every device named in `snapshot` that is still present in this bus's device map.
    pub fn restore_all(&self, snapshot: &[(String, Vec<u8>)]) {
        let mut devices = self.devices.lock().unwrap();
        let map = self.map.lock().unwrap();
        for (name, data) in snapshot {
            if let Some(d) = map.iter().find(|d| &d.name == name) {
                devices[d.dev_idx as usize].restore(data);
            }
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl MmioBus for Bus {
    fn mmio_read(&self, dev_idx: u32, offset: u64, size: u8) -> u64 {
        let mut devices = self.devices.lock().unwrap();
        match devices.get_mut(dev_idx as usize) {
            Some(device) => device.read(offset, size),
            None => 0,
        }
    }

    fn mmio_write(&self, dev_idx: u32, offset: u64, size: u8, value: u64) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.get_mut(dev_idx as usize) {
            device.write(offset, size, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u64);
    impl BusDevice for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn read(&mut self, _offset: u64, _size: u8) -> u64 {
            self.0
        }
        fn write(&mut self, _offset: u64, _size: u8, value: u64) {
            self.0 = value;
        }
    }

    #[test]
    fn dispatches_by_dev_idx() {
        let bus = Bus::new();
        let idx = bus.add_device("ctr", 0x1000, 4, DeviceKind::Mmio, Box::new(Counter(0)));
        bus.mmio_write(idx, 0, 4, 42);
        assert_eq!(bus.mmio_read(idx, 0, 4), 42);
    }

    #[test]
    fn map_stays_sorted_by_base() {
        let bus = Bus::new();
        bus.add_device("b", 0x2000, 4, DeviceKind::Mmio, Box::new(Counter(0)));
        bus.add_device("a", 0x1000, 4, DeviceKind::Mmio, Box::new(Counter(0)));
        let map = bus.devices();
        assert_eq!(map[0].name, "a");
        assert_eq!(map[1].name, "b");
    }

    #[test]
    fn find_by_addr_matches_containing_window() {
        let bus = Bus::new();
        bus.add_device("w", 0x1000, 0x100, DeviceKind::Mmio, Box::new(Counter(0)));
        assert!(bus.find_by_addr(0x1050).is_some());
        assert!(bus.find_by_addr(0x2000).is_none());
    }
}
