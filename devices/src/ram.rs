// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A plain byte-addressable window, used for reference ROM/IOS image regions that a VM wants
//! dispatched through the device map rather than folded into the flat `vm_memory::PhysMem`
//! (e.g. a ROM blob mapped at a fixed address distinct from RAM). Reads past the end of the
//! backing buffer return zero rather than faulting, the same "unmapped reads as zero" leniency
//! the reference implementation's ROM emulation gives a short image.

use crate::bus::BusDevice;

pub struct RamWindow {
    name: String,
    data: Vec<u8>,
    read_only: bool,
}

impl RamWindow {
    pub fn new(name: &str, data: Vec<u8>, read_only: bool) -> Self {
        RamWindow {
            name: name.to_string(),
            data,
            read_only,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl BusDevice for RamWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, offset: u64, size: u8) -> u64 {
        let start = offset as usize;
        let mut buf = [0u8; 8];
        for i in 0..size as usize {
            buf[i] = self.data.get(start + i).copied().unwrap_or(0);
        }
        u64::from_be_bytes(buf) >> ((8 - size as usize) * 8)
    }

    fn write(&mut self, offset: u64, size: u8, value: u64) {
        if self.read_only {
            return;
        }
        let start = offset as usize;
        if start + size as usize > self.data.len() {
            self.data.resize(start + size as usize, 0);
        }
        let bytes = value.to_be_bytes();
        self.data[start..start + size as usize]
            .copy_from_slice(&bytes[8 - size as usize..]);
    }

    fn save(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn restore(&mut self, data: &[u8]) {
        if !self.read_only {
            self.data = data.to_vec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_round_trips_big_endian() {
        let mut win = RamWindow::new("rom", vec![0; 16], false);
        win.write(4, 4, 0xdead_beef);
        assert_eq!(win.read(4, 4), 0xdead_beef);
    }

    #[test]
    fn read_only_window_ignores_writes() {
        let mut win = RamWindow::new("rom", vec![0xAA; 4], true);
        win.write(0, 1, 0x55);
        assert_eq!(win.read(0, 1), 0xAA);
    }

    #[test]
    fn reads_past_end_are_zero() {
        let mut win = RamWindow::new("rom", vec![1, 2], false);
        assert_eq!(win.read(8, 4), 0);
    }
}
