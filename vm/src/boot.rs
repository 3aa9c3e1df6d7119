// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bulk byte producers for guest memory: a raw boot-image loader and file readers for the NVRAM
//! startup/private config blobs the CLI can push at boot time (`--startup-config`,
//! `--private-config`). ELF and FAT/MBR parsing are out of scope (§1); a raw image is whatever
//! bytes a ROM monitor or IOS image file already is on disk.

use std::fs;
use std::io;
use std::path::Path;

/// Reads a raw boot image from disk, to be windowed into the VM's address space unmodified at
/// `VmConfig::boot_base`.
pub fn load_image(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Reads a config file to push into NVRAM at boot, treating a missing path as an empty blob
/// rather than an error (both `--startup-config` and `--private-config` are optional).
pub fn load_config(path: Option<&Path>) -> io::Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_image_reads_exact_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin");
        fs::write(&path, [0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(load_image(&path).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn load_config_defaults_to_empty_when_absent() {
        assert_eq!(load_config(None).unwrap(), Vec::<u8>::new());
    }
}
