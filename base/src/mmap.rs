// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

use libc::c_void;
use libc::MAP_ANONYMOUS;
use libc::MAP_FAILED;
use libc::MAP_PRIVATE;
use libc::MAP_SHARED;
use libc::PROT_EXEC;
use libc::PROT_READ;
use libc::PROT_WRITE;

use crate::error::errno_result;
use crate::Error;
use crate::Result;

/// A host memory mapping, used both for anonymous JIT code buffers and for file-backed guest RAM
/// (including the "ghost image" ROM-sharing path where several VMs map the same read-only file).
pub struct MemoryMapping {
    addr: *mut u8,
    size: usize,
}

// Safe because the mapping is only ever handed out through `&`/`&mut` borrows that respect Rust's
// aliasing rules, same as the teacher's `MemoryMapping`.
unsafe impl Send for MemoryMapping {}
unsafe impl Sync for MemoryMapping {}

impl MemoryMapping {
    /// Anonymous `PROT_READ | PROT_WRITE | PROT_EXEC` region, used for JIT translation cache
    /// chunks.
    pub fn new_anon_exec(size: usize) -> Result<Self> {
        Self::mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE | PROT_EXEC,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    }

    /// Anonymous read/write region (plain guest RAM).
    pub fn new_anon(size: usize) -> Result<Self> {
        Self::mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        )
    }

    /// Read-only mapping of an existing file (e.g. a ROM image shared verbatim between VMs).
    pub fn from_file_ro(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(Error::Sys)?;
        let size = file.metadata().map_err(Error::Sys)?.len() as usize;
        Self::mmap(ptr::null_mut(), size, PROT_READ, MAP_PRIVATE, file.as_raw_fd(), 0)
    }

    /// Copy-on-write mapping of an existing file: guest writes are private to this mapping and
    /// never reach the backing file, while unmodified pages are shared with the host page cache.
    pub fn from_file_cow(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(Error::Sys)?;
        let size = file.metadata().map_err(Error::Sys)?.len() as usize;
        Self::mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE,
            file.as_raw_fd(),
            0,
        )
    }

    /// Creates a new file of `size` bytes at `path` and maps it read/write, shared with the
    /// backing file (used for NVRAM/flash images that must persist across VM restarts).
    pub fn create_and_map(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(Error::Sys)?;
        file.set_len(size as u64).map_err(Error::Sys)?;
        Self::mmap(
            ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    }

    fn mmap(
        addr_hint: *mut c_void,
        size: usize,
        prot: i32,
        flags: i32,
        fd: i32,
        offset: i64,
    ) -> Result<Self> {
        if size == 0 {
            return Err(Error::Overflow);
        }
        // Safe because we check the returned pointer below and never construct a slice longer
        // than `size`, which is the length mmap was asked to map.
        let addr = unsafe { libc::mmap(addr_hint, size, prot, flags, fd, offset as libc::off_t) };
        if addr == MAP_FAILED {
            return errno_result();
        }
        Ok(MemoryMapping {
            addr: addr as *mut u8,
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.addr
    }

    pub fn as_slice(&self) -> &[u8] {
        // Safe because `addr`/`size` describe exactly the region mmap returned.
        unsafe { std::slice::from_raw_parts(self.addr, self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safe because `self` is borrowed mutably, so no other reference to this region exists.
        unsafe { std::slice::from_raw_parts_mut(self.addr, self.size) }
    }

    /// Flips the executable bit off/on. Used by SMC handling to `mprotect` a translation cache
    /// chunk back to `RW` only while the emitter is writing it, then back to `RX`.
    pub fn set_executable(&self, executable: bool) -> Result<()> {
        let prot = if executable {
            PROT_READ | PROT_EXEC
        } else {
            PROT_READ | PROT_WRITE
        };
        // Safe because `addr`/`size` are the exact region this mapping owns.
        let ret = unsafe { libc::mprotect(self.addr as *mut c_void, self.size, prot) };
        if ret != 0 {
            return errno_result();
        }
        Ok(())
    }
}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // Safe because `addr`/`size` are exactly what was passed to `mmap` above.
        unsafe {
            libc::munmap(self.addr as *mut c_void, self.size);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_round_trip() {
        let mut m = MemoryMapping::new_anon(4096).unwrap();
        m.as_mut_slice()[0] = 0x42;
        assert_eq!(m.as_slice()[0], 0x42);
    }

    #[test]
    fn create_and_map_persists_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvram.bin");
        let m = MemoryMapping::create_and_map(&path, 8192).unwrap();
        assert_eq!(m.size(), 8192);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[test]
    fn anon_exec_is_executable_region() {
        let m = MemoryMapping::new_anon_exec(4096).unwrap();
        assert_eq!(m.size(), 4096);
    }
}
