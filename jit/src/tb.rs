// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-CPU translation block cache: the `virt_hash`/`phys_hash` lookup tables, an index-based
//! arena of live `Tb`s (the idiomatic replacement for the reference implementation's intrusive
//! doubly linked list, per the arena guidance in the design's §9), and the build path that either
//! adopts a shared `Tc` or compiles a fresh one.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use fnv::FnvHasher;

use crate::chunk::JitChunk;
use crate::chunk::CHUNK_BYTES;
use crate::chunk::MIN_FREE;
use crate::tsg::SharedPool;
use crate::tsg::Tc;
use crate::tsg::TcKey;

/// Guest instructions per page the checksum/emission loop walks; 4 KiB pages of 4-byte MIPS/PPC
/// instructions.
pub const MIN_PAGE: usize = 4096;

type FnvMap<K, V> = HashMap<K, V, BuildHasherDefault<FnvHasher>>;

/// Endianness/width/privilege bits that make a translation valid only for the CPU state it was
/// built under; two pages with identical bytes but different `ExecState` never share a `Tc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecState {
    pub big_endian: bool,
    pub addr64: bool,
    pub kernel_mode: bool,
}

/// A stable handle into a `TbCache`'s arena. Indices are reused via the free list once a `Tb` is
/// fully torn down, same lifetime discipline as a `slab` allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TbHandle(pub u32);

pub struct Tb {
    pub vaddr_page: u64,
    pub phys_page: u64,
    pub exec_state: ExecState,
    pub checksum: u64,
    pub tc: Arc<Tc>,
    pub smc: bool,
}

/// What an emitted block hands back to the dispatcher at its exit point (§9 "Exception control
/// flow in the dispatcher"): no host-level nonlocal jump crosses the emitted-code boundary except
/// the one a native back-end emits and immediately resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Fallthrough,
    Exception,
    NextTb(TbHandle),
    Exit,
}

pub struct TbCache {
    virt_hash: FnvMap<u64, TbHandle>,
    phys_hash: FnvMap<u64, Vec<TbHandle>>,
    arena: Vec<Option<Tb>>,
    free_list: Vec<TbHandle>,
    chunks: Vec<JitChunk>,
    shared_pool: Arc<SharedPool>,
    /// Total bytes reserved across all owned chunks since the last `flush`; compared against a
    /// caller-supplied high-water mark to decide when to garbage-collect (§3 lifecycle: "TBs are
    /// ... garbage-collected when the cache crosses a high-water mark").
    bytes_reserved: usize,
}

impl TbCache {
    pub fn new(shared_pool: Arc<SharedPool>) -> Self {
        TbCache {
            virt_hash: FnvMap::default(),
            phys_hash: FnvMap::default(),
            arena: Vec::new(),
            free_list: Vec::new(),
            chunks: Vec::new(),
            shared_pool,
            bytes_reserved: 0,
        }
    }

    pub fn bytes_reserved(&self) -> usize {
        self.bytes_reserved
    }

    pub fn lookup_virt(&self, vaddr_page: u64) -> Option<TbHandle> {
        self.virt_hash.get(&vaddr_page).copied()
    }

    pub fn tb(&self, handle: TbHandle) -> Option<&Tb> {
        self.arena.get(handle.0 as usize).and_then(|slot| slot.as_ref())
    }

    fn active_chunk_with_room(&mut self, len: usize) -> base::Result<usize> {
        if let Some(last) = self.chunks.last() {
            if last.remaining() >= len.max(MIN_FREE) {
                return Ok(self.chunks.len() - 1);
            }
        }
        let size = CHUNK_BYTES.max(len);
        self.chunks.push(JitChunk::with_size(size)?);
        Ok(self.chunks.len() - 1)
    }

    /// Builds (or adopts) the translation for `vaddr_page`. `page_bytes` is the snapshotted
    /// instruction stream used for the FNV-1a checksum and (on a fresh build) for the stub
    /// reservation standing in for real native code; `emit_len` is how many bytes of "native
    /// code" this back-end wants reserved for the page (zero is valid for an interpreter-only
    /// back-end, matching NOJIT).
    pub fn get_or_build(
        &mut self,
        vaddr_page: u64,
        phys_page: u64,
        exec_state: ExecState,
        page_bytes: &[u8],
        emit_len: usize,
    ) -> base::Result<TbHandle> {
        if let Some(handle) = self.lookup_virt(vaddr_page) {
            return Ok(handle);
        }

        let checksum = fnv1a(page_bytes);
        let key = TcKey {
            checksum,
            exec_state,
            size: page_bytes.len(),
        };

        let tc = match self.shared_pool.find(&key) {
            Some(tc) => tc,
            None => {
                let chunk_idx = self.active_chunk_with_room(emit_len.max(1))?;
                let (offset, _) = self.chunks[chunk_idx]
                    .reserve(emit_len.max(1))
                    .expect("chunk sized to fit the requested reservation");
                self.bytes_reserved += emit_len.max(1);
                let tc = Arc::new(Tc::new(key, chunk_idx, offset));
                self.shared_pool.insert(key, tc.clone());
                tc
            }
        };
        tc.attach();

        let handle = self.insert_tb(Tb {
            vaddr_page,
            phys_page,
            exec_state,
            checksum,
            tc,
            smc: false,
        });
        Ok(handle)
    }

    fn insert_tb(&mut self, tb: Tb) -> TbHandle {
        let vaddr_page = tb.vaddr_page;
        let phys_page = tb.phys_page;
        let handle = match self.free_list.pop() {
            Some(h) => {
                self.arena[h.0 as usize] = Some(tb);
                h
            }
            None => {
                let h = TbHandle(self.arena.len() as u32);
                self.arena.push(Some(tb));
                h
            }
        };
        self.virt_hash.insert(vaddr_page, handle);
        self.phys_hash.entry(phys_page).or_default().push(handle);
        handle
    }

    /// SMC handling (§4.F): every TB referencing `pp` is marked `smc`, its `Tc`'s first bytes are
    /// overwritten with an exit-to-dispatcher stub when this cache owns the backing chunk
    /// (private `Tc`s always do; a `Tc` already promoted into the shared pool is immutable code
    /// but the owning `Tb` is still dropped from `virt_hash` here, which is what actually gates
    /// re-fetch — the byte patch is belt-and-braces for a private `Tc`, not load-bearing for
    /// correctness), and the `Tb` is removed from `virt_hash` so the next fetch rebuilds.
    pub fn invalidate_phys_page(&mut self, pp: u64) {
        let Some(handles) = self.phys_hash.remove(&pp) else {
            return;
        };
        for handle in handles {
            let Some(tb) = self.arena[handle.0 as usize].as_mut() else {
                continue;
            };
            tb.smc = true;
            self.virt_hash.remove(&tb.vaddr_page);
            if let Some(chunk) = self.chunks.get_mut(tb.tc.chunk_idx) {
                let _ = chunk.patch(tb.tc.offset, EXIT_STUB);
            }
            let tc = tb.tc.clone();
            self.arena[handle.0 as usize] = None;
            self.free_list.push(handle);
            if tc.detach() == 0 {
                self.shared_pool.forget(&TcKey {
                    checksum: tc.checksum,
                    exec_state: tc.exec_state,
                    size: tc.size,
                });
            }
        }
    }

    /// Garbage-collects the cache once it has crossed `threshold` bytes of reserved chunk space:
    /// drops every `Tb` (detaching its `Tc`, freeing private ones whose refcount reaches zero)
    /// and resets the per-CPU chunk list. Shared `Tc`s referenced by other CPUs stay alive via
    /// the `Arc` the shared pool holds, independent of this cache's own chunks.
    pub fn flush(&mut self, threshold: usize) -> bool {
        if self.bytes_reserved < threshold {
            return false;
        }
        for slot in self.arena.drain(..) {
            if let Some(tb) = slot {
                if tb.tc.detach() == 0 {
                    self.shared_pool.forget(&TcKey {
                        checksum: tb.tc.checksum,
                        exec_state: tb.tc.exec_state,
                        size: tb.tc.size,
                    });
                }
            }
        }
        self.virt_hash.clear();
        self.phys_hash.clear();
        self.free_list.clear();
        self.chunks.clear();
        self.bytes_reserved = 0;
        true
    }
}

/// A short sequence standing in for "return to dispatcher"; content is never executed since this
/// engine's back-end is NOJIT, but the overwrite itself is what the SMC invariant tests against.
const EXIT_STUB: &[u8] = &[0xc3, 0xc3, 0xc3, 0xc3];

fn fnv1a(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET_BASIS;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ExecState {
        ExecState {
            big_endian: true,
            addr64: false,
            kernel_mode: true,
        }
    }

    #[test]
    fn build_then_lookup_hits_virt_hash() {
        let mut cache = TbCache::new(Arc::new(SharedPool::new()));
        let page = vec![0u8; MIN_PAGE];
        let h = cache.get_or_build(0x1000, 1, state(), &page, 16).unwrap();
        assert_eq!(cache.lookup_virt(0x1000), Some(h));
    }

    #[test]
    fn identical_pages_share_a_tc() {
        let mut cache = TbCache::new(Arc::new(SharedPool::new()));
        let page = vec![0xAAu8; MIN_PAGE];
        let h1 = cache.get_or_build(0x1000, 1, state(), &page, 16).unwrap();
        let h2 = cache.get_or_build(0x2000, 2, state(), &page, 16).unwrap();
        assert!(Arc::ptr_eq(&cache.tb(h1).unwrap().tc, &cache.tb(h2).unwrap().tc));
        assert_eq!(cache.tb(h1).unwrap().tc.refcount(), 2);
    }

    #[test]
    fn smc_invalidation_removes_tb_from_virt_hash_and_zeroes_refcount() {
        let mut cache = TbCache::new(Arc::new(SharedPool::new()));
        let page = vec![0x11u8; MIN_PAGE];
        let h = cache.get_or_build(0x3000, 5, state(), &page, 16).unwrap();
        let tc = cache.tb(h).unwrap().tc.clone();
        cache.invalidate_phys_page(5);
        assert_eq!(cache.lookup_virt(0x3000), None);
        assert_eq!(tc.refcount(), 0);
    }

    #[test]
    fn flush_resets_cache_when_threshold_crossed() {
        let mut cache = TbCache::new(Arc::new(SharedPool::new()));
        let page = vec![0x22u8; MIN_PAGE];
        cache.get_or_build(0x4000, 9, state(), &page, 100).unwrap();
        assert!(!cache.flush(1_000_000));
        assert!(cache.flush(10));
        assert_eq!(cache.lookup_virt(0x4000), None);
        assert_eq!(cache.bytes_reserved(), 0);
    }
}
