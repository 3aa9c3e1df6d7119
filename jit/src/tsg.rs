// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The translation sharing group: a process-wide table letting unrelated CPUs (or unrelated pages
//! on the same CPU) discover that a `Tc` matching their `(checksum, exec_state, size)` already
//! exists and attach to it instead of re-emitting identical code, per §3's "TBs with identical
//! (checksum, exec_state, size) may share a single TC." A `Tc` found here is logically immutable:
//! nothing re-emits into it once published, only `attach`/`detach` touch its refcount, and the
//! byte-level SMC stub overwrite in `TbCache::invalidate_phys_page` is the one sanctioned
//! exception, applied only when the invalidating CPU also owns the backing chunk.

use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::tb::ExecState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TcKey {
    pub checksum: u64,
    pub exec_state: ExecState,
    pub size: usize,
}

/// One compiled translation, shared by every `Tb` whose page hashes to the same `TcKey`.
pub struct Tc {
    pub checksum: u64,
    pub exec_state: ExecState,
    pub size: usize,
    pub chunk_idx: usize,
    pub offset: usize,
    refcount: AtomicUsize,
}

impl Tc {
    pub fn new(key: TcKey, chunk_idx: usize, offset: usize) -> Self {
        Tc {
            checksum: key.checksum,
            exec_state: key.exec_state,
            size: key.size,
            chunk_idx,
            offset,
            refcount: AtomicUsize::new(0),
        }
    }

    pub fn attach(&self) -> usize {
        self.refcount.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the refcount and returns its new value; the caller frees/forgets the `Tc` once
    /// this reaches zero (the refcount law in §3: "the sum of `Tb::refcount` contributions to a
    /// `Tc` equals the value stored on the `Tc`").
    pub fn detach(&self) -> usize {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }
}

/// Process-wide `TcKey -> Tc` table. Short critical sections only, same discipline as
/// `registry::Registry`: a lookup/insert never holds the lock across anything but a hashmap
/// operation.
pub struct SharedPool {
    table: Mutex<HashMap<TcKey, std::sync::Arc<Tc>>>,
}

impl SharedPool {
    pub fn new() -> Self {
        SharedPool {
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn find(&self, key: &TcKey) -> Option<std::sync::Arc<Tc>> {
        self.table.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: TcKey, tc: std::sync::Arc<Tc>) {
        self.table.lock().unwrap().insert(key, tc);
    }

    /// Drops the pool's own reference once the last `Tb` anywhere has detached; a no-op if
    /// another build already replaced the entry (e.g. a flush/rebuild race), matching the
    /// defensive `remove`-checks-identity style `registry::Registry::unref` uses.
    pub fn forget(&self, key: &TcKey) {
        self.table.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedPool {
    fn default() -> Self {
        Self::new()
    }
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
    fn attach_detach_round_trips_refcount() {
        let tc = Tc::new(
            TcKey {
                checksum: 1,
                exec_state: state(),
                size: 4096,
            },
            0,
            0,
        );
        assert_eq!(tc.attach(), 1);
        assert_eq!(tc.attach(), 2);
        assert_eq!(tc.detach(), 1);
        assert_eq!(tc.detach(), 0);
    }

    #[test]
    fn pool_insert_then_find_then_forget() {
        let pool = SharedPool::new();
        let key = TcKey {
            checksum: 7,
            exec_state: state(),
            size: 4096,
        };
        let tc = std::sync::Arc::new(Tc::new(key, 0, 0));
        pool.insert(key, tc.clone());
        assert!(pool.find(&key).is_some());
        pool.forget(&key);
        assert!(pool.find(&key).is_none());
        assert!(pool.is_empty());
    }
}
