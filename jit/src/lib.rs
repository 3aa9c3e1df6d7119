// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The translation-block manager: per-CPU page caches (`virt_hash`/`phys_hash`), the bump-style
//! JIT chunk allocator, self-modifying-code detection, and the cross-CPU translation sharing
//! group (TSG). `cpu` calls `TbCache::lookup_or_build` with a closure that decodes and emits one
//! guest page; this crate owns everything about *how that result is cached, shared, and
//! invalidated* but nothing about instruction semantics.

mod chunk;
mod tb;
mod tsg;

pub use chunk::JitChunk;
pub use tb::BlockOutcome;
pub use tb::ExecState;
pub use tb::Tb;
pub use tb::TbCache;
pub use tb::TbHandle;
pub use tb::MIN_PAGE;
pub use tsg::SharedPool;
pub use tsg::Tc;
pub use tsg::TcKey;

use vm_memory::SmcNotify;

/// Wires `TbCache::invalidate_phys_page` up as the `vm_memory::SmcNotify` callback the MTS holds
/// a handle to, so a guest write to an executable page reaches the owning CPU's TB cache without
/// `vm_memory` knowing this crate exists.
pub struct SmcBridge(pub std::sync::Arc<std::sync::Mutex<TbCache>>);

impl SmcNotify for SmcBridge {
    fn invalidate_phys_page(&self, pp: u64) {
        self.0.lock().unwrap().invalidate_phys_page(pp);
    }
}
