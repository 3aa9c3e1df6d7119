// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;

use remain::sorted;
use thiserror::Error as ThisError;

/// Errors raised by the primitive utilities in this crate.
///
/// Every allocator and I/O helper in `base` returns a `Result` built on this enum rather than
/// panicking; callers propagate with `?` up to the layer that can turn the failure into a guest
/// exception or a CLI diagnostic.
#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// Requested alignment was not a power of two.
    #[error("alignment {0} is not a power of two")]
    BadAlignment(usize),
    /// `mmap(2)` or `munmap(2)` failed.
    #[error("mmap failed: {0}")]
    Mmap(io::Error),
    /// Size overflowed when rounding to a page or alignment boundary.
    #[error("size overflowed while rounding to boundary")]
    Overflow,
    /// An underlying I/O operation failed.
    #[error("I/O error: {0}")]
    Sys(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn last_os_error() -> Error {
        Error::Sys(io::Error::last_os_error())
    }
}

/// Helper mirroring the teacher's `errno_result()`: build an `Err` from the last OS error.
pub fn errno_result<T>() -> Result<T> {
    Err(Error::last_os_error())
}
