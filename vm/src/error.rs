// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use remain::sorted;
use thiserror::Error as ThisError;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// The VM is already running; `start` was called twice without an intervening `stop`.
    #[error("vm '{0}' is already running")]
    AlreadyRunning(String),
    /// The raw boot image is larger than the device window it would be mapped into.
    #[error("boot image of {0} bytes does not fit in the {1}-byte window at {2:#x}")]
    BootImageTooLarge(usize, u64, u64),
    /// The requested operation needs a running VM but none is attached.
    #[error("vm '{0}' is not running")]
    NotRunning(String),
    /// Allocating the guest's backing RAM failed.
    #[error("failed to allocate guest RAM: {0}")]
    Ram(base::Error),
    /// A saved snapshot failed to decode.
    #[error("malformed snapshot: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, Error>;
