// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Primitive, host-facing utilities shared by every other crate in the workspace: aligned
//! allocation, `mmap`, a `timerfd` wrapper, a `poll(2)` multiplexer, CRC/checksum helpers, and
//! logging setup. Nothing here knows about MIPS64, PowerPC, or the device model; it is the same
//! role the `base` crate plays for the rest of its own workspace.

mod alloc;
mod crc;
mod error;
mod logger;
mod mmap;
mod timer;
mod wait;

pub use alloc::AlignedBuffer;
pub use crc::{bswap16, bswap32, crc16, crc32, nvram_checksum};
pub use error::{errno_result, Error, Result};
pub use logger::{init, init_with, LogConfig, LOG_ENV};
pub use mmap::MemoryMapping;
pub use timer::{Timer, WaitResult};
pub use wait::{WaitContext, WaitEvent, WaitToken};

pub use log::{debug, error, info, log, trace, warn, Level, LevelFilter};
