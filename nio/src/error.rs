// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io;

use remain::sorted;
use thiserror::Error as ThisError;

#[sorted]
#[derive(ThisError, Debug)]
pub enum Error {
    /// Couldn't bind the requested local address or port.
    #[error("failed to bind: {0}")]
    Bind(io::Error),
    /// Couldn't connect to the requested peer.
    #[error("failed to connect: {0}")]
    Connect(io::Error),
    /// No free port was found in the requested auto-bind range.
    #[error("no free port in range {0}..{1}")]
    NoFreePort(u16, u16),
    /// A receive failed for a reason other than "would block".
    #[error("recv failed: {0}")]
    Recv(io::Error),
    /// A send failed for a reason other than "would block".
    #[error("send failed: {0}")]
    Send(io::Error),
    /// Failed to open or configure a TAP device.
    #[error("failed to open tap device: {0}")]
    Tap(io::Error),
    /// This `NioKind` is declared but not implemented on this build.
    #[error("{0} transport is not implemented on this build")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
