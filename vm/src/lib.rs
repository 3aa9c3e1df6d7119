// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VM container crate: binds a guest CPU, its RAM/ROM, and a reference device graph into the
//! single object every caller (CLI, hypervisor protocol, tests) drives through
//! create/init/start/suspend/resume/stop/free.

mod boot;
mod config;
mod container;
mod error;
mod snapshot;

pub use boot::load_config;
pub use boot::load_image;
pub use config::Arch;
pub use config::VmConfig;
pub use config::NVRAM_BASE;
pub use config::PCI_BASE;
pub use container::Vm;
pub use container::VmRequest;
pub use error::Error;
pub use error::Result;
