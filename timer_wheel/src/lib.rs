// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Timer queues and periodic tasks, the two scheduling primitives the rest of the workspace uses
//! to drive time-based guest events (the interval timer device, NIO transmit drains, bandwidth
//! governor resets) without each owning a thread of its own.

mod ptask;
mod queue;

pub use ptask::{PeriodicTasks, TaskId};
pub use queue::{Error, Result, TimerId, TimerPool, TimerQueue};
