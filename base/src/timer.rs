// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A `timerfd`-backed monotonic timer, the primitive the `timer_wheel` crate builds its timer
//! queues and periodic-task scheduler on top of.

use std::mem;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

use libc::CLOCK_MONOTONIC;
use libc::EAGAIN;
use libc::POLLIN;
use libc::TFD_CLOEXEC;

use crate::error::errno_result;
use crate::Error;
use crate::Result;

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The timer expired.
    Expired,
    /// `wait_for` returned because its timeout elapsed before the timer expired.
    Timeout,
}

/// A single `timerfd`. The handle owns the descriptor for its whole lifetime and closes it on
/// drop.
pub struct Timer {
    fd: RawFd,
    interval: Option<Duration>,
}

impl AsRawFd for Timer {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Timer {
    /// Creates a new timerfd. The timer is initially disarmed; call `reset` to arm it.
    pub fn new() -> Result<Timer> {
        // Safe because this doesn't modify any memory and we check the return value.
        let ret = unsafe { libc::timerfd_create(CLOCK_MONOTONIC, TFD_CLOEXEC) };
        if ret < 0 {
            return errno_result();
        }
        Ok(Timer {
            fd: ret,
            interval: None,
        })
    }

    fn set_time(&mut self, dur: Option<Duration>, interval: Option<Duration>) -> Result<()> {
        self.interval = interval;
        let spec = libc::itimerspec {
            it_interval: duration_to_timespec(interval.unwrap_or_default()),
            it_value: duration_to_timespec(dur.unwrap_or_default()),
        };
        // Safe because this doesn't modify any memory and we check the return value.
        let ret = unsafe { libc::timerfd_settime(self.fd, 0, &spec, ptr::null_mut()) };
        if ret < 0 {
            return errno_result();
        }
        Ok(())
    }

    /// Arms the timer to expire after `dur`. If `interval` is not `None` it is the period for
    /// repeated expirations after the first one; otherwise the timer fires once. Cancels any
    /// previously armed duration/interval.
    pub fn reset(&mut self, dur: Duration, interval: Option<Duration>) -> Result<()> {
        self.set_time(Some(dur), interval)
    }

    /// Disarms the timer.
    pub fn clear(&mut self) -> Result<()> {
        self.set_time(None, None)
    }

    /// Blocks until the timer expires, or `timeout` elapses first.
    pub fn wait_for(&mut self, timeout: Option<Duration>) -> Result<WaitResult> {
        let mut pfd = libc::pollfd {
            fd: self.fd,
            events: POLLIN,
            revents: 0,
        };
        let ret = if let Some(t) = timeout {
            let ts = duration_to_timespec(t);
            // Safe because this only modifies `pfd` and we check the return value.
            unsafe { libc::ppoll(&mut pfd, 1, &ts, ptr::null_mut()) }
        } else {
            // Safe because this only modifies `pfd` and we check the return value.
            unsafe { libc::ppoll(&mut pfd, 1, ptr::null_mut(), ptr::null_mut()) }
        };
        if ret < 0 {
            return errno_result();
        }
        if pfd.revents == 0 {
            return Ok(WaitResult::Timeout);
        }
        let _ = self.mark_waited()?;
        Ok(WaitResult::Expired)
    }

    /// Blocks until the timer expires.
    pub fn wait(&mut self) -> Result<WaitResult> {
        self.wait_for(None)
    }

    /// Consumes the expiration count so the descriptor doesn't stay readable. Returns `true` if
    /// the kernel had already rearmed the timer (read raced with `timerfd_settime`) before this
    /// call observed it.
    pub fn mark_waited(&mut self) -> Result<bool> {
        let mut count: u64 = 0;
        // Safe because the timerfd is non-blocking and `count` is exactly 8 bytes.
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut count as *mut _ as *mut libc::c_void,
                mem::size_of_val(&count),
            )
        };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(EAGAIN) {
                Ok(true)
            } else {
                Err(Error::Sys(err))
            }
        } else {
            Ok(false)
        }
    }

    /// The host clock's reported resolution for `CLOCK_MONOTONIC`.
    pub fn resolution() -> Result<Duration> {
        // Safe because we zero-initialize a struct of primitive fields.
        let mut res: libc::timespec = unsafe { mem::zeroed() };
        // Safe because it only writes into `res` and we check the return value.
        let ret = unsafe { libc::clock_getres(CLOCK_MONOTONIC, &mut res) };
        if ret != 0 {
            return errno_result();
        }
        Ok(Duration::new(res.tv_sec as u64, res.tv_nsec as u32))
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        // Safe because `fd` is owned exclusively by this `Timer`.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_expires() {
        let mut t = Timer::new().unwrap();
        t.reset(Duration::from_millis(1), None).unwrap();
        assert_eq!(t.wait().unwrap(), WaitResult::Expired);
    }

    #[test]
    fn wait_for_times_out_when_disarmed() {
        let mut t = Timer::new().unwrap();
        assert_eq!(
            t.wait_for(Some(Duration::from_millis(5))).unwrap(),
            WaitResult::Timeout
        );
    }

    #[test]
    fn clear_disarms_pending_expiration() {
        let mut t = Timer::new().unwrap();
        t.reset(Duration::from_secs(60), None).unwrap();
        t.clear().unwrap();
        assert_eq!(
            t.wait_for(Some(Duration::from_millis(5))).unwrap(),
            WaitResult::Timeout
        );
    }
}
