// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The RX listener: a single thread that multiplexes every attached NIO with a registered
//! handler, so a packet arriving on any transport is delivered without dedicating a thread per
//! transport.

use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use base::WaitContext;
use base::WaitToken;

use crate::Nio;

/// Called with the raw packet bytes whenever a registered NIO becomes readable. Handlers run on
/// the listener thread, so they must not block (same constraint the reference implementation
/// places on its RX callback).
pub type RxHandler = Box<dyn FnMut(&[u8]) + Send>;

struct Slot {
    nio: Box<dyn Nio>,
    handler: RxHandler,
}

struct Shared {
    slots: Mutex<Vec<Option<Slot>>>,
}

/// Owns the poll loop thread and the registration table. Dropping the listener stops the thread.
pub struct RxListener {
    shared: Arc<Shared>,
    stop: Arc<std::sync::atomic::AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RxListener {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Vec::new()),
        });
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let thread_shared = shared.clone();
        let thread_stop = stop.clone();
        let join = thread::Builder::new()
            .name("dynamips-nio-rx".into())
            .spawn(move || Self::run(thread_shared, thread_stop))
            .expect("spawning the NIO RX listener thread");
        RxListener {
            shared,
            stop,
            join: Some(join),
        }
    }

    /// Registers `nio` with `handler`, returning a token usable with `remove`.
    pub fn add(&self, nio: Box<dyn Nio>, handler: RxHandler) -> usize {
        let mut slots = self.shared.slots.lock().unwrap();
        let idx = slots.len();
        slots.push(Some(Slot { nio, handler }));
        idx
    }

    /// Unregisters a previously added NIO. The slot's index is never reused, matching the
    /// reference implementation's stable per-NIO handle for the lifetime of the process.
    pub fn remove(&self, token: usize) {
        let mut slots = self.shared.slots.lock().unwrap();
        if let Some(slot) = slots.get_mut(token) {
            *slot = None;
        }
    }

    fn run(shared: Arc<Shared>, stop: Arc<std::sync::atomic::AtomicBool>) {
        let mut buf = [0u8; 65536];
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            let mut ctx = WaitContext::new();
            {
                let slots = shared.slots.lock().unwrap();
                for (idx, slot) in slots.iter().enumerate() {
                    if let Some(slot) = slot {
                        if let Some(fd) = slot.nio.as_raw_fd() {
                            ctx.add(&FdRef(fd), WaitToken(idx as u32));
                        }
                    }
                }
            }

            let events = match ctx.wait(Some(Duration::from_millis(100))) {
                Ok(events) => events,
                Err(_) => continue,
            };

            let mut slots = shared.slots.lock().unwrap();
            for event in events {
                let idx = event.token.0 as usize;
                if let Some(Some(slot)) = slots.get_mut(idx) {
                    if let Ok(n) = slot.nio.recv(&mut buf) {
                        if n > 0 {
                            (slot.handler)(&buf[..n]);
                        }
                    }
                }
            }
        }
    }
}

impl Drop for RxListener {
    fn drop(&mut self) {
        self.stop.store(true, std::sync::atomic::Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for RxListener {
    fn default() -> Self {
        Self::new()
    }
}

struct FdRef(std::os::unix::io::RawFd);

impl std::os::unix::io::AsRawFd for FdRef {
    fn as_raw_fd(&self) -> std::os::unix::io::RawFd {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnixNio;
    use std::sync::mpsc;

    #[test]
    fn delivers_packet_to_registered_handler() {
        let (mut a, b) = UnixNio::pair().unwrap();
        let (tx, rx) = mpsc::channel();
        let listener = RxListener::new();
        listener.add(
            Box::new(b),
            Box::new(move |pkt| {
                tx.send(pkt.to_vec()).unwrap();
            }),
        );

        a.send(b"hello-rx").unwrap();
        let got = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(got, b"hello-rx");
    }
}
