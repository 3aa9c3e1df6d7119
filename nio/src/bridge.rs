// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A NIO bridge: an N-port hub that rebroadcasts any packet arriving on one attached NIO to every
//! other port, the `nio_bridge` protocol module's backing object. Built on the same poll-loop
//! shape as `RxListener`, generalized from "deliver to one handler" to "deliver to every other
//! port".

use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use base::WaitContext;
use base::WaitToken;

use crate::Nio;

/// A NIO handle a bridge port can share ownership of with whatever else (typically the
/// registry) also holds it, so attaching a NIO to a bridge doesn't require taking it away from
/// its creator.
pub type SharedNio = Arc<Mutex<Box<dyn Nio>>>;

struct Port {
    name: String,
    nio: SharedNio,
}

struct Shared {
    ports: Mutex<Vec<Option<Port>>>,
}

/// Owns the relay thread and the port table. Dropping the bridge stops the thread and drops every
/// attached NIO.
pub struct Bridge {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Bridge {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            ports: Mutex::new(Vec::new()),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let thread_shared = shared.clone();
        let thread_stop = stop.clone();
        let join = thread::Builder::new()
            .name("dynamips-nio-bridge".into())
            .spawn(move || Self::run(thread_shared, thread_stop))
            .expect("spawning the NIO bridge relay thread");
        Bridge {
            shared,
            stop,
            join: Some(join),
        }
    }

    /// Attaches a NIO under `name`, returning the port token `remove_nio` takes.
    pub fn add_nio(&self, name: &str, nio: SharedNio) -> usize {
        let mut ports = self.shared.ports.lock().unwrap();
        let token = ports.len();
        ports.push(Some(Port {
            name: name.to_string(),
            nio,
        }));
        token
    }

    pub fn remove_nio(&self, token: usize) {
        let mut ports = self.shared.ports.lock().unwrap();
        if let Some(slot) = ports.get_mut(token) {
            *slot = None;
        }
    }

    /// Names of the currently attached ports, in token order (removed ports leave no gap in the
    /// index but are skipped here).
    pub fn port_names(&self) -> Vec<String> {
        self.shared
            .ports
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.as_ref().map(|p| p.name.clone()))
            .collect()
    }

    fn run(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
        let mut buf = [0u8; 65536];
        while !stop.load(Ordering::Relaxed) {
            let mut ctx = WaitContext::new();
            {
                let ports = shared.ports.lock().unwrap();
                for (idx, port) in ports.iter().enumerate() {
                    if let Some(port) = port {
                        if let Some(fd) = port.nio.lock().unwrap().as_raw_fd() {
                            ctx.add(&FdRef(fd), WaitToken(idx as u32));
                        }
                    }
                }
            }

            let events = match ctx.wait(Some(Duration::from_millis(100))) {
                Ok(events) => events,
                Err(_) => continue,
            };

            for event in events {
                let src = event.token.0 as usize;
                let ports = shared.ports.lock().unwrap();
                let n = match ports.get(src) {
                    Some(Some(port)) => match port.nio.lock().unwrap().recv(&mut buf) {
                        Ok(n) if n > 0 => n,
                        _ => continue,
                    },
                    _ => continue,
                };
                for (idx, port) in ports.iter().enumerate() {
                    if idx == src {
                        continue;
                    }
                    if let Some(port) = port {
                        let _ = port.nio.lock().unwrap().send(&buf[..n]);
                    }
                }
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

struct FdRef(RawFd);

impl AsRawFd for FdRef {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UnixNio;

    fn shared(nio: impl Nio + 'static) -> SharedNio {
        Arc::new(Mutex::new(Box::new(nio) as Box<dyn Nio>))
    }

    #[test]
    fn relays_packets_between_two_ports_but_not_back_to_the_sender() {
        let (a, a_peer) = UnixNio::pair().unwrap();
        let (b, b_peer) = UnixNio::pair().unwrap();
        let bridge = Bridge::new();
        bridge.add_nio("a", shared(a));
        bridge.add_nio("b", shared(b));

        let mut a_peer = a_peer;
        let mut b_peer = b_peer;
        a_peer.send(b"hello-bridge").unwrap();

        let mut buf = [0u8; 64];
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        let mut got = 0;
        while std::time::Instant::now() < deadline {
            if let Ok(n) = b_peer.recv(&mut buf) {
                if n > 0 {
                    got = n;
                    break;
                }
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(&buf[..got], b"hello-bridge");
        assert_eq!(a_peer.recv(&mut buf).unwrap_or(0), 0);
    }

    #[test]
    fn remove_nio_drops_the_port() {
        let bridge = Bridge::new();
        let (a, _peer) = UnixNio::pair().unwrap();
        let token = bridge.add_nio("a", shared(a));
        assert_eq!(bridge.port_names(), vec!["a".to_string()]);
        bridge.remove_nio(token);
        assert!(bridge.port_names().is_empty());
    }
}
