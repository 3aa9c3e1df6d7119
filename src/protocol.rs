// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The hypervisor line protocol: `MODULE COMMAND arg...`, one command per connection-held
//! session, CR/LF framed, a thread-per-connection TCP server in the teacher's synchronous
//! control-plane style. Every response is one or more `100-<message>` lines followed by a
//! trailing `100-OK` or `500-<message>` line.

use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpListener;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use nio::Nio;
use nio::SharedNio;
use registry::ObjectType;
use registry::Registry;

pub fn serve(addr: SocketAddr, registry: Registry) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr)?;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("accept failed: {e}");
                continue;
            }
        };
        let registry = registry.clone();
        std::thread::spawn(move || handle_connection(stream, registry));
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, registry: Registry) {
    let peer = stream.peer_addr().ok();
    log::debug!("hypervisor client connected: {peer:?}");
    let mut writer = match stream.try_clone() {
        Ok(w) => w,
        Err(e) => {
            log::warn!("failed to clone client stream: {e}");
            return;
        }
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                log::warn!("read error from {peer:?}: {e}");
                break;
            }
        }
        let trimmed = line.trim_end_matches(|c| c == '\r' || c == '\n');
        if trimmed.is_empty() {
            continue;
        }
        let reply = dispatch(trimmed, &registry);
        let closing = matches!(reply, Reply::Close);
        if writer.write_all(reply.render().as_bytes()).is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    log::debug!("hypervisor client disconnected: {peer:?}");
}

enum Reply {
    Ok(Vec<String>),
    Error(String),
    Close,
}

impl Reply {
    fn render(&self) -> String {
        match self {
            Reply::Ok(lines) => {
                let mut out = String::new();
                for line in lines {
                    out.push_str(&format!("100-{line}\r\n"));
                }
                out.push_str("100-OK\r\n");
                out
            }
            Reply::Error(msg) => format!("500-{msg}\r\n"),
            Reply::Close => "100-OK\r\n".to_string(),
        }
    }
}

fn dispatch(line: &str, registry: &Registry) -> Reply {
    let mut parts = line.split_whitespace();
    let module = match parts.next() {
        Some(m) => m,
        None => return Reply::Error("empty command".to_string()),
    };
    let command = match parts.next() {
        Some(c) => c,
        None => return Reply::Error(format!("{module}: missing command")),
    };
    let args: Vec<&str> = parts.collect();

    match module {
        "hypervisor" => hypervisor_module(command, &args),
        "vm" => vm_module(command, &args, registry),
        "nio_udp" => nio_udp_module(command, &args, registry),
        "nio_unix" => nio_unix_module(command, &args, registry),
        "nio_tap" => nio_tap_module(command, &args, registry),
        "nio_fifo" => nio_fifo_module(command, &args, registry),
        "nio_bridge" => nio_bridge_module(command, &args, registry),
        other => Reply::Error(format!("unknown module '{other}'")),
    }
}

fn hypervisor_module(command: &str, _args: &[&str]) -> Reply {
    match command {
        "version" => Reply::Ok(vec![env!("CARGO_PKG_VERSION").to_string()]),
        "close" => Reply::Close,
        other => Reply::Error(format!("hypervisor: unknown command '{other}'")),
    }
}

fn vm_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let (Some(name), Some(arch_str)) = (args.first(), args.get(1)) else {
                return Reply::Error("vm create: usage NAME ARCH".to_string());
            };
            let arch = match *arch_str {
                "mips64" => vm::Arch::Mips64,
                "ppc32" => vm::Arch::Ppc32,
                other => return Reply::Error(format!("vm create: unknown arch '{other}'")),
            };
            let config = vm::VmConfig::new(*name, arch);
            let new_vm = match vm::Vm::new(config) {
                Ok(v) => Arc::new(v),
                Err(e) => return Reply::Error(format!("vm create: {e}")),
            };
            match registry.add(ObjectType::Vm, name, new_vm) {
                Ok(()) => Reply::Ok(vec![]),
                Err(e) => Reply::Error(format!("vm create: {e}")),
            }
        }
        "start" => with_vm(registry, args, |vm| vm.start().map_err(|e| e.to_string())),
        "stop" => with_vm(registry, args, |vm| vm.stop().map_err(|e| e.to_string())),
        "suspend" => with_vm(registry, args, |vm| vm.suspend().map_err(|e| e.to_string())),
        "resume" => with_vm(registry, args, |vm| vm.resume().map_err(|e| e.to_string())),
        "list" => {
            let mut names = Vec::new();
            registry.foreach_type(ObjectType::Vm, |name| names.push(name.to_string()));
            Reply::Ok(names)
        }
        other => Reply::Error(format!("vm: unknown command '{other}'")),
    }
}

fn with_vm(registry: &Registry, args: &[&str], f: impl FnOnce(&vm::Vm) -> Result<(), String>) -> Reply {
    let Some(name) = args.first() else {
        return Reply::Error("missing vm name".to_string());
    };
    match registry.find::<Arc<vm::Vm>>(ObjectType::Vm, name) {
        Ok(vm) => {
            let result = f(&vm);
            let _ = registry.unref(ObjectType::Vm, name);
            match result {
                Ok(()) => Reply::Ok(vec![]),
                Err(e) => Reply::Error(e),
            }
        }
        Err(e) => Reply::Error(e.to_string()),
    }
}

fn register_nio(registry: &Registry, name: &str, nio: impl Nio + 'static) -> Reply {
    let shared: SharedNio = Arc::new(Mutex::new(Box::new(nio)));
    match registry.add(ObjectType::Nio, name, shared) {
        Ok(()) => Reply::Ok(vec![]),
        Err(e) => Reply::Error(e.to_string()),
    }
}

fn delete_nio(registry: &Registry, name: &str) -> Reply {
    match registry.delete(ObjectType::Nio, name) {
        Ok(()) => Reply::Ok(vec![]),
        Err(e) => Reply::Error(e.to_string()),
    }
}

fn nio_udp_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let (Some(name), Some(local), Some(remote)) = (args.first(), args.get(1), args.get(2)) else {
                return Reply::Error("nio_udp create: usage NAME LOCAL_ADDR REMOTE_ADDR".to_string());
            };
            let local = match local.parse() {
                Ok(a) => a,
                Err(e) => return Reply::Error(format!("nio_udp create: bad local addr: {e}")),
            };
            let remote = match remote.parse() {
                Ok(a) => a,
                Err(e) => return Reply::Error(format!("nio_udp create: bad remote addr: {e}")),
            };
            match nio::UdpNio::new(local, remote) {
                Ok(n) => register_nio(registry, name, n),
                Err(e) => Reply::Error(format!("nio_udp create: {e}")),
            }
        }
        "delete" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_udp delete: missing name".to_string());
            };
            delete_nio(registry, name)
        }
        other => Reply::Error(format!("nio_udp: unknown command '{other}'")),
    }
}

fn nio_unix_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let (Some(name), Some(local), Some(remote)) = (args.first(), args.get(1), args.get(2)) else {
                return Reply::Error("nio_unix create: usage NAME LOCAL_PATH REMOTE_PATH".to_string());
            };
            match nio::UnixNio::new(Path::new(local), Path::new(remote)) {
                Ok(n) => register_nio(registry, name, n),
                Err(e) => Reply::Error(format!("nio_unix create: {e}")),
            }
        }
        "delete" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_unix delete: missing name".to_string());
            };
            delete_nio(registry, name)
        }
        other => Reply::Error(format!("nio_unix: unknown command '{other}'")),
    }
}

fn nio_tap_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let (Some(name), Some(iface)) = (args.first(), args.get(1)) else {
                return Reply::Error("nio_tap create: usage NAME IFACE".to_string());
            };
            match nio::TapDevice::new(iface) {
                Ok(tap) => match registry.add(ObjectType::Nio, name, Arc::new(Mutex::new(tap))) {
                    Ok(()) => Reply::Ok(vec![]),
                    Err(e) => Reply::Error(e.to_string()),
                },
                Err(e) => Reply::Error(format!("nio_tap create: {e}")),
            }
        }
        "delete" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_tap delete: missing name".to_string());
            };
            delete_nio(registry, name)
        }
        other => Reply::Error(format!("nio_tap: unknown command '{other}'")),
    }
}

fn nio_fifo_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_fifo create: missing name".to_string());
            };
            let nio::FifoPair(a, b) = nio::FifoPair::new();
            let a_name = format!("{name}.a");
            let b_name = format!("{name}.b");
            if let Err(e) = register_reply_err(registry, &a_name, a) {
                return Reply::Error(e);
            }
            if let Err(e) = register_reply_err(registry, &b_name, b) {
                let _ = registry.delete(ObjectType::Nio, &a_name);
                return Reply::Error(e);
            }
            Reply::Ok(vec![a_name, b_name])
        }
        "delete" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_fifo delete: missing name".to_string());
            };
            let _ = registry.delete(ObjectType::Nio, &format!("{name}.a"));
            let _ = registry.delete(ObjectType::Nio, &format!("{name}.b"));
            Reply::Ok(vec![])
        }
        other => Reply::Error(format!("nio_fifo: unknown command '{other}'")),
    }
}

fn register_reply_err(registry: &Registry, name: &str, nio: impl Nio + 'static) -> Result<(), String> {
    let shared: SharedNio = Arc::new(Mutex::new(Box::new(nio)));
    registry.add(ObjectType::Nio, name, shared).map_err(|e| e.to_string())
}

fn nio_bridge_module(command: &str, args: &[&str], registry: &Registry) -> Reply {
    match command {
        "create" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_bridge create: missing name".to_string());
            };
            match registry.add(ObjectType::Bridge, name, Arc::new(nio::Bridge::new())) {
                Ok(()) => Reply::Ok(vec![]),
                Err(e) => Reply::Error(e.to_string()),
            }
        }
        "add_nio" => {
            let (Some(bridge_name), Some(nio_name)) = (args.first(), args.get(1)) else {
                return Reply::Error("nio_bridge add_nio: usage BRIDGE NIO".to_string());
            };
            let bridge = match registry.find::<Arc<nio::Bridge>>(ObjectType::Bridge, bridge_name) {
                Ok(b) => b,
                Err(e) => return Reply::Error(e.to_string()),
            };
            let result = match registry.find::<SharedNio>(ObjectType::Nio, nio_name) {
                Ok(shared) => {
                    bridge.add_nio(nio_name, shared);
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            };
            let _ = registry.unref(ObjectType::Bridge, bridge_name);
            match result {
                Ok(()) => Reply::Ok(vec![]),
                Err(e) => Reply::Error(e),
            }
        }
        "remove_nio" => {
            let (Some(bridge_name), Some(nio_name)) = (args.first(), args.get(1)) else {
                return Reply::Error("nio_bridge remove_nio: usage BRIDGE NIO".to_string());
            };
            let bridge = match registry.find::<Arc<nio::Bridge>>(ObjectType::Bridge, bridge_name) {
                Ok(b) => b,
                Err(e) => return Reply::Error(e.to_string()),
            };
            let ports = bridge.port_names();
            let _ = registry.unref(ObjectType::Bridge, bridge_name);
            if let Some(idx) = ports.iter().position(|p| p.as_str() == *nio_name) {
                bridge.remove_nio(idx);
                Reply::Ok(vec![])
            } else {
                Reply::Error(format!("no port named '{nio_name}' on bridge '{bridge_name}'"))
            }
        }
        "delete" => {
            let Some(name) = args.first() else {
                return Reply::Error("nio_bridge delete: missing name".to_string());
            };
            match registry.delete(ObjectType::Bridge, name) {
                Ok(()) => Reply::Ok(vec![]),
                Err(e) => Reply::Error(e.to_string()),
            }
        }
        other => Reply::Error(format!("nio_bridge: unknown command '{other}'")),
    }
}
