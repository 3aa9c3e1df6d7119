// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Save/restore framing: a length-prefixed container around a `serde_json`-encoded envelope,
//! the postcard-style framing the rest of the retrieval pack uses over a self-describing
//! payload rather than a fixed-layout binary struct.
//!
//! `cpu::GuestCpu` exposes only `run_state()`/`set_run_state()` generically across both
//! architectures, not a register-level accessor; a snapshot therefore covers the device graph
//! (NVRAM contents, boot-ROM/RAM window bytes) plus the CPU's run state, not its architectural
//! registers. Widening `GuestCpu` to support full register snapshots is future work, not
//! attempted here to avoid growing the trait's surface beyond what the dispatcher itself needs.

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Serialize, Deserialize)]
struct Envelope {
    devices: Vec<(String, Vec<u8>)>,
    run_state: u8,
}

fn encode_run_state(state: cpu::RunState) -> u8 {
    match state {
        cpu::RunState::Stopped => 0,
        cpu::RunState::Running => 1,
        cpu::RunState::Halted => 2,
        cpu::RunState::Suspended => 3,
    }
}

fn decode_run_state(byte: u8) -> cpu::RunState {
    match byte {
        1 => cpu::RunState::Running,
        2 => cpu::RunState::Halted,
        3 => cpu::RunState::Suspended,
        _ => cpu::RunState::Stopped,
    }
}

pub(crate) fn encode(devices: Vec<(String, Vec<u8>)>, run_state: cpu::RunState) -> Vec<u8> {
    let envelope = Envelope {
        devices,
        run_state: encode_run_state(run_state),
    };
    let payload = serde_json::to_vec(&envelope).expect("serializing snapshot envelope");
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload);
    out
}

pub(crate) fn decode(bytes: &[u8]) -> Result<(Vec<(String, Vec<u8>)>, cpu::RunState)> {
    if bytes.len() < 4 {
        return Err(Error::Snapshot("truncated length prefix".to_string()));
    }
    let len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let payload = bytes
        .get(4..4 + len)
        .ok_or_else(|| Error::Snapshot("truncated payload".to_string()))?;
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| Error::Snapshot(e.to_string()))?;
    Ok((envelope.devices, decode_run_state(envelope.run_state)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_devices_and_run_state() {
        let devices = vec![("nvram".to_string(), vec![1, 2, 3]), ("rom".to_string(), vec![])];
        let encoded = encode(devices.clone(), cpu::RunState::Suspended);
        let (decoded, state) = decode(&encoded).unwrap();
        assert_eq!(decoded, devices);
        assert_eq!(state, cpu::RunState::Suspended);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        assert!(matches!(decode(&[1, 2]), Err(Error::Snapshot(_))));
    }
}
