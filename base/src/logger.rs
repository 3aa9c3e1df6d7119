// Copyright 2026 The Dynamips Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Logging setup. Built on `env_logger` over the `log` facade, the same pairing the rest of the
//! workspace's ambient stack uses instead of a hand-rolled syslog client.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use log::LevelFilter;

/// Environment variable consulted for the default filter directive, e.g. `RUST_LOG`-style but
/// scoped to this project so it doesn't collide with filters meant for other binaries.
pub const LOG_ENV: &str = "DYNAMIPS_LOG";

/// Where log output should go.
pub struct LogConfig {
    /// Minimum level to emit when `DYNAMIPS_LOG` is unset.
    pub default_filter: LevelFilter,
    /// If set, log to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            default_filter: LevelFilter::Info,
            log_file: None,
        }
    }
}

/// Initializes the global logger. Safe to call more than once per process; subsequent calls are
/// no-ops, matching `env_logger`'s own idempotence.
pub fn init_with(config: LogConfig) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(config.default_filter);
    if let Ok(spec) = std::env::var(LOG_ENV) {
        builder.parse_filters(&spec);
    }

    if let Some(path) = config.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    // `try_init` rather than `init`: a second call (e.g. from a test harness that also logs)
    // must not panic.
    let _ = builder.try_init();
    Ok(())
}

/// Initializes the global logger with defaults (stderr, `Info`, honoring `DYNAMIPS_LOG`).
pub fn init() {
    let _ = init_with(LogConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_with_file_target_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamips.log");
        init_with(LogConfig {
            default_filter: LevelFilter::Debug,
            log_file: Some(path.clone()),
        })
        .unwrap();
        log::info!("hello");
        assert!(path.exists());
    }
}
