// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup for the command-line binary.
//!
//! Two layers are installed: a compact console layer on stderr (so progress
//! bars on stdout stay readable) and a plain-text session log that is
//! truncated at startup. `RUST_LOG` overrides the default level.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Session log file name.
pub const LOG_FILE: &str = "installer.log";

/// Initialize the global subscriber.
///
/// `verbose` lowers the default level to `debug`, `quiet` raises it to `warn`.
/// When `log_dir` is given the session log is written there.
pub fn init_logging(log_dir: Option<&Path>, verbose: bool, quiet: bool) -> io::Result<()> {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .compact();

    let file_layer = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let file = File::create(dir.join(LOG_FILE))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
