// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Shared tracing initialization for the host binary.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Initialize tracing with environment-based configuration and fallback support.
///
/// - Uses `RUST_LOG` when set, otherwise the provided debug flag picks
///   DEBUG/INFO.
/// - Always logs to stdout; when `log_file` is given, a second ANSI-free
///   layer appends to that file. Records land on the file per write, there is
///   no buffering in between.
/// - A log file that cannot be opened is reported and skipped rather than
///   aborting the process.
pub fn init_tracing(debug_fallback: bool, log_file: Option<&Path>) -> Result<(), eyre::Report> {
    let filter = if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        env_filter
    } else {
        EnvFilter::new(if debug_fallback { "debug" } else { "info" })
    };

    let file_layer = log_file.and_then(|path| {
        match OpenOptions::new().append(true).create(true).open(path) {
            Ok(file) => Some(
                fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            ),
            Err(e) => {
                eprintln!("could not open log file '{}': {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_thread_names(false)
                .with_span_events(fmt::format::FmtSpan::NONE),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}
