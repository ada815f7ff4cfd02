// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Host-side protocol engine for Argentum serial printers

pub mod channel;
pub mod compress;
pub mod config;
pub mod connection;
pub mod error;
pub mod job;
pub mod protocol;
pub mod serial;
pub mod status;
pub mod transfer;
pub mod version;

pub use channel::Response;
pub use config::Config;
pub use connection::{Connection, ConnectionState};
pub use error::{CompressError, ConnectError, Error, Result};
pub use job::{JobState, Output, PrintOutcome, PrinterController};
pub use status::{Position, PrinterOptions};
pub use transfer::{Progress, TransferOutcome};
pub use version::FirmwareVersion;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over both flags when it is set.
pub fn init_logging(debug: bool, log_serial: bool) -> std::result::Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let mut directives = String::from(if debug { "debug" } else { "info" });
    if log_serial {
        directives.push_str(",argentum::serial=trace");
    }
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
}
