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

use std::time::Duration;
use thiserror::Error;
use crate::job::JobState;

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Error Types
// ============================================================================

/// Failures while opening the port or reading the boot banner
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Printer didn't respond. Please ensure no other programs have the port open and try again.")]
    NoResponse,

    #[error("Port needs reset.")]
    PortNeedsReset,

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems that make a program unsuitable for compression.
///
/// These are pre-flight rejections; the program can still be sent uncompressed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompressError {
    #[error("program is not valid UTF-8 text")]
    NotText,

    #[error("firing order changed at line {line}")]
    FiringOrder { line: usize },

    #[error("firing line too long ({len} bytes)")]
    LineTooLong { len: usize },

    #[error("unknown directive at line {line}: {text}")]
    UnknownDirective { line: usize, text: String },

    #[error("malformed directive at line {line}: {text}")]
    MalformedDirective { line: usize, text: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("printer is not connected")]
    NotConnected,

    #[error("printer is busy ({0:?})")]
    Busy(JobState),

    #[error("printer refused transfer: {0:?}")]
    NotReady(Vec<String>),

    #[error("protocol desync: {0}")]
    Desync(String),

    #[error("too many block failures ({failures}) at offset {offset}")]
    TooManyFailures { failures: u32, offset: usize },

    #[error("printer aborted transfer: {0}")]
    DeviceAbort(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
