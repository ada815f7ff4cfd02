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

use std::io::{self, Read, Write};
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, ClearBuffer, DataBits, Parity, StopBits};
use tracing::{trace, warn};
use crate::error::ConnectError;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for serial port operations needed by the printer protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Number of bytes already buffered by the driver
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Discard everything buffered on the input side
    fn clear_input(&mut self) -> io::Result<()>;

    /// Underlying descriptor, for line-discipline resets
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Opens a named port with a given read timeout
pub trait PortOpener: Send {
    fn open(&mut self, port_name: &str, timeout: Duration) -> Result<Box<dyn SerialPort>, ConnectError>;
}

/// Low-level line reset attempted when the boot banner starts with garbage.
///
/// Returns `true` when the reset was carried out.
pub trait LineReset: Send {
    fn reset(&self, port: &mut dyn SerialPort) -> bool;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
    #[cfg(unix)]
    fd: RawFd,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, serialport::Error> {
        let native = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open_native()?;

        #[cfg(unix)]
        let fd = native.as_raw_fd();

        Ok(RealSerialPort {
            port: Box::new(native),
            #[cfg(unix)]
            fd,
        })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.port.set_timeout(timeout)?;
        self.port.read(buf)
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.fd)
    }
}

/// Opens real ports at a fixed baud rate
pub struct RealPortOpener {
    baud_rate: u32,
}

impl RealPortOpener {
    pub fn new(baud_rate: u32) -> Self {
        RealPortOpener { baud_rate }
    }
}

impl PortOpener for RealPortOpener {
    fn open(&mut self, port_name: &str, timeout: Duration) -> Result<Box<dyn SerialPort>, ConnectError> {
        let port = RealSerialPort::open(port_name, self.baud_rate, timeout)?;
        Ok(Box::new(port))
    }
}

// ============================================================================
// Line Reset Strategies
// ============================================================================

/// Reset strategy for platforms without one
pub struct NoReset;

impl LineReset for NoReset {
    fn reset(&self, _port: &mut dyn SerialPort) -> bool {
        false
    }
}

/// Re-applies the current termios attributes, which clears a wedged line discipline
#[cfg(unix)]
pub struct TermiosReset;

#[cfg(unix)]
impl LineReset for TermiosReset {
    fn reset(&self, port: &mut dyn SerialPort) -> bool {
        use nix::sys::termios::{self, SetArg};
        use std::os::fd::BorrowedFd;

        let Some(raw) = port.raw_fd() else {
            return false;
        };
        trace!("attempting low level port reset");
        // SAFETY: the descriptor belongs to `port`, which stays open for this call.
        let fd = unsafe { BorrowedFd::borrow_raw(raw) };
        match termios::tcgetattr(fd).and_then(|attrs| termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)) {
            Ok(()) => true,
            Err(e) => {
                warn!("low level port reset failed: {}", e);
                false
            }
        }
    }
}

/// The best reset strategy available on this platform
pub fn default_line_reset() -> Box<dyn LineReset> {
    #[cfg(unix)]
    {
        Box::new(TermiosReset)
    }
    #[cfg(not(unix))]
    {
        Box::new(NoReset)
    }
}

// ============================================================================
// Logged I/O helpers
// ============================================================================

/// Render raw traffic for the serial trace log
pub fn escape_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b' '..=b'~' => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

pub(crate) fn write_logged(port: &mut dyn SerialPort, data: &[u8]) -> io::Result<()> {
    trace!(target: "argentum::serial", "write: {}", escape_bytes(data));
    port.write_all(data)
}

/// Read with a timeout, treating a timeout as zero bytes read
pub(crate) fn read_logged(port: &mut dyn SerialPort, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
    match port.read_timeout(buf, timeout) {
        Ok(n) => {
            if n > 0 {
                trace!(target: "argentum::serial", "read: {}", escape_bytes(&buf[..n]));
            }
            Ok(n)
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
        Err(e) => Err(e),
    }
}

/// Read a single byte, `None` on timeout
pub(crate) fn read_byte(port: &mut dyn SerialPort, timeout: Duration) -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    match read_logged(port, &mut buf, timeout)? {
        0 => Ok(None),
        _ => Ok(Some(buf[0])),
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub use mock::{MockOpener, MockSerialPort, ScriptedReset};


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"ok\r\n"), "ok\\r\\n");
        assert_eq!(escape_bytes(&[0x01, b'A', 0x00]), "\\x01A\\x00");
        assert_eq!(escape_bytes(&[0xff]), "\\xff");
    }

    #[test]
    fn test_read_byte_timeout_is_none() {
        let mut port = MockSerialPort::new(vec![None, Some(b'x')], Vec::new());
        assert_eq!(read_byte(&mut port, Duration::from_millis(5)).unwrap(), None);
        assert_eq!(read_byte(&mut port, Duration::from_millis(5)).unwrap(), Some(b'x'));
    }

    #[test]
    fn test_no_reset_declines() {
        let mut port = MockSerialPort::new(Vec::new(), Vec::new());
        assert!(!NoReset.reset(&mut port));
    }

    #[cfg(unix)]
    #[test]
    fn test_termios_reset_without_descriptor() {
        let mut port = MockSerialPort::new(Vec::new(), Vec::new());
        assert!(!TermiosReset.reset(&mut port));
    }
}
