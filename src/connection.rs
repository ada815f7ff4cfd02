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

//! Port ownership and the boot banner handshake

use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::config::{Config, HandshakeConfig};
use crate::error::{ConnectError, Error, Result};
use crate::protocol::*;
use crate::serial::{self, LineReset, PortOpener, SerialPort};
use crate::version::FirmwareVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Connected,
}

/// What the boot banner told us about the printer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BannerInfo {
    pub printer_number: Option<String>,
    pub version: Option<FirmwareVersion>,
    /// Lines printed before the identity marker
    pub diagnostics: Vec<String>,
}

/// One printer, reached through one serial port
pub struct Connection {
    opener: Box<dyn PortOpener>,
    line_reset: Box<dyn LineReset>,
    pub(crate) config: Config,
    pub(crate) port: Option<Box<dyn SerialPort>>,
    port_name: Option<String>,
    state: ConnectionState,
    pub(crate) blocking: bool,
    banner: BannerInfo,
    last_error: Option<String>,
    monitor_enabled: bool,
    pub(crate) last_command: Option<Instant>,
}

impl Connection {
    pub fn new(opener: Box<dyn PortOpener>, line_reset: Box<dyn LineReset>, config: Config) -> Self {
        Connection {
            opener,
            line_reset,
            config,
            port: None,
            port_name: None,
            state: ConnectionState::Disconnected,
            blocking: false,
            banner: BannerInfo::default(),
            last_error: None,
            monitor_enabled: true,
            last_command: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.port.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// True while a command or transfer is waiting on the port
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn version(&self) -> Option<&FirmwareVersion> {
        self.banner.version.as_ref()
    }

    pub fn printer_number(&self) -> Option<&str> {
        self.banner.printer_number.as_deref()
    }

    pub(crate) fn set_printer_number(&mut self, number: &str) {
        self.banner.printer_number = Some(number.to_string());
    }

    pub fn boot_diagnostics(&self) -> &[String] {
        &self.banner.diagnostics
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn monitor_enabled(&self) -> bool {
        self.monitor_enabled
    }

    pub fn set_monitor_enabled(&mut self, enabled: bool) {
        self.monitor_enabled = enabled;
    }

    pub fn time_since_last_command(&self) -> Option<Duration> {
        self.last_command.map(|t| t.elapsed())
    }

    /// Open `port_name` (or the previously used port) and run the handshake
    pub fn connect(&mut self, port_name: Option<&str>) -> Result<()> {
        if let Some(name) = port_name {
            self.port_name = Some(name.to_string());
        }
        let Some(name) = self.port_name.clone() else {
            return Err(Error::InvalidArgument("no port given".to_string()));
        };

        self.port = None;
        self.banner = BannerInfo::default();
        self.state = ConnectionState::Handshaking;

        match self.handshake(&name) {
            Ok((port, banner)) => {
                if let Some(number) = &banner.printer_number {
                    info!("Printer number: {}", number);
                }
                match &banner.version {
                    Some(version) => info!("Printer is running version: {}", version),
                    None => warn!("Printer firmware version unknown"),
                }
                self.port = Some(port);
                self.banner = banner;
                self.blocking = false;
                self.last_error = None;
                self.state = ConnectionState::Connected;
                debug!("Printer looks okay.");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.port = None;
        self.banner = BannerInfo::default();
        self.blocking = false;
        self.state = ConnectionState::Disconnected;
    }

    /// Drop the port and run a fresh handshake on the same device
    pub fn reconnect(&mut self) -> Result<()> {
        self.disconnect();
        self.connect(None)
    }

    /// Unconditional reset; any in-flight operation must already be abandoned
    pub fn emergency_stop(&mut self) -> Result<()> {
        warn!("emergency stop");
        self.reconnect()
    }

    fn handshake(&mut self, name: &str) -> std::result::Result<(Box<dyn SerialPort>, BannerInfo), ConnectError> {
        let hs = self.config.handshake.clone();

        // Throw away whatever a previous session left in the driver
        let mut stale = self.opener.open(name, Duration::ZERO)?;
        stale.clear_input()?;
        drop(stale);
        let mut port = self.opener.open(name, hs.short_timeout)?;

        debug!("Waiting for printer response.");
        let mut first = serial::read_byte(port.as_mut(), hs.short_timeout)?;
        if first.is_none() {
            debug!("No first char.");
            first = serial::read_byte(port.as_mut(), hs.long_timeout)?;
        }
        let Some(mut first) = first else {
            debug!("No response.");
            return Err(ConnectError::NoResponse);
        };

        if !is_banner_byte(first) {
            debug!("Trying port reset.");
            if !self.line_reset.reset(port.as_mut()) {
                debug!("Reset port not possible.");
                return Err(ConnectError::PortNeedsReset);
            }
            drop(port);
            port = self.opener.open(name, hs.short_timeout)?;
            match serial::read_byte(port.as_mut(), hs.short_timeout)? {
                Some(b) if is_banner_byte(b) => first = b,
                _ => {
                    debug!("Reset port failed.");
                    return Err(ConnectError::PortNeedsReset);
                }
            }
            debug!("Reset port okay!");
        }

        let banner = read_banner(port.as_mut(), first, &hs)?;
        if banner.len() < hs.min_banner {
            debug!("Response is too short.");
            return Err(ConnectError::NoResponse);
        }

        let text = String::from_utf8_lossy(&banner);
        debug!("Boot banner: {:?}", text);
        Ok((port, parse_banner(&text)))
    }
}

/// First banner byte must be printable text or a control character from TAB up
fn is_banner_byte(b: u8) -> bool {
    (9..=126).contains(&b)
}

/// Drain the rest of the banner until the line goes quiet or the cap is hit
fn read_banner(port: &mut dyn SerialPort, first: u8, hs: &HandshakeConfig) -> std::result::Result<Vec<u8>, ConnectError> {
    let mut banner = vec![first];
    let mut buf = [0u8; 128];

    while banner.len() < hs.banner_cap {
        let room = hs.banner_cap - banner.len();
        let waiting = port.bytes_to_read()?.min(room);
        if waiting > 0 {
            let take = waiting.min(buf.len());
            let n = serial::read_logged(port, &mut buf[..take], hs.short_timeout)?;
            if n == 0 {
                break;
            }
            banner.extend_from_slice(&buf[..n]);
            continue;
        }
        match serial::read_byte(port, hs.short_timeout)? {
            Some(b) => banner.push(b),
            None => break,
        }
    }

    Ok(banner)
}

/// Pull the identity and version markers out of a boot banner
pub fn parse_banner(text: &str) -> BannerInfo {
    let mut info = BannerInfo::default();

    if let Some(at) = text.find(PRINTER_NUMBER_MARKER) {
        if at != 0 {
            info.diagnostics = text[..at].split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect();
        }
        info.printer_number = bracketed(&text[at + PRINTER_NUMBER_MARKER.len()..]);
    }

    info.version = match text.find(VERSION_MARKER) {
        Some(at) => bracketed(&text[at + VERSION_MARKER.len()..]).and_then(|v| FirmwareVersion::parse(&v)),
        None => {
            debug!("legacy firmware banner");
            FirmwareVersion::from_legacy_banner(text)
        }
    };

    info
}

fn bracketed(rest: &str) -> Option<String> {
    rest.find(MARKER_END).map(|end| rest[..end].to_string())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{MockOpener, MockSerialPort, ScriptedReset};

    const BANNER: &str = "+Printer Number [AG0042]\r\n+Version [0.11.2-rc1+deadbeef]\r\n";

    fn connection(ports: Vec<MockSerialPort>, reset: bool) -> Connection {
        Connection::new(Box::new(MockOpener::new(ports)), Box::new(ScriptedReset(reset)), Config::default())
    }

    fn banner_port(text: &str) -> MockSerialPort {
        MockSerialPort::with_text(&[text], "")
    }

    #[test]
    fn test_parse_banner_modern() {
        let info = parse_banner(BANNER);
        assert_eq!(info.printer_number.as_deref(), Some("AG0042"));
        let version = info.version.unwrap();
        assert_eq!(version.to_string(), "0.11.2-rc1+deadbeef");
        assert!(info.diagnostics.is_empty());
    }

    #[test]
    fn test_parse_banner_collects_diagnostics() {
        let info = parse_banner("SD init failed\r\nusing defaults\r\n+Printer Number [7]\r\n");
        assert_eq!(info.printer_number.as_deref(), Some("7"));
        assert_eq!(info.diagnostics, vec!["SD init failed", "using defaults", ""]);
        assert_eq!(info.version, None);
    }

    #[test]
    fn test_parse_banner_bad_version_is_ignored() {
        let info = parse_banner("+Printer Number [1]\n+Version [1.2.3+short]\n");
        assert_eq!(info.printer_number.as_deref(), Some("1"));
        assert_eq!(info.version, None);
    }

    #[test]
    fn test_connect_modern_banner() {
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), banner_port(BANNER)], false);
        conn.connect(Some("/dev/ttyACM0")).unwrap();

        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.is_connected());
        assert!(!conn.is_blocking());
        assert_eq!(conn.printer_number(), Some("AG0042"));
        assert_eq!(conn.version().unwrap().patch, 2);
        assert_eq!(conn.last_error(), None);
    }

    #[test]
    fn test_connect_legacy_banner() {
        let mut conn = connection(
            vec![MockSerialPort::new(Vec::new(), Vec::new()), banner_port("Argentum 0.0.9+20140624\r\n")],
            false,
        );
        conn.connect(Some("COM3")).unwrap();
        let version = conn.version().unwrap();
        assert_eq!((version.major, version.minor, version.patch), (0, 0, 9));
        assert_eq!(conn.printer_number(), None);
    }

    #[test]
    fn test_connect_reopens_with_short_timeout() {
        let opener = MockOpener::new(vec![MockSerialPort::new(Vec::new(), Vec::new()), banner_port(BANNER)]);
        let log = opener.open_log();
        let mut conn = Connection::new(Box::new(opener), Box::new(ScriptedReset(false)), Config::default());
        conn.connect(Some("/dev/ttyUSB0")).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], ("/dev/ttyUSB0".to_string(), Duration::ZERO));
        assert_eq!(log[1], ("/dev/ttyUSB0".to_string(), Duration::from_secs(1)));
    }

    #[test]
    fn test_connect_silent_device_fails_with_no_response() {
        let silent = MockSerialPort::new(vec![None, None], Vec::new());
        let timeouts = silent.timeout_log();
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), silent], false);

        let err = conn.connect(Some("/dev/ttyUSB0")).unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::NoResponse)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.last_error().unwrap().contains("didn't respond"));

        let hs = HandshakeConfig::default();
        let waited: Duration = timeouts.lock().unwrap().iter().sum();
        assert_eq!(waited, hs.short_timeout + hs.long_timeout);
    }

    #[test]
    fn test_connect_escalates_once() {
        let mut responses = vec![None];
        responses.extend(BANNER.bytes().map(Some));
        responses.push(None);
        let slow = MockSerialPort::new(responses, Vec::new());
        let timeouts = slow.timeout_log();
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), slow], false);

        conn.connect(Some("/dev/ttyUSB0")).unwrap();
        let timeouts = timeouts.lock().unwrap();
        assert_eq!(timeouts[0], Duration::from_secs(1));
        assert_eq!(timeouts[1], Duration::from_secs(10));
    }

    #[test]
    fn test_connect_short_banner() {
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), banner_port("ok\r\n")], false);
        let err = conn.connect(Some("/dev/ttyUSB0")).unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::NoResponse)));
    }

    #[test]
    fn test_connect_garbage_without_reset() {
        let garbage = MockSerialPort::new(vec![Some(0xfe)], Vec::new());
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), garbage], false);
        let err = conn.connect(Some("/dev/ttyUSB0")).unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::PortNeedsReset)));
        assert_eq!(conn.last_error(), Some("Port needs reset."));
    }

    #[test]
    fn test_connect_garbage_recovers_after_reset() {
        let garbage = MockSerialPort::new(vec![Some(0x00)], Vec::new());
        let mut conn = connection(
            vec![MockSerialPort::new(Vec::new(), Vec::new()), garbage, banner_port(BANNER)],
            true,
        );
        conn.connect(Some("/dev/ttyUSB0")).unwrap();
        assert_eq!(conn.printer_number(), Some("AG0042"));
    }

    #[test]
    fn test_connect_garbage_persists_after_reset() {
        let garbage = MockSerialPort::new(vec![Some(0x80)], Vec::new());
        let still_garbage = MockSerialPort::new(vec![Some(0x7f)], Vec::new());
        let mut conn = connection(
            vec![MockSerialPort::new(Vec::new(), Vec::new()), garbage, still_garbage],
            true,
        );
        let err = conn.connect(Some("/dev/ttyUSB0")).unwrap_err();
        assert!(matches!(err, Error::Connect(ConnectError::PortNeedsReset)));
    }

    #[test]
    fn test_banner_is_capped() {
        let long = "x".repeat(100);
        let mut responses: Vec<Option<u8>> = long.bytes().map(Some).collect();
        responses.truncate(80);
        let port = MockSerialPort::new(responses, Vec::new());
        let mut boxed: Box<dyn SerialPort> = Box::new(port);
        let mut first = [0u8; 1];
        boxed.read_timeout(&mut first, Duration::ZERO).unwrap();
        let banner = read_banner(boxed.as_mut(), first[0], &HandshakeConfig::default()).unwrap();
        assert_eq!(banner.len(), 80);
    }

    #[test]
    fn test_disconnect_resets_identity() {
        let mut conn = connection(vec![MockSerialPort::new(Vec::new(), Vec::new()), banner_port(BANNER)], false);
        conn.connect(Some("/dev/ttyUSB0")).unwrap();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.version(), None);
        assert_eq!(conn.printer_number(), None);
        assert_eq!(conn.port_name(), Some("/dev/ttyUSB0"));
    }

    #[test]
    fn test_connect_without_port_name() {
        let mut conn = connection(Vec::new(), false);
        assert!(matches!(conn.connect(None), Err(Error::InvalidArgument(_))));
    }
}
