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

//! Newline-delimited commands and timeout-bounded response collection.
//!
//! The firmware has no response framing. A waiting command keeps reading
//! until the expected substring shows up or a read times out empty.

use std::time::{Duration, Instant};
use tracing::debug;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::DELIMITER;
use crate::serial::{self, SerialPort};

/// Lines produced by one command, carriage returns stripped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub lines: Vec<String>,
}

impl Response {
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .split('\n')
            .map(|line| match line.find('\r') {
                Some(cr) => line[..cr].to_string(),
                None => line.to_string(),
            })
            .collect();
        Response { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All lines concatenated, the way marker scanners want them
    pub fn joined(&self) -> String {
        self.lines.concat()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

impl Connection {
    pub(crate) fn port_mut(&mut self) -> Result<&mut dyn SerialPort> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        match self.port.as_mut() {
            Some(port) => Ok(port.as_mut()),
            None => Err(Error::NotConnected),
        }
    }

    /// Send one command line without waiting for anything
    pub fn command(&mut self, command: &str) -> Result<()> {
        self.command_bytes(command.as_bytes())
    }

    pub(crate) fn command_bytes(&mut self, command: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        let mut line = command.to_vec();
        line.extend_from_slice(DELIMITER.as_bytes());
        serial::write_logged(port, &line)?;
        self.last_command = Some(Instant::now());
        Ok(())
    }

    /// Send a command and collect its response.
    ///
    /// `expect` defaults to the command text itself, since the firmware echoes.
    pub fn command_wait(&mut self, command: &str, timeout: Duration, expect: Option<&str>) -> Result<Response> {
        self.command(command)?;
        self.wait_for_response(timeout, Some(expect.unwrap_or(command)))
    }

    /// Like [`Connection::command_wait`] with the default command timeout
    pub fn command_sync(&mut self, command: &str) -> Result<Response> {
        let timeout = self.config.command_timeout;
        self.command_wait(command, timeout, None)
    }

    pub fn wait_for_response(&mut self, timeout: Duration, expect: Option<&str>) -> Result<Response> {
        let text = self.wait_for_text(timeout, expect)?;
        if text.is_empty() {
            return Ok(Response::default());
        }
        Ok(Response::from_text(&text))
    }

    /// Accumulate text until `expect` appears or a read of `timeout` comes back empty
    pub fn wait_for_text(&mut self, timeout: Duration, expect: Option<&str>) -> Result<String> {
        self.blocking = true;
        let result = self.collect_text(timeout, expect);
        self.blocking = false;
        result
    }

    fn collect_text(&mut self, timeout: Duration, expect: Option<&str>) -> Result<String> {
        let port = self.port_mut()?;
        let mut raw = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let n = serial::read_logged(port, &mut buf, timeout)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            if let Some(expect) = expect {
                if String::from_utf8_lossy(&raw).contains(expect) {
                    break;
                }
            }
        }

        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Drain unsolicited output without blocking.
    ///
    /// Returns `None` when there is nothing to read or polling isn't allowed
    /// right now.
    pub fn monitor(&mut self) -> Option<Vec<u8>> {
        if !self.monitor_enabled() || self.blocking {
            return None;
        }
        let port = self.port_mut().ok()?;
        let result = drain_pending(port);

        match result {
            Ok(data) => data,
            Err(e) => {
                debug!("monitor exception: {}", e);
                None
            }
        }
    }
}

fn drain_pending(port: &mut dyn SerialPort) -> std::io::Result<Option<Vec<u8>>> {
    let waiting = port.bytes_to_read()?;
    if waiting == 0 {
        return Ok(None);
    }
    let mut data = vec![0u8; waiting];
    let n = serial::read_logged(port, &mut data, Duration::ZERO)?;
    data.truncate(n);
    Ok(if data.is_empty() { None } else { Some(data) })
}
