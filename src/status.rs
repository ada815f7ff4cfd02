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

//! Typed views of the firmware's text reports.
//!
//! Reports are free-form text located by fixed markers. Every parser here
//! either yields a complete value or names the first field it couldn't find.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use crate::channel::Response;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::*;
use crate::transfer::djb2;

const POSITION_TIMEOUT: Duration = Duration::from_millis(100);
const QUERY_TIMEOUT: Duration = Duration::from_secs(1);
const LIST_TIMEOUT: Duration = Duration::from_secs(2);
const DJB2_TIMEOUT: Duration = Duration::from_secs(30);

/// A report lacked a required marker, or its value didn't parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("report field {0:?} missing")]
pub struct MissingField(pub &'static str);

// ============================================================================
// Tokenizer
// ============================================================================

/// Forward-only cursor over one report
pub struct ReportScanner<'r> {
    text: &'r str,
    rest: &'r str,
}

impl<'r> ReportScanner<'r> {
    pub fn new(text: &'r str) -> Self {
        ReportScanner { text, rest: text }
    }

    /// Fail unless `marker` occurs anywhere in the report
    pub fn require(&self, marker: &'static str) -> std::result::Result<(), MissingField> {
        if self.text.contains(marker) {
            Ok(())
        } else {
            Err(MissingField(marker))
        }
    }

    /// Move the cursor just past the next `marker`
    pub fn seek(&mut self, marker: &'static str) -> std::result::Result<(), MissingField> {
        let idx = self.rest.find(marker).ok_or(MissingField(marker))?;
        self.rest = &self.rest[idx + marker.len()..];
        Ok(())
    }

    /// Text up to the next `terminator`; the cursor ends up past it
    pub fn until(&mut self, terminator: &'static str) -> std::result::Result<&'r str, MissingField> {
        let idx = self.rest.find(terminator).ok_or(MissingField(terminator))?;
        let value = &self.rest[..idx];
        self.rest = &self.rest[idx + terminator.len()..];
        Ok(value)
    }

    /// Parse the text up to `terminator`
    pub fn value<T: FromStr>(&mut self, field: &'static str, terminator: &'static str) -> std::result::Result<T, MissingField> {
        self.until(terminator)?.trim().parse().map_err(|_| MissingField(field))
    }

    /// Leading decimal digits at the cursor, after any blanks
    pub fn digits(&mut self, field: &'static str) -> std::result::Result<u32, MissingField> {
        let rest = self.rest.trim_start();
        let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        self.rest = &rest[end..];
        rest[..end].parse().map_err(|_| MissingField(field))
    }

    /// Digits following `marker` anywhere in the report, if it is present
    pub fn optional_digits(&self, marker: &'static str) -> Option<u32> {
        let mut scanner = ReportScanner::new(self.text);
        scanner.seek(marker).ok()?;
        scanner.digits(marker).ok()
    }
}

// ============================================================================
// Report Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x_mm: f64,
    pub y_mm: f64,
    pub x_steps: i64,
    pub y_steps: i64,
}

/// Calibration values stored in the printer's EEPROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterOptions {
    pub horizontal_offset: i32,
    pub vertical_offset: i32,
    pub print_overlap: u32,
    pub dilate_count: u32,
    pub x_speed: u32,
    pub y_speed: u32,
    pub x_acceleration: bool,
    pub y_acceleration: bool,
}

impl Default for PrinterOptions {
    fn default() -> Self {
        PrinterOptions {
            horizontal_offset: 0,
            vertical_offset: 0,
            print_overlap: 0,
            dilate_count: 0,
            x_speed: 1500,
            y_speed: 1500,
            x_acceleration: true,
            y_acceleration: true,
        }
    }
}

const HORIZONTAL_OFFSET: &str = "horizontal_offset:";
const VERTICAL_OFFSET: &str = "vertical_offset:";
const PRINT_OVERLAP: &str = "print_overlap:";
const CRC: &str = "CRC:";

// ============================================================================
// Parsers
// ============================================================================

/// `+X: <mm> mm, Y: <mm> mm` followed by the same in steps
pub fn parse_position(report: &str) -> std::result::Result<Position, MissingField> {
    let mut scanner = ReportScanner::new(report);
    scanner.seek("+X: ")?;
    let x_mm = scanner.value("x mm", " mm")?;
    scanner.seek(", Y: ")?;
    let y_mm = scanner.value("y mm", " mm")?;
    scanner.seek("+X: ")?;
    let x_steps = scanner.value("x steps", " steps")?;
    scanner.seek(", Y: ")?;
    let y_steps = scanner.value("y steps", " steps")?;
    Ok(Position { x_mm, y_mm, x_steps, y_steps })
}

pub fn parse_voltage(response: &Response) -> std::result::Result<f64, MissingField> {
    let line = response
        .iter()
        .find(|line| line.contains(':') && line.contains("volts."))
        .ok_or(MissingField("volts."))?;
    let mut scanner = ReportScanner::new(line);
    scanner.seek(": ")?;
    scanner.value("voltage", " volts")
}

pub fn parse_printer_number(report: &str) -> std::result::Result<String, MissingField> {
    let mut scanner = ReportScanner::new(report);
    scanner.seek(PRINTER_NUMBER_MARKER)?;
    Ok(scanner.until(MARKER_END)?.to_string())
}

/// The EEPROM dump is only trusted when all four required fields are present
pub fn parse_options(report: &str) -> std::result::Result<PrinterOptions, MissingField> {
    let mut scanner = ReportScanner::new(report);
    for marker in [HORIZONTAL_OFFSET, VERTICAL_OFFSET, PRINT_OVERLAP, CRC] {
        scanner.require(marker)?;
    }

    scanner.seek(HORIZONTAL_OFFSET)?;
    let horizontal_offset = scanner.value("horizontal_offset", VERTICAL_OFFSET)?;
    let vertical_offset = scanner.value("vertical_offset", PRINT_OVERLAP)?;
    let print_overlap = scanner.digits("print_overlap")?;

    let defaults = PrinterOptions::default();
    let flag = |marker: &'static str, default: bool| scanner.optional_digits(marker).map_or(default, |v| v != 0);
    Ok(PrinterOptions {
        horizontal_offset,
        vertical_offset,
        print_overlap,
        dilate_count: scanner.optional_digits("dilate_count:").unwrap_or(defaults.dilate_count),
        x_speed: scanner.optional_digits("x_speed:").unwrap_or(defaults.x_speed),
        y_speed: scanner.optional_digits("y_speed:").unwrap_or(defaults.y_speed),
        x_acceleration: flag("x_acc:", defaults.x_acceleration),
        y_acceleration: flag("y_acc:", defaults.y_acceleration),
    })
}

/// Hash the printer should report for `contents`.
///
/// Generated programs carry it precomputed as a `# xxxxxxxx` first line.
pub fn local_djb2(contents: &[u8]) -> String {
    if contents.len() > 10 && contents.starts_with(b"# ") && contents[10] == b'\n' {
        if let Ok(header) = std::str::from_utf8(&contents[2..10]) {
            return header.to_string();
        }
    }
    format!("{:08x}", djb2(contents))
}

/// Base name of `path`, the name the printer's card knows it by
pub fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidArgument(format!("no file name in {}", path.display())))
}

// ============================================================================
// Queries
// ============================================================================

impl Connection {
    /// Current head position, `None` while the port is busy or the report is incomplete
    pub fn position(&mut self) -> Result<Option<Position>> {
        if !self.monitor_enabled() || self.is_blocking() {
            return Ok(None);
        }
        self.command(CMD_POSITION)?;
        let response = self.wait_for_response(POSITION_TIMEOUT, None)?;
        Ok(parsed(parse_position(&response.joined())))
    }

    pub fn voltage(&mut self) -> Result<Option<f64>> {
        let response = self.command_wait(CMD_VOLTAGE, QUERY_TIMEOUT, Some("\n"))?;
        Ok(parsed(parse_voltage(&response)))
    }

    /// Ask the printer for its identity, refreshing the cached value
    pub fn query_printer_number(&mut self) -> Result<Option<String>> {
        let response = self.command_wait(CMD_PRINTER_NUMBER, QUERY_TIMEOUT, Some(MARKER_END))?;
        let number = parsed(parse_printer_number(&response.joined()));
        if let Some(number) = &number {
            self.set_printer_number(number);
        }
        Ok(number)
    }

    pub fn options(&mut self) -> Result<Option<PrinterOptions>> {
        let response = self.command_wait(CMD_EEPROM, QUERY_TIMEOUT, Some(MARKER_END))?;
        Ok(parsed(parse_options(&response.joined())))
    }

    /// True once both limit switches report home
    pub fn is_homed(&mut self) -> Result<bool> {
        self.command(CMD_LIMITS)?;
        let response = self.wait_for_response(QUERY_TIMEOUT, None)?;
        Ok(response.iter().any(|line| line == LIMITS_HOMED))
    }

    /// Names from `files` that aren't on the printer's card
    pub fn missing_files<S: AsRef<str>>(&mut self, files: &[S]) -> Result<Vec<String>> {
        self.command(CMD_LIST)?;
        let response = self.wait_for_response(LIST_TIMEOUT, None)?;
        let listed: Vec<String> = response.iter().map(str::to_lowercase).collect();

        Ok(files
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| !listed.contains(&format!("+{}", name).to_lowercase()))
            .map(str::to_string)
            .collect())
    }

    /// Compare a local file with the copy on the printer's card
    pub fn check_djb2(&mut self, path: &Path) -> Result<bool> {
        let contents = std::fs::read(path)?;
        let expected = local_djb2(&contents);
        let name = file_name(path)?;
        debug!("asking printer for {} with djb2 {}.", name, expected);

        let command = format!("{} {}", CMD_DJB2, name);
        let response = self.command_wait(&command, DJB2_TIMEOUT, Some("\n"))?;
        for line in response.iter() {
            if line.len() == 8 {
                debug!("printer has {}", line);
            }
            if line == expected {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn parsed<T>(result: std::result::Result<T, MissingField>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("{}", e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
