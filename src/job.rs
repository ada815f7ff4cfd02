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

//! Job-level printer control.
//!
//! The controller owns the connection and tracks what the printer is busy
//! with. Commands that would disturb a running job are refused unless it
//! is idle.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::*;
use crate::status::{self, Position, PrinterOptions};
use crate::transfer::{Progress, TransferOutcome};

/// How often a paused print polls its progress callback
const PAUSED_POLL: Duration = Duration::from_secs(1);

/// Assumed tick count when the program isn't available locally
const DEFAULT_PRINT_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Homing,
    Printing,
    Transferring,
}

/// How a monitored print ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintOutcome {
    Completed,
    /// The printer reported it stopped on its own
    Stopped,
    /// The progress callback asked for a stop
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Lights,
    LeftFan,
    RightFan,
}

impl Output {
    fn channel(self) -> u8 {
        match self {
            Output::Lights => PWM_LIGHTS,
            Output::LeftFan => PWM_LEFT_FAN,
            Output::RightFan => PWM_RIGHT_FAN,
        }
    }
}

pub struct PrinterController {
    conn: Connection,
    state: JobState,
    lights_on: bool,
    left_fan_on: bool,
    right_fan_on: bool,
    /// Unterminated tail of the last monitored output
    monitor_tail: String,
}

impl PrinterController {
    pub fn new(conn: Connection) -> Self {
        PrinterController {
            conn,
            state: JobState::Idle,
            lights_on: false,
            left_fan_on: false,
            right_fan_on: false,
            monitor_tail: String::new(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_output_on(&self, output: Output) -> bool {
        match output {
            Output::Lights => self.lights_on,
            Output::LeftFan => self.left_fan_on,
            Output::RightFan => self.right_fan_on,
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            JobState::Idle => Ok(()),
            busy => Err(Error::Busy(busy)),
        }
    }

    /// Run `f` with the controller marked busy as `state`
    fn busy_with<T>(&mut self, state: JobState, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        self.ensure_idle()?;
        self.state = state;
        let result = f(&mut self.conn);
        self.state = JobState::Idle;
        result
    }

    // ------------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------------

    /// Home both axes; with `wait`, block until the printer reports it
    pub fn home(&mut self, wait: bool) -> Result<()> {
        if !wait {
            self.ensure_idle()?;
            return self.conn.command(CMD_HOME);
        }
        let timeout = self.conn.config.command_timeout;
        self.busy_with(JobState::Homing, |conn| {
            let response = conn.command_wait(CMD_HOME, timeout, Some(HOMED))?;
            if response.iter().any(|line| line.contains(HOMED)) {
                Ok(())
            } else {
                Err(Error::Timeout(timeout))
            }
        })
    }

    /// Relative move on either axis
    pub fn move_axis(&mut self, x: Option<f64>, y: Option<f64>, wait: bool) -> Result<()> {
        self.ensure_idle()?;
        for (axis, steps) in [("X", x), ("Y", y)] {
            let Some(steps) = steps else { continue };
            let command = format!("M {} {}", axis, steps);
            if wait {
                self.conn.command_sync(&command)?;
            } else {
                self.conn.command(&command)?;
            }
        }
        Ok(())
    }

    /// Absolute move, optionally asking the printer to answer `ok` when done
    pub fn move_to(&mut self, x: f64, y: f64, with_ok: bool) -> Result<()> {
        self.ensure_idle()?;
        let (x, y) = (x.trunc() as i64, y.trunc() as i64);
        if with_ok {
            self.conn.command(&format!("M {} {} k", x, y))
        } else {
            self.conn.command(&format!("M {} {}", x, y))
        }
    }

    pub fn calibrate(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.conn.command(CMD_CALIBRATE)
    }

    pub fn motors_on(&mut self) -> Result<()> {
        self.conn.command(CMD_MOTORS_ON)
    }

    pub fn motors_off(&mut self) -> Result<()> {
        self.conn.command(CMD_MOTORS_OFF)
    }

    /// Fire one primitive of one head address
    pub fn fire(&mut self, address: u8, primitive: u8) -> Result<()> {
        self.ensure_idle()?;
        debug!("Firing Command - {} - {}", address, primitive);
        self.conn.command_bytes(&[FIRE_START, address, primitive, FIRE_END])
    }

    // ------------------------------------------------------------------------
    // Job control
    // ------------------------------------------------------------------------

    /// Start printing whatever the printer has loaded.
    ///
    /// The controller stays busy until [`PrinterController::monitor`] sees
    /// the print end, or the job is stopped.
    pub fn start(&mut self) -> Result<()> {
        self.conn.command(CMD_START)?;
        self.begin_print();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.conn.command(CMD_PAUSE)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.conn.command(CMD_RESUME)
    }

    pub fn stop(&mut self) -> Result<()> {
        self.conn.command(CMD_STOP)?;
        self.state = JobState::Idle;
        Ok(())
    }

    /// Drop the link and run a fresh handshake, forgetting any job
    pub fn emergency_stop(&mut self) -> Result<()> {
        self.state = JobState::Idle;
        self.conn.emergency_stop()
    }

    pub fn roller_command(&mut self, command: char) -> Result<()> {
        if !ROLLER_COMMANDS.contains(&command) {
            return Err(Error::InvalidArgument(format!("unknown roller command {:?}", command)));
        }
        self.conn.command(&format!("{} {}", CMD_ROLLER, command))
    }

    fn begin_print(&mut self) {
        self.state = JobState::Printing;
        self.monitor_tail.clear();
    }

    /// Drain unsolicited printer output, going idle once a running print
    /// reports that it finished
    pub fn monitor(&mut self) -> Option<Vec<u8>> {
        let data = self.conn.monitor()?;
        if self.state == JobState::Printing {
            self.monitor_tail.push_str(&String::from_utf8_lossy(&data));
            if self.monitor_tail.contains(PRINT_COMPLETE) || self.monitor_tail.contains(PRINT_STOPPING) {
                info!("print finished");
                self.state = JobState::Idle;
                self.monitor_tail.clear();
            } else if let Some(end) = self.monitor_tail.rfind('\n') {
                self.monitor_tail.drain(..=end);
            }
        }
        Some(data)
    }

    // ------------------------------------------------------------------------
    // Auxiliary outputs
    // ------------------------------------------------------------------------

    pub fn set_output(&mut self, output: Output, on: bool) -> Result<()> {
        self.ensure_idle()?;
        let duty = if on { 255 } else { 0 };
        self.conn.command(&format!("pwm {} {}", output.channel(), duty))?;
        match output {
            Output::Lights => self.lights_on = on,
            Output::LeftFan => self.left_fan_on = on,
            Output::RightFan => self.right_fan_on = on,
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Identity and calibration
    // ------------------------------------------------------------------------

    pub fn set_printer_number(&mut self, number: &str) -> Result<()> {
        self.ensure_idle()?;
        if number.is_empty() || number.contains(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!("bad printer number {:?}", number)));
        }
        self.conn.command(&format!("{} {}", CMD_PRINTER_NUMBER, number))?;
        self.conn.set_printer_number(number);
        Ok(())
    }

    /// Stage new offsets; they persist after [`PrinterController::save_options`]
    pub fn update_options(&mut self, options: &PrinterOptions) -> Result<()> {
        self.ensure_idle()?;
        self.conn.command(&format!(
            "{} po {} {} {}",
            CMD_WRITE_EEPROM, options.horizontal_offset, options.vertical_offset, options.print_overlap
        ))
    }

    pub fn save_options(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.conn.command(CMD_WRITE_EEPROM)
    }

    // ------------------------------------------------------------------------
    // Status, gated on the job state
    // ------------------------------------------------------------------------

    pub fn position(&mut self) -> Result<Option<Position>> {
        if self.state != JobState::Idle {
            return Ok(None);
        }
        self.conn.position()
    }

    pub fn options(&mut self) -> Result<Option<PrinterOptions>> {
        self.ensure_idle()?;
        self.conn.options()
    }

    // ------------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------------

    /// Upload a local file to the printer's card under its base name
    pub fn send_file(
        &mut self,
        path: &Path,
        print_online: bool,
        progress: &mut dyn FnMut(usize, usize) -> Progress,
    ) -> Result<TransferOutcome> {
        self.ensure_idle()?;
        let contents = std::fs::read(path)?;
        let name = status::file_name(path)?;
        self.busy_with(JobState::Transferring, |conn| {
            conn.send(&name, &contents, print_online, progress)
        })
    }

    /// Start printing a file already on the card, without following it
    pub fn print_file(&mut self, name: &str) -> Result<()> {
        self.ensure_idle()?;
        self.conn.command(&format!("{} {}", CMD_START, name))?;
        self.begin_print();
        Ok(())
    }

    /// Print a file from the card and follow its progress ticks.
    ///
    /// `local` is the program on disk, used to count the expected ticks.
    pub fn print_with_progress(
        &mut self,
        name: &str,
        local: Option<&Path>,
        progress: &mut dyn FnMut(usize, usize) -> Progress,
    ) -> Result<PrintOutcome> {
        self.ensure_idle()?;
        let total = match local {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                let lines = count_print_lines(&contents);
                if lines == 0 {
                    return Err(Error::InvalidArgument(format!(
                        "couldn't get number of lines in {}",
                        path.display()
                    )));
                }
                debug!("{} has {} lines.", name, lines);
                lines
            }
            None => DEFAULT_PRINT_LINES,
        };

        let command = format!("{} {}", CMD_START, name);
        self.busy_with(JobState::Printing, |conn| {
            conn.command(&command)?;
            follow_print(conn, total, progress)
        })
    }
}

/// Lines that make the printer emit one progress tick
pub fn count_print_lines(program: &str) -> usize {
    program
        .split('\n')
        .filter(|line| {
            let b = line.as_bytes();
            b.len() > 3 && b[0] == b'M' && b[2] == b'X'
        })
        .count()
}

fn follow_print(
    conn: &mut Connection,
    total: usize,
    progress: &mut dyn FnMut(usize, usize) -> Progress,
) -> Result<PrintOutcome> {
    let print_timeout = conn.config.print_timeout;
    let mut pending = String::new();
    let mut ticks = 0;
    let mut paused = false;

    loop {
        let timeout = if paused { PAUSED_POLL } else { print_timeout };
        let text = conn.wait_for_text(timeout, Some("\n"))?;

        if text.is_empty() {
            if !paused {
                return Err(Error::Timeout(print_timeout));
            }
            match progress(ticks, total) {
                Progress::Pause => {}
                Progress::Continue => {
                    conn.command(CMD_RESUME)?;
                    paused = false;
                }
                Progress::Cancel => {
                    conn.command(CMD_STOP)?;
                    return Ok(PrintOutcome::Cancelled);
                }
            }
            continue;
        }

        pending.push_str(&text);
        while let Some(end) = pending.find('\n') {
            let line: String = pending.drain(..=end).collect();
            let line = line.trim_end_matches('\n');
            let line = line.split('\r').next().unwrap_or_default();

            if line == PRINT_TICK {
                ticks += 1;
                match progress(ticks, total) {
                    Progress::Continue if paused => {
                        conn.command(CMD_RESUME)?;
                        paused = false;
                    }
                    Progress::Continue => {}
                    Progress::Pause if !paused => {
                        conn.command(CMD_PAUSE)?;
                        paused = true;
                    }
                    Progress::Pause => {}
                    Progress::Cancel => {
                        conn.command(CMD_STOP)?;
                        return Ok(PrintOutcome::Cancelled);
                    }
                }
            }
            if line.contains(PRINT_COMPLETE) {
                info!("print complete");
                return Ok(PrintOutcome::Completed);
            }
            if line.contains(PRINT_STOPPING) {
                info!("printer stopped");
                return Ok(PrintOutcome::Stopped);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
