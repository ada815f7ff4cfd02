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

//! Argentum firmware protocol constants

/// Terminates every command line
pub const DELIMITER: &str = "\n";

// ----------------------------------------------------------------------------
// Transfer sub-protocol control bytes
// ----------------------------------------------------------------------------

/// Good - receiver accepted the block checksum
pub const GOOD: u8 = b'G';

/// Bad - receiver rejected the block checksum, retransmit
pub const BAD: u8 = b'B';

/// Cancel - sender abandons the transfer
pub const CANCEL: u8 = b'C';

/// Pause - sender holds the transfer
pub const PAUSE: u8 = b'P';

/// Pause acknowledge - receiver confirms the hold
pub const PAUSE_ACK: u8 = b'p';

/// Largest payload carried by one transfer block
pub const BLOCK_SIZE: usize = 1024;

/// Length of the checksum suffix appended to each block
pub const SUFFIX_LEN: usize = 5;

/// Seed of the rolling block hash
pub const HASH_SEED: u32 = 5381;

/// Receiver's reply to a successful `recv` negotiation
pub const READY: &str = "Ready";

/// Receiver diagnostic that aborts the transfer
pub const RECV_ERROR: &str = "Errorecv";

// ----------------------------------------------------------------------------
// Fire primitive framing
// ----------------------------------------------------------------------------

/// Starts a binary fire packet
pub const FIRE_START: u8 = 0x01;

/// Ends a binary fire packet
pub const FIRE_END: u8 = 0x00;

// ----------------------------------------------------------------------------
// Boot banner and report markers
// ----------------------------------------------------------------------------

pub const PRINTER_NUMBER_MARKER: &str = "+Printer Number [";
pub const VERSION_MARKER: &str = "+Version [";
pub const MARKER_END: &str = "]";

/// Year prefixes that anchor the version token of legacy firmware
pub const LEGACY_YEAR_ANCHORS: [&str; 2] = ["+2014", "+2015"];

pub const HOMED: &str = "+Homed";
pub const LIMITS_HOMED: &str = "+Limits: X- Y- ";
pub const PRINT_COMPLETE: &str = "Print complete";
pub const PRINT_STOPPING: &str = "Stopping";
pub const PRINT_TICK: &str = ".";

// ----------------------------------------------------------------------------
// Command vocabulary
// ----------------------------------------------------------------------------

pub const CMD_HOME: &str = "home";
pub const CMD_CALIBRATE: &str = "c";
pub const CMD_START: &str = "p";
pub const CMD_PAUSE: &str = "P";
pub const CMD_RESUME: &str = "R";
pub const CMD_STOP: &str = "S";
pub const CMD_LIMITS: &str = "lim";
pub const CMD_MOTORS_ON: &str = "+";
pub const CMD_MOTORS_OFF: &str = "-";
pub const CMD_POSITION: &str = "pos";
pub const CMD_VOLTAGE: &str = "volt";
pub const CMD_PRINTER_NUMBER: &str = "pnum";
pub const CMD_EEPROM: &str = "?eeprom";
pub const CMD_WRITE_EEPROM: &str = "!write";
pub const CMD_LIST: &str = "ls";
pub const CMD_DJB2: &str = "djb2";
pub const CMD_RECV: &str = "recv";
pub const CMD_ROLLER: &str = "l";

/// PWM channels driving the auxiliary outputs
pub const PWM_LIGHTS: u8 = 8;
pub const PWM_LEFT_FAN: u8 = 7;
pub const PWM_RIGHT_FAN: u8 = 9;

/// Single-character roller commands the firmware accepts
pub const ROLLER_COMMANDS: [char; 8] = ['e', 'E', '+', '-', 'r', 'd', 'R', 'D'];
