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

//! Engine tuning knobs

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub baud_rate: u32,
    pub handshake: HandshakeConfig,
    pub transfer: TransferConfig,
    /// Used by waiting commands that don't name their own timeout
    pub command_timeout: Duration,
    /// Longest silence tolerated between progress ticks while printing
    pub print_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// First wait for the boot banner, and the inter-byte gap afterwards
    pub short_timeout: Duration,
    /// Single escalated wait when the first one stays silent
    pub long_timeout: Duration,
    pub banner_cap: usize,
    pub min_banner: usize,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub negotiate_timeout: Duration,
    pub ack_timeout: Duration,
    pub pause_ack_timeout: Duration,
    /// Failures beyond this count abort the transfer
    pub max_failures: u32,
    /// Consecutive empty acknowledgment waits before giving up
    pub max_silent_acks: u32,
    /// Extra bytes read after an unexpected acknowledgment byte
    pub burst_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            baud_rate: 115200,
            handshake: HandshakeConfig::default(),
            transfer: TransferConfig::default(),
            command_timeout: Duration::from_secs(30),
            print_timeout: Duration::from_secs(120),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            short_timeout: Duration::from_secs(1),
            long_timeout: Duration::from_secs(10),
            banner_cap: 80,
            min_banner: 8,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            negotiate_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(1),
            pause_ack_timeout: Duration::from_secs(10),
            max_failures: 12,
            max_silent_acks: 30,
            burst_len: 79,
        }
    }
}
