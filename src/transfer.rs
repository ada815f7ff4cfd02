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

use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::compress;
use crate::config::TransferConfig;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::protocol::*;
use crate::serial::{self, SerialPort};

// ============================================================================
// Rolling Hash
// ============================================================================

/// Multiply-by-33 hash threaded across every block of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingHash(u32);

impl RollingHash {
    pub fn new() -> Self {
        RollingHash(HASH_SEED)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Bytes are added as signed values, like the firmware's `char`
    pub fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.0 = self.0.wrapping_mul(33).wrapping_add(b as i8 as u32);
        }
    }

    /// 7/7/7/7/4-bit fields, low bits first
    pub fn suffix(&self) -> [u8; SUFFIX_LEN] {
        let h = self.0;
        [
            (h & 0x7f) as u8,
            ((h >> 7) & 0x7f) as u8,
            ((h >> 14) & 0x7f) as u8,
            ((h >> 21) & 0x7f) as u8,
            ((h >> 28) & 0x0f) as u8,
        ]
    }
}

impl Default for RollingHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash of a whole file, as reported by the firmware's `djb2` command
pub fn djb2(data: &[u8]) -> u32 {
    let mut hash = RollingHash::new();
    hash.update(data);
    hash.value()
}

// ============================================================================
// Callbacks and Outcomes
// ============================================================================

/// What the progress callback wants the transfer to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Continue,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Cancelled,
}

/// Build the `recv` negotiation line
pub fn recv_command(size: usize, name: &str, compressed: bool, print_online: bool) -> String {
    match (compressed, print_online) {
        (false, false) => format!("{} {} {}", CMD_RECV, size, name),
        (false, true) => format!("{} {} o {}", CMD_RECV, size, name),
        (true, false) => format!("{} {} b {}", CMD_RECV, size, name),
        (true, true) => format!("{} {} bo {}", CMD_RECV, size, name),
    }
}

impl Connection {
    /// Upload `contents` to the printer's card as `name`.
    ///
    /// Print programs are compressed when that pays off (or always, when
    /// printing while receiving); anything the compressor rejects is sent
    /// verbatim.
    pub fn send(
        &mut self,
        name: &str,
        contents: &[u8],
        print_online: bool,
        progress: &mut dyn FnMut(usize, usize) -> Progress,
    ) -> Result<TransferOutcome> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Error::InvalidArgument(format!("bad file name {:?}", name)));
        }
        let start = Instant::now();

        let (payload, compressed) = match compress::compress_bytes(contents) {
            Ok(packed) if print_online || packed.len() * 3 < contents.len() => {
                debug!("compression rate {:.2} to 1", contents.len() as f64 / packed.len() as f64);
                (packed.into_bytes(), true)
            }
            Ok(_) => (contents.to_vec(), false),
            Err(e) => {
                warn!("not compressing {}: {}", name, e);
                (contents.to_vec(), false)
            }
        };

        let config = self.config.transfer.clone();
        self.port_mut()?.clear_input()?;
        let command = recv_command(payload.len(), name, compressed, print_online);
        // The line terminator must be consumed here or it lands in the ack stream
        let response = self.command_wait(&command, config.negotiate_timeout, Some("\n"))?;
        if response.is_empty() {
            debug!("no response to recv");
            return Err(Error::Timeout(config.negotiate_timeout));
        }
        if !response.iter().any(|line| line == READY) {
            debug!("Didn't get Ready, got: {:?}", response.lines);
            return Err(Error::NotReady(response.lines));
        }

        info!("sending {} bytes.", payload.len());
        self.blocking = true;
        let result = match self.port_mut() {
            Ok(port) => run(TransferFsm::<CheckPause>::new(port, progress, &config, payload)),
            Err(e) => Err(e),
        };
        self.blocking = false;

        if let Ok(TransferOutcome::Completed) = result {
            info!("Sent in {:.1} seconds.", start.elapsed().as_secs_f64());
        }
        result
    }
}

// ============================================================================
// States
// ============================================================================

pub struct CheckPause;
pub struct TransmitBlock;
pub struct AwaitAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct TransferFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialPort,
    progress: &'a mut dyn FnMut(usize, usize) -> Progress,
    config: &'a TransferConfig,
    payload: Vec<u8>,
    pos: usize,
    hash: RollingHash,
    block_hash: RollingHash,
    block_len: usize,
    failures: u32,
    silent_acks: u32,
    paused: bool,
}

pub enum Step<'a> {
    Next(Box<dyn TransferState<'a> + 'a>),
    Done(TransferOutcome),
}

// ============================================================================
// Trait
// ============================================================================

pub trait TransferState<'a> {
    fn step(self: Box<Self>) -> Result<Step<'a>>;
}

/// Drive a transfer to completion, cancellation or failure
pub fn run<'a>(mut state: Box<dyn TransferState<'a> + 'a>) -> Result<TransferOutcome> {
    loop {
        match state.step()? {
            Step::Next(next) => state = next,
            Step::Done(outcome) => return Ok(outcome),
        }
    }
}

// ============================================================================
// Helpers shared by every state
// ============================================================================

impl<'a, S> TransferFsm<'a, S> {
    fn transition<T>(self) -> Box<TransferFsm<'a, T>> {
        Box::new(TransferFsm {
            state: PhantomData,
            serial: self.serial,
            progress: self.progress,
            config: self.config,
            payload: self.payload,
            pos: self.pos,
            hash: self.hash,
            block_hash: self.block_hash,
            block_len: self.block_len,
            failures: self.failures,
            silent_acks: self.silent_acks,
            paused: self.paused,
        })
    }

    fn io_error(&self, e: std::io::Error) -> Error {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name),
        ))
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        serial::write_logged(self.serial, data).map_err(|e| self.io_error(e))
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        serial::read_byte(self.serial, timeout).map_err(|e| self.io_error(e))
    }

    /// Collect the diagnostic text following an unexpected byte
    fn read_burst(&mut self, first: Option<u8>) -> Result<String> {
        let mut data: Vec<u8> = first.into_iter().collect();
        let mut buf = vec![0u8; self.config.burst_len];
        let mut filled = 0;
        while filled < buf.len() {
            let n = serial::read_logged(self.serial, &mut buf[filled..], self.config.ack_timeout)
                .map_err(|e| self.io_error(e))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.extend_from_slice(&buf[..filled]);
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    fn cancel(mut self) -> Result<Step<'a>> {
        self.write(&[CANCEL])?;
        info!("canceled!");
        Ok(Step::Done(TransferOutcome::Cancelled))
    }

    fn total(&self) -> usize {
        self.payload.len()
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> TransferState<'a> for TransferFsm<'a, CheckPause> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;
        let total = fsm.total();

        if fsm.pos >= total {
            (fsm.progress)(total, total);
            debug!("sent.");
            return Ok(Step::Done(TransferOutcome::Completed));
        }

        if !fsm.paused {
            return Ok(Step::Next(fsm.transition::<TransmitBlock>()));
        }

        match (fsm.progress)(fsm.pos, total) {
            Progress::Cancel => fsm.cancel(),
            Progress::Continue => {
                info!("resumed at {}/{}", fsm.pos, total);
                fsm.paused = false;
                Ok(Step::Next(fsm.transition::<TransmitBlock>()))
            }
            Progress::Pause => {
                fsm.write(&[PAUSE])?;
                let timeout = fsm.config.pause_ack_timeout;
                match fsm.read_byte(timeout)? {
                    Some(PAUSE_ACK) => Ok(Step::Next(Box::new(fsm))),
                    other => {
                        let rest = fsm.read_burst(other)?;
                        debug!("printer didn't ping pause.");
                        Err(Error::Desync(format!("expected pause acknowledgment, got {:?}", rest.trim())))
                    }
                }
            }
        }
    }
}

impl<'a> TransferState<'a> for TransferFsm<'a, TransmitBlock> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;
        let end = (fsm.pos + BLOCK_SIZE).min(fsm.total());
        let block = &fsm.payload[fsm.pos..end];

        fsm.block_hash = fsm.hash;
        fsm.hash.update(block);

        let mut frame = Vec::with_capacity(block.len() + SUFFIX_LEN);
        frame.extend_from_slice(block);
        frame.extend_from_slice(&fsm.hash.suffix());
        fsm.block_len = block.len();

        fsm.write(&frame)?;
        Ok(Step::Next(fsm.transition::<AwaitAck>()))
    }
}

impl<'a> TransferState<'a> for TransferFsm<'a, AwaitAck> {
    fn step(self: Box<Self>) -> Result<Step<'a>> {
        let mut fsm = *self;
        let timeout = fsm.config.ack_timeout;

        match fsm.read_byte(timeout)? {
            None => {
                fsm.silent_acks += 1;
                if fsm.silent_acks > fsm.config.max_silent_acks {
                    return Err(Error::Timeout(timeout * fsm.silent_acks));
                }
                Ok(Step::Next(Box::new(fsm)))
            }
            Some(GOOD) => fsm.block_good(),
            Some(BAD) => fsm.block_bad(),
            // Tail of a line the printer already finished, e.g. after `Ready`
            Some(b'\r' | b'\n') => Ok(Step::Next(Box::new(fsm))),
            Some(other) => {
                let raw = fsm.read_burst(Some(other))?;
                let raw = raw.trim_end();
                let text = raw.trim_start();
                if !text.is_empty() {
                    warn!("printer: {:?}", text);
                }
                if text.contains(RECV_ERROR) {
                    return Err(Error::DeviceAbort(text.to_string()));
                }
                if raw.len() > 2 && raw.ends_with("\nG") {
                    return fsm.block_good();
                }
                Ok(Step::Next(Box::new(fsm)))
            }
        }
    }
}

impl<'a> TransferFsm<'a, AwaitAck> {
    fn block_good(mut self) -> Result<Step<'a>> {
        self.pos += self.block_len;
        self.failures = 0;
        self.silent_acks = 0;

        let total = self.total();
        match (self.progress)(self.pos, total) {
            Progress::Cancel => self.cancel(),
            Progress::Pause => {
                info!("paused!");
                self.paused = true;
                Ok(Step::Next(self.transition::<CheckPause>()))
            }
            Progress::Continue => {
                debug!("block is good at {}/{}", self.pos, total);
                Ok(Step::Next(self.transition::<CheckPause>()))
            }
        }
    }

    fn block_bad(mut self) -> Result<Step<'a>> {
        self.hash = self.block_hash;
        self.failures += 1;
        self.silent_acks = 0;
        if self.failures > self.config.max_failures {
            debug!("Too many failures.");
            return Err(Error::TooManyFailures {
                failures: self.failures,
                offset: self.pos,
            });
        }
        debug!("block is bad at {}/{}", self.pos, self.total());
        Ok(Step::Next(self.transition::<TransmitBlock>()))
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl<'a> TransferFsm<'a, CheckPause> {
    pub fn new(
        serial: &'a mut dyn SerialPort,
        progress: &'a mut dyn FnMut(usize, usize) -> Progress,
        config: &'a TransferConfig,
        payload: Vec<u8>,
    ) -> Box<dyn TransferState<'a> + 'a> {
        Box::new(TransferFsm {
            state: PhantomData::<CheckPause>,
            serial,
            progress,
            config,
            payload,
            pos: 0,
            hash: RollingHash::new(),
            block_hash: RollingHash::new(),
            block_len: 0,
            failures: 0,
            silent_acks: 0,
            paused: false,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{chunks, connected};
    use proptest::prelude::*;

    fn reference_hash(data: &[u8]) -> u32 {
        let mut hash: i64 = 5381;
        for &b in data {
            let signed = if b >= 128 { b as i64 - 256 } else { b as i64 };
            hash = (hash * 33 + signed).rem_euclid(1 << 32);
        }
        hash as u32
    }

    /// Expected wire image of each block, threading the hash
    fn frames(payload: &[u8]) -> Vec<Vec<u8>> {
        let mut hash = RollingHash::new();
        payload
            .chunks(BLOCK_SIZE)
            .map(|block| {
                hash.update(block);
                let mut frame = block.to_vec();
                frame.extend_from_slice(&hash.suffix());
                frame
            })
            .collect()
    }

    /// Device script: `Ready`, then a quiet read, then the given bytes
    fn device(acks: &[u8]) -> Vec<Option<u8>> {
        let mut script = chunks(&["Ready\r\n"]);
        script.extend(acks.iter().map(|&b| Some(b)));
        script
    }

    fn recorder(log: &mut Vec<(usize, usize)>, answers: Vec<Progress>) -> impl FnMut(usize, usize) -> Progress + '_ {
        let mut answers = answers.into_iter();
        move |pos, total| {
            log.push((pos, total));
            answers.next().unwrap_or(Progress::Continue)
        }
    }

    #[test]
    fn test_hash_known_values() {
        assert_eq!(djb2(b""), 5381);
        assert_eq!(djb2(b"a"), 5381 * 33 + 97);
        assert_eq!(djb2(&[0xff]), 5381 * 33 - 1);
    }

    #[test]
    fn test_suffix_fields() {
        let hash = RollingHash(0xffff_ffff);
        assert_eq!(hash.suffix(), [0x7f, 0x7f, 0x7f, 0x7f, 0x0f]);
        let hash = RollingHash(0x1234_5678);
        assert_eq!(hash.suffix(), [0x78, 0x2c, 0x51, 0x11, 0x01]);
        assert!(hash.suffix().iter().all(|b| *b < 0x80));
    }

    #[test]
    fn test_recv_command_flags() {
        assert_eq!(recv_command(10, "a.txt", false, false), "recv 10 a.txt");
        assert_eq!(recv_command(10, "a.txt", false, true), "recv 10 o a.txt");
        assert_eq!(recv_command(10, "a.txt", true, false), "recv 10 b a.txt");
        assert_eq!(recv_command(10, "a.txt", true, true), "recv 10 bo a.txt");
    }

    #[test]
    fn test_send_single_block() {
        let contents = b"hello world\n";
        let mut writes = b"recv 12 hello.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut conn = connected(device(&[GOOD]), &writes);
        let mut log = Vec::new();
        let outcome = conn.send("hello.txt", contents, false, &mut recorder(&mut log, vec![])).unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(log, vec![(12, 12), (12, 12)]);
        assert!(!conn.is_blocking());
    }

    #[test]
    fn test_send_multiple_blocks_threads_hash() {
        let contents = vec![0xaa; 2500];
        let mut writes = b"recv 2500 blob.bin\n".to_vec();
        let blocks = frames(&contents);
        assert_eq!(blocks.len(), 3);
        writes.extend(blocks.concat());

        let mut conn = connected(device(&[GOOD, GOOD, GOOD]), &writes);
        let mut log = Vec::new();
        let outcome = conn.send("blob.bin", &contents, false, &mut recorder(&mut log, vec![])).unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(log, vec![(1024, 2500), (2048, 2500), (2500, 2500), (2500, 2500)]);
    }

    #[test]
    fn test_send_compressed_program() {
        let mut program = String::new();
        for x in 0..10 {
            program.push_str(&format!("M X {}\n", x * 10));
            for head in compress::FIRING_ORDER {
                program.push_str(&format!("F {}0000\n", head as char));
            }
        }
        let packed = compress::compress(&program).unwrap();
        assert!(packed.len() * 3 < program.len());

        let mut writes = format!("recv {} b prog.txt\n", packed.len()).into_bytes();
        writes.extend(frames(packed.as_bytes()).concat());

        let mut conn = connected(device(&[GOOD]), &writes);
        let outcome = conn.send("prog.txt", program.as_bytes(), false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_send_online_raw() {
        let contents = b"not a program";
        let mut writes = b"recv 13 o raw.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut conn = connected(device(&[GOOD]), &writes);
        let outcome = conn.send("raw.txt", contents, true, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_bad_block_rewinds_hash() {
        let contents = vec![0x81; 1500];
        let blocks = frames(&contents);
        let mut writes = b"recv 1500 f.bin\n".to_vec();
        writes.extend(&blocks[0]);
        writes.extend(&blocks[0]);
        writes.extend(&blocks[1]);

        let mut conn = connected(device(&[BAD, GOOD, GOOD]), &writes);
        let outcome = conn.send("f.bin", &contents, false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_always_bad_gives_up_after_twelve_retries() {
        let contents = vec![0x80; 100];
        let block = frames(&contents).remove(0);
        let mut writes = b"recv 100 f.bin\n".to_vec();
        for _ in 0..13 {
            writes.extend(&block);
        }

        let mut conn = connected(device(&[BAD; 13]), &writes);
        let err = conn.send("f.bin", &contents, false, &mut |_, _| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::TooManyFailures { failures: 13, offset: 0 }));
        assert!(!conn.is_blocking());
    }

    #[test]
    fn test_cancel_after_first_block() {
        let contents = vec![0x90; 2048];
        let blocks = frames(&contents);
        let mut writes = b"recv 2048 f.bin\n".to_vec();
        writes.extend(&blocks[0]);
        writes.push(CANCEL);

        let mut conn = connected(device(&[GOOD]), &writes);
        let mut log = Vec::new();
        let outcome = conn
            .send("f.bin", &contents, false, &mut recorder(&mut log, vec![Progress::Cancel]))
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert_eq!(log, vec![(1024, 2048)]);
    }

    #[test]
    fn test_pause_then_resume() {
        let contents = vec![0x90; 2048];
        let blocks = frames(&contents);
        let mut writes = b"recv 2048 f.bin\n".to_vec();
        writes.extend(&blocks[0]);
        writes.push(PAUSE);
        writes.extend(&blocks[1]);

        let mut conn = connected(device(&[GOOD, PAUSE_ACK, GOOD]), &writes);
        let mut log = Vec::new();
        let answers = vec![Progress::Pause, Progress::Pause, Progress::Continue];
        let outcome = conn.send("f.bin", &contents, false, &mut recorder(&mut log, answers)).unwrap();

        assert_eq!(outcome, TransferOutcome::Completed);
        assert_eq!(log, vec![(1024, 2048), (1024, 2048), (1024, 2048), (2048, 2048), (2048, 2048)]);
    }

    #[test]
    fn test_cancel_while_paused() {
        let contents = vec![0x90; 2048];
        let blocks = frames(&contents);
        let mut writes = b"recv 2048 f.bin\n".to_vec();
        writes.extend(&blocks[0]);
        writes.push(CANCEL);

        let mut conn = connected(device(&[GOOD]), &writes);
        let answers = vec![Progress::Pause, Progress::Cancel];
        let mut log = Vec::new();
        let outcome = conn.send("f.bin", &contents, false, &mut recorder(&mut log, answers)).unwrap();
        assert_eq!(outcome, TransferOutcome::Cancelled);
    }

    #[test]
    fn test_pause_without_acknowledgment_is_desync() {
        let contents = vec![0x90; 2048];
        let blocks = frames(&contents);
        let mut writes = b"recv 2048 f.bin\n".to_vec();
        writes.extend(&blocks[0]);
        writes.push(PAUSE);

        let mut script = device(&[GOOD]);
        script.extend(chunks(&["x?"]));
        let mut conn = connected(script, &writes);
        let answers = vec![Progress::Pause, Progress::Pause];
        let mut log = Vec::new();
        let err = conn.send("f.bin", &contents, false, &mut recorder(&mut log, answers)).unwrap_err();
        assert!(matches!(err, Error::Desync(_)));
    }

    #[test]
    fn test_diagnostic_with_trailing_good() {
        let contents = b"some text";
        let mut writes = b"recv 9 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut script = device(&[]);
        script.extend(chunks(&["debug: buffer low\r\nG\r\n"]));
        let mut conn = connected(script, &writes);
        let outcome = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_diagnostic_then_good() {
        let contents = b"some text";
        let mut writes = b"recv 9 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut script = device(&[]);
        script.extend(chunks(&["card slow"]));
        script.push(Some(GOOD));
        let mut conn = connected(script, &writes);
        let outcome = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_errorecv_aborts() {
        let contents = b"some text";
        let mut writes = b"recv 9 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut script = device(&[]);
        script.extend(chunks(&["Errorecv: write failed\n"]));
        let mut conn = connected(script, &writes);
        let err = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::DeviceAbort(ref text) if text.contains("Errorecv")));
    }

    #[test]
    fn test_ready_line_split_across_reads() {
        let contents = b"some text";
        let mut writes = b"recv 9 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        // The line ending shows up with the acknowledgment
        let mut script = chunks(&["Ready"]);
        script.extend(b"\r\nG".iter().map(|&b| Some(b)));
        let mut conn = connected(script, &writes);
        let outcome = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_burst_with_leading_whitespace_ends_in_good() {
        let contents = b"some text";
        let mut writes = b"recv 9 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        let mut script = device(&[]);
        script.extend(b" \nG".iter().map(|&b| Some(b)));
        let mut conn = connected(script, &writes);
        let outcome = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap();
        assert_eq!(outcome, TransferOutcome::Completed);
    }

    #[test]
    fn test_not_ready() {
        let script = b"Error: no card\r\n".iter().map(|&b| Some(b)).collect();
        let mut conn = connected(script, b"recv 4 t.txt\n");
        let err = conn.send("t.txt", b"abcd", false, &mut |_, _| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::NotReady(ref lines) if lines[0] == "Error: no card"));
    }

    #[test]
    fn test_no_answer_to_recv() {
        let mut conn = connected(vec![None], b"recv 4 t.txt\n");
        let err = conn.send("t.txt", b"abcd", false, &mut |_, _| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_silent_acknowledgments_time_out() {
        let contents = b"abcd";
        let mut writes = b"recv 4 t.txt\n".to_vec();
        writes.extend(frames(contents).concat());

        // One scripted quiet read, then the device stays silent
        let mut conn = connected(device(&[]), &writes);
        conn.config.transfer.max_silent_acks = 2;
        let err = conn.send("t.txt", contents, false, &mut |_, _| Progress::Continue).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[test]
    fn test_rejects_bad_name() {
        let mut conn = connected(Vec::new(), b"");
        assert!(matches!(
            conn.send("two words", b"x", false, &mut |_, _| Progress::Continue),
            Err(Error::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_hash_matches_reference(data in prop::collection::vec(any::<u8>(), 0..2048)) {
            prop_assert_eq!(djb2(&data), reference_hash(&data));
        }

        #[test]
        fn prop_hash_is_incremental(a in prop::collection::vec(any::<u8>(), 0..256),
                                    b in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut hash = RollingHash::new();
            hash.update(&a);
            let before = hash;
            hash.update(&b);
            let mut joined = a.clone();
            joined.extend_from_slice(&b);
            prop_assert_eq!(hash.value(), djb2(&joined));
            prop_assert_eq!(before.value(), djb2(&a));
        }
    }
}
