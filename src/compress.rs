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

//! Print program compaction
//!
//! A print program is a list of directives:
//!
//! - `# ...` comments, passed through untouched
//! - `M X <n>` / `M Y <n>` moves, shortened to `X<n>` / `<n>`
//! - `F <head><pattern>` firings, one per head, buffered until the next move
//!
//! Each buffered group of firings must list all thirteen heads in
//! [`FIRING_ORDER`] and becomes a single comma separated line. Within a line
//! a firing is reduced to its head id when its pattern repeats the previous
//! firing, a zero half is replaced with `z` (high half) or dropped (low
//! half), and the remaining half either goes out literally or as a letter
//! indexing a small cache of recently sent halves. A line equal to the
//! previous one becomes `d`.

use std::collections::VecDeque;
use crate::error::CompressError;

/// Head ids in the order every firing group must list them
pub const FIRING_ORDER: [u8; 13] = *b"84C2A6E195D3B";

/// Longest firing line the firmware accepts
pub const MAX_FIRING_LINE_LEN: usize = FIRING_ORDER.len() * 4 + FIRING_ORDER.len() - 1;

const PART_CACHE_LEN: usize = 25;
const PATTERN_LEN: usize = 4;
const REPEAT_LINE: &str = "d";
const ZERO_HALF: char = 'z';

/// Compress a print program, or explain why it can't be
pub fn compress(program: &str) -> Result<String, CompressError> {
    let mut compressor = Compressor::default();
    let mut last_line = 0;

    for (idx, line) in program.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        last_line = idx + 1;
        compressor.push(line, last_line)?;
    }
    compressor.flush(last_line)?;

    let mut out = compressor.out.join("\n");
    out.push('\n');
    Ok(out)
}

/// Compress raw file contents, rejecting anything that isn't text
pub fn compress_bytes(contents: &[u8]) -> Result<String, CompressError> {
    let text = std::str::from_utf8(contents).map_err(|_| CompressError::NotText)?;
    compress(text)
}

#[derive(Default)]
struct Compressor {
    out: Vec<String>,
    firings: Vec<(u8, String)>,
    last_firing_line: Option<String>,
    last_pattern: Option<String>,
    parts: PartCache,
}

impl Compressor {
    fn push(&mut self, line: &str, line_no: usize) -> Result<(), CompressError> {
        let Some(kind) = line.bytes().next() else {
            return Ok(());
        };

        match kind {
            b'#' => self.out.push(line.to_string()),
            b'M' => {
                self.flush(line_no)?;
                let (axis, coord) = parse_move(line).ok_or_else(|| malformed(line, line_no))?;
                if axis == b'X' {
                    self.out.push(format!("X{}", coord));
                } else {
                    self.out.push(coord.to_string());
                }
            }
            b'F' => {
                let (head, pattern) = parse_firing(line).ok_or_else(|| malformed(line, line_no))?;
                let encoded = self.encode_firing(pattern);
                self.firings.push((head, encoded));
            }
            _ => {
                return Err(CompressError::UnknownDirective {
                    line: line_no,
                    text: line.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Per-firing compaction, returns everything after the head id
    fn encode_firing(&mut self, pattern: &str) -> String {
        if self.last_pattern.as_deref() == Some(pattern) {
            return String::new();
        }
        self.last_pattern = Some(pattern.to_string());

        let (high, low) = pattern.split_at(PATTERN_LEN / 2);
        let (mut out, part) = if pattern == "0000" {
            (ZERO_HALF.to_string(), None)
        } else if high == "00" {
            (ZERO_HALF.to_string(), Some(low))
        } else if low == "00" {
            (String::new(), Some(high))
        } else {
            (pattern.to_string(), None)
        };

        if let Some(part) = part {
            match self.parts.position(part) {
                Some(idx) => out.push(back_reference(idx)),
                None => {
                    self.parts.insert(part);
                    out.push_str(part);
                }
            }
        }
        out
    }

    fn flush(&mut self, line_no: usize) -> Result<(), CompressError> {
        if self.firings.is_empty() {
            return Ok(());
        }

        let in_order = self.firings.len() == FIRING_ORDER.len()
            && self.firings.iter().zip(FIRING_ORDER).all(|((head, _), expected)| *head == expected);
        if !in_order {
            return Err(CompressError::FiringOrder { line: line_no });
        }

        let line = self
            .firings
            .drain(..)
            .map(|(_, content)| content)
            .collect::<Vec<_>>()
            .join(",");
        self.emit_firing_line(line)
    }

    fn emit_firing_line(&mut self, line: String) -> Result<(), CompressError> {
        if line.len() > MAX_FIRING_LINE_LEN {
            return Err(CompressError::LineTooLong { len: line.len() });
        }
        if self.last_firing_line.as_deref() == Some(line.as_str()) {
            self.out.push(REPEAT_LINE.to_string());
        } else {
            self.out.push(line.clone());
        }
        self.last_firing_line = Some(line);
        Ok(())
    }
}

/// FIFO of recently sent pattern halves
#[derive(Default)]
struct PartCache {
    parts: VecDeque<String>,
}

impl PartCache {
    fn position(&self, part: &str) -> Option<usize> {
        self.parts.iter().position(|p| p == part)
    }

    fn get(&self, idx: usize) -> Option<&str> {
        self.parts.get(idx).map(String::as_str)
    }

    fn insert(&mut self, part: &str) {
        self.parts.push_back(part.to_string());
        if self.parts.len() > PART_CACHE_LEN {
            self.parts.pop_front();
        }
    }
}

fn back_reference(idx: usize) -> char {
    (b'a' + idx as u8) as char
}

fn malformed(line: &str, line_no: usize) -> CompressError {
    CompressError::MalformedDirective {
        line: line_no,
        text: line.to_string(),
    }
}

fn parse_move(line: &str) -> Option<(u8, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 5 || bytes[1] != b' ' || bytes[3] != b' ' {
        return None;
    }
    let axis = bytes[2];
    if axis != b'X' && axis != b'Y' {
        return None;
    }
    let coord = &line[4..];
    let numeric = coord.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'.');
    numeric.then_some((axis, coord))
}

fn parse_firing(line: &str) -> Option<(u8, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() != 3 + PATTERN_LEN || bytes[1] != b' ' || !bytes[2].is_ascii_alphanumeric() {
        return None;
    }
    let pattern = &line[3..];
    pattern.bytes().all(|b| b.is_ascii_digit()).then_some((bytes[2], pattern))
}

// ============================================================================
// Reference decoder
// ============================================================================

/// Expand compressed output back into directive lines.
///
/// Mirrors how the firmware reads the stream; used to check the compressor.
pub fn decompress(compressed: &str) -> Result<Vec<String>, CompressError> {
    let mut decoder = Decoder::default();
    let mut out = Vec::new();

    for (idx, line) in compressed.split('\n').enumerate() {
        let line_no = idx + 1;
        if line.is_empty() {
            continue;
        }
        if line.starts_with('#') {
            out.push(line.to_string());
        } else if line == REPEAT_LINE {
            let last = decoder.last_line.clone().ok_or_else(|| malformed(line, line_no))?;
            decoder.firing_line(&last, line_no, &mut out)?;
        } else if line.contains(',') {
            decoder.firing_line(line, line_no, &mut out)?;
            decoder.last_line = Some(line.to_string());
        } else if let Some(coord) = line.strip_prefix('X') {
            out.push(format!("M X {}", coord));
        } else {
            out.push(format!("M Y {}", line));
        }
    }

    Ok(out)
}

#[derive(Default)]
struct Decoder {
    last_line: Option<String>,
    last_pattern: Option<String>,
    parts: PartCache,
}

impl Decoder {
    fn firing_line(&mut self, line: &str, line_no: usize, out: &mut Vec<String>) -> Result<(), CompressError> {
        let contents: Vec<&str> = line.split(',').collect();
        if contents.len() != FIRING_ORDER.len() {
            return Err(malformed(line, line_no));
        }
        for (content, head) in contents.into_iter().zip(FIRING_ORDER) {
            let pattern = self.pattern(content).ok_or_else(|| malformed(line, line_no))?;
            out.push(format!("F {}{}", head as char, pattern));
            self.last_pattern = Some(pattern);
        }
        Ok(())
    }

    fn pattern(&mut self, content: &str) -> Option<String> {
        if content.is_empty() {
            return self.last_pattern.clone();
        }
        if content.len() == PATTERN_LEN {
            return Some(content.to_string());
        }
        match content.strip_prefix(ZERO_HALF) {
            Some("") => Some("0000".to_string()),
            Some(low) => self.part(low).map(|p| format!("00{}", p)),
            None => self.part(content).map(|p| format!("{}00", p)),
        }
    }

    fn part(&mut self, token: &str) -> Option<String> {
        match token.len() {
            1 => {
                let idx = token.bytes().next()?.checked_sub(b'a')? as usize;
                self.parts.get(idx).map(str::to_string)
            }
            2 => {
                self.parts.insert(token);
                Some(token.to_string())
            }
            _ => None,
        }
    }
}
