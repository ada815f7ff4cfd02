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

//! Firmware version strings
//!
//! Modern firmware reports `MAJOR.MINOR.PATCH[-TAG]+BUILD` inside its boot
//! banner, where BUILD is exactly eight characters. Legacy firmware only
//! embeds a dotted token followed by a `+YYYYMMDD` build date.

use std::fmt;
use crate::protocol::LEGACY_YEAR_ANCHORS;

const BUILD_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub tag: Option<String>,
    pub build: String,
}

impl FirmwareVersion {
    /// Parse a version string, `None` if it doesn't follow the grammar
    pub fn parse(text: &str) -> Option<Self> {
        let (major, rest) = text.split_once('.')?;
        let (minor, rest) = rest.split_once('.')?;
        let (patch, build) = rest.split_once('+')?;
        let build = build.trim_end();
        if build.chars().count() != BUILD_LEN {
            return None;
        }

        let (patch, tag) = match patch.split_once('-') {
            Some((patch, tag)) => (patch, Some(tag).filter(|t| !t.is_empty()).map(str::to_string)),
            None => (patch, None),
        };

        Some(FirmwareVersion {
            major: major.trim().parse().ok()?,
            minor: minor.trim().parse().ok()?,
            patch: patch.trim().parse().ok()?,
            tag,
            build: build.to_string(),
        })
    }

    /// Recover the version of firmware that predates the `+Version` marker
    pub fn from_legacy_banner(banner: &str) -> Option<Self> {
        let anchor = LEGACY_YEAR_ANCHORS
            .iter()
            .find_map(|year| banner.find(year))?;

        let is_version_char = |b: u8| b == b'.' || b.is_ascii_digit();
        let bytes = banner.as_bytes();

        let mut start = anchor;
        while start > 0 && is_version_char(bytes[start - 1]) {
            start -= 1;
        }
        let mut end = anchor + 1;
        while end < bytes.len() && is_version_char(bytes[end]) {
            end += 1;
        }

        Self::parse(&banner[start..end])
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(tag) = &self.tag {
            write!(f, "-{}", tag)?;
        }
        write!(f, "+{}", self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_version() {
        let v = FirmwareVersion::parse("2.3.1-beta+abcd1234").unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.minor, 3);
        assert_eq!(v.patch, 1);
        assert_eq!(v.tag.as_deref(), Some("beta"));
        assert_eq!(v.build, "abcd1234");
        assert_eq!(v.to_string(), "2.3.1-beta+abcd1234");
    }

    #[test]
    fn test_parse_empty_tag_is_untagged() {
        let v = FirmwareVersion::parse("1.2.3-+abcd1234").unwrap();
        assert_eq!(v.tag, None);
        assert_eq!(v.to_string(), "1.2.3+abcd1234");
    }

    #[test]
    fn test_parse_untagged_version() {
        let v = FirmwareVersion::parse("0.10.0+1f2e3d4c\r\n").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (0, 10, 0));
        assert_eq!(v.tag, None);
        assert_eq!(v.to_string(), "0.10.0+1f2e3d4c");
    }

    #[test]
    fn test_parse_rejects_bad_build() {
        assert_eq!(FirmwareVersion::parse("2.3.1+abc"), None);
        assert_eq!(FirmwareVersion::parse("2.3.1+abcd12345"), None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(FirmwareVersion::parse("2.3+abcd1234"), None);
        assert_eq!(FirmwareVersion::parse("2.3.1"), None);
        assert_eq!(FirmwareVersion::parse("x.3.1+abcd1234"), None);
        assert_eq!(FirmwareVersion::parse(""), None);
    }

    #[test]
    fn test_legacy_banner() {
        let banner = "Argentum v0.0.12+20141105 ready\r\n";
        let v = FirmwareVersion::from_legacy_banner(banner).unwrap();
        assert_eq!((v.major, v.minor, v.patch), (0, 0, 12));
        assert_eq!(v.build, "20141105");
    }

    #[test]
    fn test_legacy_banner_at_end_of_text() {
        let v = FirmwareVersion::from_legacy_banner("fw 1.2.3+20150301").unwrap();
        assert_eq!(v.build, "20150301");
    }

    #[test]
    fn test_legacy_banner_without_anchor() {
        assert_eq!(FirmwareVersion::from_legacy_banner("hello printer 1.2.3"), None);
    }
}
