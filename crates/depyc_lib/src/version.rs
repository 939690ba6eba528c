//! Python release identification and per-version format predicates.
//!
//! The magic number at the head of a `.pyc` is a 16-bit counter followed by
//! `\r\n`. Releases up to 2.7 shipped fixed values; from 3.0 on, CPython
//! reserves a numeric range per minor version and bumps the counter whenever
//! the bytecode changes during development, so 3.x matching is range-based.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DepycError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PyVersion {
    pub major: u8,
    pub minor: u8,
}

impl PyVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// True when this version is at least `major.minor`.
    pub fn at_least(self, major: u8, minor: u8) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    pub fn before(self, major: u8, minor: u8) -> bool {
        (self.major, self.minor) < (major, minor)
    }

    /// 3.6+ encodes every instruction as exactly two bytes.
    pub fn wordcode(self) -> bool {
        self.at_least(3, 6)
    }

    /// 3.10+ stores jump operands in code units rather than byte offsets.
    pub fn jumps_in_code_units(self) -> bool {
        self.at_least(3, 10)
    }

    /// 3.11+ pads instructions with CACHE slots and replaces SETUP_* block
    /// opcodes with a per-code-object exception table.
    pub fn has_inline_caches(self) -> bool {
        self.at_least(3, 11)
    }

    pub fn has_exception_table(self) -> bool {
        self.at_least(3, 11)
    }

    /// Code-object field widths switched from 16 to 32 bits in 2.3.
    pub fn wide_code_fields(self) -> bool {
        self.at_least(2, 3)
    }

    /// All conditional jumps became relative in 3.12 (3.11 still kept a few
    /// absolute forms out of the table; from our point of view the cutoff
    /// that matters is whether JUMP_ABSOLUTE exists at all).
    pub fn has_absolute_jumps(self) -> bool {
        self.before(3, 11)
    }
}

impl fmt::Display for PyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for PyVersion {
    type Err = DepycError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || DepycError::BadVersionString(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(bad)?;
        let major: u8 = major.parse().map_err(|_| bad())?;
        let minor: u8 = minor.parse().map_err(|_| bad())?;
        let ver = PyVersion::new(major, minor);
        if !version_supported(ver) {
            return Err(DepycError::UnsupportedVersion { major, minor });
        }
        Ok(ver)
    }
}

fn version_supported(ver: PyVersion) -> bool {
    match ver.major {
        1 => ver.minor <= 6,
        2 => ver.minor <= 7,
        3 => ver.minor <= 13,
        _ => false,
    }
}

/// Exact header magics for the 1.x/2.x releases.
const LEGACY_MAGICS: &[(u32, PyVersion)] = &[
    (0x00999902, PyVersion::new(1, 0)),
    (0x00999903, PyVersion::new(1, 1)), // also 1.2
    (0x0A0D2E89, PyVersion::new(1, 3)),
    (0x0A0D1704, PyVersion::new(1, 4)),
    (0x0A0D4E99, PyVersion::new(1, 5)),
    (0x0A0DC4FC, PyVersion::new(1, 6)),
    (0x0A0DC687, PyVersion::new(2, 0)),
    (0x0A0DEB2A, PyVersion::new(2, 1)),
    (0x0A0DED2D, PyVersion::new(2, 2)),
    (0x0A0DF23B, PyVersion::new(2, 3)),
    (0x0A0DF26D, PyVersion::new(2, 4)),
    (0x0A0DF2B3, PyVersion::new(2, 5)),
    (0x0A0DF2D1, PyVersion::new(2, 6)),
    (0x0A0DF303, PyVersion::new(2, 7)),
];

/// Reserved magic-counter windows for the 3.x series (inclusive).
const PY3_RANGES: &[(u16, u16, u8)] = &[
    (3000, 3139, 0),  // 3.0
    (3140, 3159, 1),  // 3.1 (release magic 3151)
    (3160, 3189, 2),  // 3.2 (3180)
    (3190, 3249, 3),  // 3.3 (3230)
    (3250, 3319, 4),  // 3.4 (3310)
    (3320, 3359, 5),  // 3.5 (3351)
    (3360, 3389, 6),  // 3.6 (3379)
    (3390, 3399, 7),  // 3.7 (3394)
    (3400, 3419, 8),  // 3.8 (3413)
    (3420, 3429, 9),  // 3.9 (3425)
    (3430, 3449, 10), // 3.10 (3439)
    (3450, 3499, 11), // 3.11 (3495)
    (3500, 3549, 12), // 3.12 (3531)
    (3550, 3599, 13), // 3.13 (3571)
];

/// Maps a raw 32-bit header magic to a Python version.
pub fn version_from_magic(magic: u32) -> Result<PyVersion> {
    for &(m, ver) in LEGACY_MAGICS {
        if m == magic {
            return Ok(ver);
        }
    }

    // 3.x magics are the counter in the low 16 bits followed by \r\n.
    if magic >> 16 != 0x0A0D {
        return Err(DepycError::BadMagic(magic));
    }
    let counter = (magic & 0xFFFF) as u16;
    for &(lo, hi, minor) in PY3_RANGES {
        if (lo..=hi).contains(&counter) {
            return Ok(PyVersion::new(3, minor));
        }
    }
    Err(DepycError::BadMagic(magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_magics_resolve() {
        assert_eq!(version_from_magic(0x0A0DF303).unwrap(), PyVersion::new(2, 7));
        assert_eq!(version_from_magic(0x0A0D0D55).unwrap(), PyVersion::new(3, 8)); // 3413
        assert_eq!(version_from_magic(0x0A0D0D61).unwrap(), PyVersion::new(3, 9)); // 3425
        assert_eq!(version_from_magic(0x0A0D0D6F).unwrap(), PyVersion::new(3, 10)); // 3439
        assert_eq!(version_from_magic(0x0A0D0DA7).unwrap(), PyVersion::new(3, 11)); // 3495
        assert_eq!(version_from_magic(0x0A0D0DCB).unwrap(), PyVersion::new(3, 12)); // 3531
        assert_eq!(version_from_magic(0x0A0D0DF3).unwrap(), PyVersion::new(3, 13)); // 3571
    }

    #[test]
    fn unknown_magic_is_an_error() {
        assert!(matches!(
            version_from_magic(0xDEADBEEF),
            Err(DepycError::BadMagic(0xDEADBEEF))
        ));
    }

    #[test]
    fn version_strings() {
        assert_eq!("3.11".parse::<PyVersion>().unwrap(), PyVersion::new(3, 11));
        assert!(matches!(
            "3".parse::<PyVersion>(),
            Err(DepycError::BadVersionString(_))
        ));
        assert!(matches!(
            "4.0".parse::<PyVersion>(),
            Err(DepycError::UnsupportedVersion { major: 4, minor: 0 })
        ));
    }

    #[test]
    fn dialect_predicates() {
        let v27 = PyVersion::new(2, 7);
        let v35 = PyVersion::new(3, 5);
        let v36 = PyVersion::new(3, 6);
        let v311 = PyVersion::new(3, 11);
        assert!(!v27.wordcode());
        assert!(!v35.wordcode());
        assert!(v36.wordcode());
        assert!(!v36.has_inline_caches());
        assert!(v311.has_inline_caches());
        assert!(!v311.has_absolute_jumps());
    }
}
