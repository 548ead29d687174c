//! Format registry and byte-signature detection
//!
//! The name table and the signature table are immutable; detection is a
//! pure function of the bytes buffered so far.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Container format used for packing or unpacking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Behavior {
    /// Not yet resolved
    #[default]
    Auto,
    /// Plain tar
    Tar,
    /// Gzip-compressed tar
    TarGZ,
    /// Xz-compressed tar (detected, not implemented)
    TarXZ,
    /// Zip (detected, not implemented)
    Zip,
}

/// Format used when packing with [`Behavior::Auto`]
pub const DEFAULT_PACK_BEHAVIOR: Behavior = Behavior::TarGZ;

const NAMES: &[(&str, Behavior)] = &[
    ("auto", Behavior::Auto),
    ("tar", Behavior::Tar),
    ("tar.gz", Behavior::TarGZ),
    ("tar.xz", Behavior::TarXZ),
    ("zip", Behavior::Zip),
];

impl Behavior {
    /// Canonical configuration name
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, behavior)| *behavior == self)
            .map(|(name, _)| *name)
            .unwrap_or("auto")
    }

    /// Whether this is a concrete format rather than `Auto`
    pub fn is_resolved(self) -> bool {
        self != Behavior::Auto
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Behavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        resolve_behavior_name(s)
    }
}

/// Map a configuration name to a [`Behavior`]
///
/// Matching is exact: `"TAR"` or `" tar"` are rejected.
pub fn resolve_behavior_name(name: &str) -> Result<Behavior> {
    NAMES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, behavior)| *behavior)
        .ok_or_else(|| Error::UnknownFormat(name.to_string()))
}

/// A magic byte sequence at a fixed offset
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub offset: usize,
    pub magic: &'static [u8],
    pub behavior: Behavior,
}

impl Signature {
    /// Bytes that must be buffered before this signature can be checked
    pub const fn needed(&self) -> usize {
        self.offset + self.magic.len()
    }

    fn matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= self.needed() && &prefix[self.offset..self.needed()] == self.magic
    }
}

/// Signatures in priority order; the first match wins
pub const SIGNATURES: &[Signature] = &[
    Signature {
        offset: 0,
        magic: &[0x1F, 0x8B],
        behavior: Behavior::TarGZ,
    },
    Signature {
        offset: 0,
        magic: &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00],
        behavior: Behavior::TarXZ,
    },
    Signature {
        offset: 257,
        magic: b"ustar",
        behavior: Behavior::Tar,
    },
    Signature {
        offset: 0,
        magic: &[0x50, 0x4B, 0x03, 0x04],
        behavior: Behavior::Zip,
    },
];

/// Bytes after which an unmatched prefix is a detection failure
pub const DETECTION_BUDGET: usize = 262;

/// Detect the container format of a stream prefix
///
/// Returns `Ok(None)` while more data is needed and
/// [`Error::UnableToDetect`] once [`DETECTION_BUDGET`] bytes match nothing.
pub fn detect(prefix: &[u8]) -> Result<Option<Behavior>> {
    if let Some(signature) = SIGNATURES.iter().find(|sig| sig.matches(prefix)) {
        return Ok(Some(signature.behavior));
    }
    if prefix.len() >= DETECTION_BUDGET {
        return Err(Error::UnableToDetect);
    }
    Ok(None)
}
