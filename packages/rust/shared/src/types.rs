//! Core domain types shared by the archive, server, and pipeline crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WoofError;

/// File name used for generated archives unless configured otherwise.
pub const DEFAULT_ARCHIVE_NAME: &str = "woof-rs.tar.gz";

// ---------------------------------------------------------------------------
// CompressionLevel
// ---------------------------------------------------------------------------

/// Gzip level applied when bundling several paths into one archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Store without compressing (gzip level 0).
    None,
    /// Fastest compression (gzip level 1).
    #[default]
    Fast,
    /// zlib's default trade-off (gzip level 6).
    Default,
    /// Smallest output (gzip level 9).
    Best,
}

impl CompressionLevel {
    /// Numeric gzip level.
    pub fn level(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Default => 6,
            Self::Best => 9,
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Best => "best",
        };
        f.write_str(s)
    }
}

impl FromStr for CompressionLevel {
    type Err = WoofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "fast" => Ok(Self::Fast),
            "default" => Ok(Self::Default),
            "best" => Ok(Self::Best),
            other => Err(WoofError::config(format!(
                "unknown compression level '{other}': expected none, fast, default, or best"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// PayloadKind
// ---------------------------------------------------------------------------

/// What is actually sent to downloaders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// A single regular file, served in place.
    File,
    /// A generated tar.gz holding `entries` top-level items.
    Archive { entries: usize },
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Archive { entries } => write!(f, "archive ({entries} entries)"),
        }
    }
}
