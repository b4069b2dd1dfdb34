//! Error types for woof-rs.
//!
//! Library crates use [`WoofError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all woof-rs operations.
#[derive(Debug, thiserror::Error)]
pub enum WoofError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Nothing was given to share.
    #[error("no paths given, nothing to share")]
    NoPaths,

    /// A path that is neither a regular file nor a directory.
    #[error("{path:?} is not a valid path")]
    InvalidPath { path: PathBuf },

    /// Every path handed to the archiver was skipped.
    #[error("archive does not contain any files")]
    EmptyArchive,

    /// tar/gzip encoding error.
    #[error("archive error: {0}")]
    Archive(String),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Malformed or unsupported HTTP traffic on a connection.
    #[error("http error: {0}")]
    Http(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, WoofError>;

impl WoofError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an HTTP protocol error from any displayable message.
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a bind failure with the address that was requested.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}
