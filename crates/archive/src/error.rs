//! Error types for archive operations

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for archive operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while building or extracting
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(cistash::archive::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "append", "unpack")
        operation: String,
    },

    /// A cache path could not be mapped to an archive entry
    #[error("invalid cache path {path:?}: {reason}")]
    #[diagnostic(code(cistash::archive::invalid_path))]
    InvalidPath {
        /// Path as configured
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// The archive contains an entry that would escape its destination
    #[error("refusing to extract unsafe archive entry {entry:?}")]
    #[diagnostic(
        code(cistash::archive::unsafe_entry),
        help("The archive may be corrupt or crafted; it was not extracted further")
    )]
    UnsafeEntry {
        /// Entry name as stored in the archive
        entry: String,
    },

    /// Cancellation was requested while the codec was running
    #[error("archive operation cancelled")]
    #[diagnostic(code(cistash::archive::cancelled))]
    Cancelled,
}

impl Error {
    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an invalid path error
    #[must_use]
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, Error>;
