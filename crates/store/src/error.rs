//! Error types for blob storage

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use crate::StoreType;
use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Broad class of a storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any I/O was attempted
    Validation,
    /// Local filesystem failure (e.g. missing source file)
    Io,
    /// Backend unavailable, transport failure or non-zero exit
    Transfer,
    /// Store could not be constructed from its configuration
    Configuration,
}

/// Error type for blob store operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Key or path failed validation
    #[error("invalid store key {key:?}: {reason}")]
    #[diagnostic(
        code(cistash::store::invalid_key),
        help("Keys must be relative, free of `..`/`//` segments and shell metacharacters")
    )]
    InvalidKey {
        /// The rejected key or path
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// I/O error on the local side of a transfer
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(cistash::store::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "open", "rename")
        operation: String,
    },

    /// The backend failed to move bytes
    #[error("{backend} transfer failed: {message}")]
    #[diagnostic(code(cistash::store::transfer))]
    Transfer {
        /// Backend that failed
        backend: StoreType,
        /// Description of the failure
        message: String,
    },

    /// The external artifact tool exited unsuccessfully
    #[error("{program} exited with {}: {stderr}", code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    #[diagnostic(code(cistash::store::command_failed))]
    CommandFailed {
        /// Program that was run
        program: String,
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// No artifact is stored under the key
    #[error("{backend} store has no artifact for key {key:?}")]
    #[diagnostic(code(cistash::store::not_found))]
    NotFound {
        /// Backend that was queried
        backend: StoreType,
        /// Missing key
        key: String,
    },

    /// Store configuration error
    #[error("store configuration error: {message}")]
    #[diagnostic(code(cistash::store::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a key validation error
    #[must_use]
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

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

    /// Create a transfer error
    #[must_use]
    pub fn transfer(backend: StoreType, message: impl Into<String>) -> Self {
        Self::Transfer {
            backend,
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey { .. } => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Io,
            Self::Transfer { .. } | Self::CommandFailed { .. } | Self::NotFound { .. } => {
                ErrorKind::Transfer
            }
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }
}

/// Result type for blob store operations
pub type Result<T> = std::result::Result<T, Error>;
