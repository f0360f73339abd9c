//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Step of the save or restore protocol an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Template expansion and local validation
    Prepare,
    /// Registry existence check
    Peek,
    /// Archive build
    Archive,
    /// Registry entry creation
    Create,
    /// Blob upload
    Upload,
    /// Registry commit
    Commit,
    /// Registry lookup
    Retrieve,
    /// Blob download
    Download,
    /// Archive extraction
    Extract,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Prepare => "prepare",
            Self::Peek => "peek",
            Self::Archive => "archive",
            Self::Create => "create",
            Self::Upload => "upload",
            Self::Commit => "commit",
            Self::Retrieve => "retrieve",
            Self::Download => "download",
            Self::Extract => "extract",
        })
    }
}

/// Broad class of a cache failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration, template or key; nothing was sent anywhere
    Validation,
    /// Registry error, unexpected status or content type
    RegistryProtocol,
    /// Blob store or local file failure
    Transfer,
    /// Archive build or extraction failure
    Archive,
    /// The operation was cancelled
    Cancelled,
}

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The cache configuration is invalid
    #[error("cache {id:?}: {message}")]
    #[diagnostic(code(cistash::cache::config))]
    Configuration {
        /// Cache ID (may be empty)
        id: String,
        /// What is wrong
        message: String,
    },

    /// A key or path template failed to resolve
    #[error("cache {id:?}: failed to resolve templates")]
    #[diagnostic(code(cistash::cache::template))]
    Template {
        /// Cache ID
        id: String,
        /// Underlying template error
        #[source]
        #[diagnostic_source]
        source: cistash_keys::Error,
    },

    /// A path to be saved does not exist
    #[error("cache {id:?}: path {path:?} does not exist")]
    #[diagnostic(
        code(cistash::cache::missing_path),
        help("Paths are resolved relative to the working directory; `~` expands to the home directory")
    )]
    MissingPath {
        /// Cache ID
        id: String,
        /// Path as configured
        path: String,
    },

    /// The registry call failed
    #[error("cache {id:?}: {phase} failed")]
    #[diagnostic(code(cistash::cache::registry))]
    Registry {
        /// Cache ID
        id: String,
        /// Failing phase
        phase: Phase,
        /// Underlying registry error
        #[source]
        #[diagnostic_source]
        source: cistash_registry::Error,
    },

    /// The registry named a store this client does not know
    #[error("cache {id:?}: registry selected unknown store {store:?} during {phase}")]
    #[diagnostic(code(cistash::cache::unknown_store))]
    UnknownStore {
        /// Cache ID
        id: String,
        /// Phase whose response named the store
        phase: Phase,
        /// Store tag as received
        store: String,
    },

    /// The blob store failed
    #[error("cache {id:?}: {phase} failed")]
    #[diagnostic(code(cistash::cache::store))]
    Store {
        /// Cache ID
        id: String,
        /// Failing phase
        phase: Phase,
        /// Underlying store error
        #[source]
        #[diagnostic_source]
        source: cistash_store::Error,
    },

    /// Archive build or extraction failed
    #[error("cache {id:?}: {phase} failed")]
    #[diagnostic(code(cistash::cache::archive))]
    Archive {
        /// Cache ID
        id: String,
        /// Failing phase
        phase: Phase,
        /// Underlying archive error
        #[source]
        #[diagnostic_source]
        source: cistash_archive::Error,
    },

    /// Local I/O error outside the codec and stores
    #[error("cache {id:?}: I/O {operation} failed during {phase}{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(cistash::cache::io))]
    Io {
        /// Cache ID
        id: String,
        /// Failing phase
        phase: Phase,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed
        operation: String,
    },

    /// The operation was cancelled
    #[error("cache {id:?}: cancelled during {phase}")]
    #[diagnostic(code(cistash::cache::cancelled))]
    Cancelled {
        /// Cache ID
        id: String,
        /// Phase in progress when cancellation was observed
        phase: Phase,
    },

    /// A batch task panicked or was aborted
    #[error("cache {id:?}: task failed: {message}")]
    #[diagnostic(code(cistash::cache::task))]
    Task {
        /// Cache ID
        id: String,
        /// Join error description
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        id: impl Into<String>,
        phase: Phase,
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            id: id.into(),
            phase,
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Cache this error is attributed to
    #[must_use]
    pub fn cache_id(&self) -> &str {
        match self {
            Self::Configuration { id, .. }
            | Self::Template { id, .. }
            | Self::MissingPath { id, .. }
            | Self::Registry { id, .. }
            | Self::UnknownStore { id, .. }
            | Self::Store { id, .. }
            | Self::Archive { id, .. }
            | Self::Io { id, .. }
            | Self::Cancelled { id, .. }
            | Self::Task { id, .. } => id,
        }
    }

    /// Phase the error occurred in
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Configuration { .. } | Self::Template { .. } | Self::MissingPath { .. } => {
                Some(Phase::Prepare)
            }
            Self::Registry { phase, .. }
            | Self::UnknownStore { phase, .. }
            | Self::Store { phase, .. }
            | Self::Archive { phase, .. }
            | Self::Io { phase, .. }
            | Self::Cancelled { phase, .. } => Some(*phase),
            Self::Task { .. } => None,
        }
    }

    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::Template { .. } | Self::MissingPath { .. } => {
                ErrorKind::Validation
            }
            Self::Registry { .. } | Self::UnknownStore { .. } => ErrorKind::RegistryProtocol,
            Self::Store { source, .. } => match source.kind() {
                cistash_store::ErrorKind::Validation | cistash_store::ErrorKind::Configuration => {
                    ErrorKind::Validation
                }
                cistash_store::ErrorKind::Io | cistash_store::ErrorKind::Transfer => {
                    ErrorKind::Transfer
                }
            },
            Self::Archive { .. } => ErrorKind::Archive,
            Self::Io { phase, .. } => match phase {
                Phase::Archive | Phase::Extract => ErrorKind::Archive,
                _ => ErrorKind::Transfer,
            },
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Task { .. } => ErrorKind::Transfer,
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
