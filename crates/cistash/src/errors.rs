//! CLI error types

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a successful run
pub const EXIT_OK: i32 = 0;
/// Exit code when any cache or the run itself failed
pub const EXIT_FAILURE: i32 = 1;
/// Exit code after SIGINT/SIGTERM (128 + SIGINT)
pub const EXIT_CANCELLED: i32 = 130;

/// Errors surfaced by the CLI
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Failed to {operation} {}", path.display())]
    #[diagnostic(
        code(cistash::cli::file),
        help("Check that the caches file exists and is readable")
    )]
    File {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid caches file {}", path.display())]
    #[diagnostic(
        code(cistash::cli::caches_file),
        help("Expected a list of caches, or a mapping with a `caches` list")
    )]
    CachesFile {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No caches configured")]
    #[diagnostic(
        code(cistash::cli::no_caches),
        help("Pass --caches <file> or set CISTASH_CACHES")
    )]
    NoCaches,

    #[error("Unknown cache id {id:?}")]
    #[diagnostic(code(cistash::cli::unknown_cache))]
    UnknownCache { id: String },

    #[error("Invalid argument {argument}: {message}")]
    #[diagnostic(
        code(cistash::cli::invalid_argument),
        help("Run 'cistash --help' to see available options")
    )]
    InvalidArgument { argument: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] cistash_cache::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] cistash_registry::Error),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] cistash_store::Error),

    #[error("{failed} of {total} caches failed")]
    #[diagnostic(code(cistash::cli::caches_failed))]
    CachesFailed { failed: usize, total: usize },

    #[error("Interrupted")]
    #[diagnostic(code(cistash::cli::cancelled))]
    Cancelled,

    #[error("Failed to write output")]
    #[diagnostic(code(cistash::cli::output))]
    Output {
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn file(
        operation: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::File {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    pub fn invalid_argument(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument: argument.into(),
            message: message.into(),
        }
    }
}

/// Process exit code for an error
#[must_use]
pub fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Cancelled => EXIT_CANCELLED,
        CliError::Cache(e) if e.kind() == cistash_cache::ErrorKind::Cancelled => EXIT_CANCELLED,
        _ => EXIT_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cistash_cache::Phase;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code_for(&CliError::Cancelled), EXIT_CANCELLED);
        assert_eq!(
            exit_code_for(&CliError::Cache(cistash_cache::Error::Cancelled {
                id: "deps".to_string(),
                phase: Phase::Upload,
            })),
            EXIT_CANCELLED
        );
        assert_eq!(
            exit_code_for(&CliError::CachesFailed { failed: 1, total: 3 }),
            EXIT_FAILURE
        );
        assert_eq!(exit_code_for(&CliError::NoCaches), EXIT_FAILURE);
    }

    #[test]
    fn messages() {
        assert_eq!(
            CliError::CachesFailed { failed: 2, total: 5 }.to_string(),
            "2 of 5 caches failed"
        );
        assert_eq!(
            CliError::invalid_argument("--store", "bad scheme").to_string(),
            "Invalid argument --store: bad scheme"
        );
    }
}
