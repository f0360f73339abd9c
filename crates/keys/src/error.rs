//! Error types for key resolution

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for key template resolution
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The template could not be parsed
    #[error("template syntax error at offset {offset}: {message}")]
    #[diagnostic(
        code(cistash::keys::syntax),
        help("Placeholders look like {{{{ id }}}} or {{{{ checksum \"go.sum\" }}}}")
    )]
    Syntax {
        /// Byte offset into the template where parsing failed
        offset: usize,
        /// Description of the problem
        message: String,
    },

    /// A named built-in cache template does not exist
    #[error("unknown cache template: {name}")]
    #[diagnostic(
        code(cistash::keys::unknown_template),
        help("Run `cistash templates` to list the built-in templates")
    )]
    UnknownTemplate {
        /// Name that was looked up
        name: String,
    },
}

impl Error {
    /// Create a syntax error at the given offset
    #[must_use]
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

/// Result type for key resolution
pub type Result<T> = std::result::Result<T, Error>;
