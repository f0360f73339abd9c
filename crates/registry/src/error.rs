//! Error types for the registry client

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for registry operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The registry itself does not exist (as opposed to a cache miss)
    #[error("cache registry {registry:?} not found: {message}")]
    #[diagnostic(
        code(cistash::registry::not_found),
        help("Check the registry slug and that the token has access to it")
    )]
    RegistryNotFound {
        /// Registry slug
        registry: String,
        /// Message returned by the server
        message: String,
    },

    /// The server answered with a status the protocol does not allow
    #[error("registry returned HTTP {status}: {body}")]
    #[diagnostic(code(cistash::registry::unexpected_status))]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// A successful response did not carry a JSON body
    #[error("registry returned unexpected content type {content_type:?}")]
    #[diagnostic(
        code(cistash::registry::content_type),
        help("Is the registry URL pointing at an HTML login page or proxy?")
    )]
    UnexpectedContentType {
        /// Content type received (empty if absent)
        content_type: String,
    },

    /// The response body could not be decoded
    #[error("invalid registry response: {message}")]
    #[diagnostic(code(cistash::registry::invalid_response))]
    InvalidResponse {
        /// Decoding failure
        message: String,
    },

    /// Transport failure talking to the registry
    #[error("registry request failed: {message}")]
    #[diagnostic(code(cistash::registry::network))]
    Network {
        /// Underlying transport error
        message: String,
    },

    /// Client configuration error
    #[error("registry configuration error: {message}")]
    #[diagnostic(code(cistash::registry::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an invalid response error
    #[must_use]
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: msg.into(),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else {
            Self::Network {
                message: err.to_string(),
            }
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, Error>;
