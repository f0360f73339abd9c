//! cistash command-line interface
//!
//! Loads cache definitions from a YAML or JSON file, resolves their keys and
//! drives [`cistash_cache::Cache`] against a registry and blob stores.
//! SIGINT and SIGTERM cancel in-flight transfers; temporary archives are
//! removed before the process exits.

pub mod caches;
pub mod cli;
pub mod commands;
pub mod errors;
pub mod output;
pub mod shutdown;
pub mod tracing;

pub use errors::{CliError, EXIT_CANCELLED, EXIT_FAILURE, EXIT_OK, exit_code_for};
