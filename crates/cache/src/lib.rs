//! Save and restore orchestration for CI caches
//!
//! This crate ties the other cistash crates together:
//! - [`CacheConfig`] describes a cache; [`CacheConfig::expand`] resolves its
//!   key, fallback key and path templates
//! - [`Cache::save`] builds, registers, uploads and commits an archive
//! - [`Cache::restore`] retrieves, downloads and extracts one
//! - [`Cache::save_all`] and [`Cache::restore_all`] run a list of caches
//!
//! # Errors
//!
//! Every error carries the cache ID and the [`Phase`] it occurred in, and
//! can be classified with [`Error::kind`]. Cache misses are not errors.

mod batch;
mod cache;
mod config;
mod error;
mod result;

pub use cache::{BuildContext, Cache};
pub use config::{CacheConfig, ExpandedCache};
pub use error::{Error, ErrorKind, Phase, Result};
pub use result::{RestoreResult, SaveResult};
