//! Blob storage for cistash archives
//!
//! A [`BlobStore`] moves a single file to and from a key. Three backends are
//! provided:
//!
//! - [`S3Store`]: S3-compatible object storage with parallel multipart
//!   transfers
//! - [`LocalFileStore`]: a directory tree with a JSON metadata sidecar per key
//! - [`ArtifactCliStore`]: delegates to an external artifact CLI (`nsc`)
//!
//! All backends validate keys before doing any I/O and write local
//! destinations atomically.

pub mod atomic;
mod config;
mod error;
mod local;
mod nsc;
mod s3;
mod set;
pub mod validate;

pub use config::{NscOptions, S3Options, StoreConfig};
pub use error::{Error, ErrorKind, Result};
pub use local::{FileMetadata, LocalFileStore};
pub use nsc::ArtifactCliStore;
pub use s3::S3Store;
pub use set::StoreSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Storage backend discriminator, as tagged by the cache registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// S3-compatible object storage
    S3,
    /// Local or network-mounted directory
    LocalFile,
    /// External artifact CLI
    Nsc,
}

impl StoreType {
    /// Tag used on the wire and in configuration
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::LocalFile => "local_file",
            Self::Nsc => "nsc",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "s3" => Ok(Self::S3),
            "local_file" => Ok(Self::LocalFile),
            "nsc" => Ok(Self::Nsc),
            other => Err(Error::configuration(format!(
                "unknown store type {other:?} (expected s3, local_file or nsc)"
            ))),
        }
    }
}

/// Outcome of a single upload or download
#[derive(Debug, Clone, PartialEq)]
pub struct TransferInfo {
    /// Bytes moved
    pub bytes_transferred: u64,
    /// Throughput in MB/s
    pub transfer_speed: f64,
    /// Wall-clock duration of the transfer
    pub duration: Duration,
    /// Backend request identifier, empty when the backend has none
    pub request_id: String,
    /// Number of parts the transfer was split into
    pub part_count: usize,
    /// Parallelism used
    pub concurrency: usize,
}

impl TransferInfo {
    /// Build a single-part transfer record, deriving the throughput
    #[must_use]
    pub fn new(bytes_transferred: u64, duration: Duration) -> Self {
        Self {
            bytes_transferred,
            transfer_speed: megabytes_per_second(bytes_transferred, duration),
            duration,
            request_id: String::new(),
            part_count: 1,
            concurrency: 1,
        }
    }

    /// Set the backend request identifier
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the part count and concurrency
    #[must_use]
    pub const fn with_parts(mut self, part_count: usize, concurrency: usize) -> Self {
        self.part_count = part_count;
        self.concurrency = concurrency;
        self
    }
}

#[allow(clippy::cast_precision_loss)]
fn megabytes_per_second(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    bytes as f64 / 1_000_000.0 / secs
}

/// A backend that stores one file per key.
///
/// Implementations must validate keys before performing any I/O and must
/// never leave a partially written file at a download destination. Dropping
/// a returned future cancels the transfer.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Which backend this is
    fn store_type(&self) -> StoreType;

    /// Upload the file at `source` under `key`
    async fn upload(&self, source: &Path, key: &str) -> Result<TransferInfo>;

    /// Download the artifact under `key` to `dest`
    async fn download(&self, key: &str, dest: &Path) -> Result<TransferInfo>;
}
