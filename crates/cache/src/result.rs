//! Caller-facing summaries of save and restore operations

use chrono::{DateTime, Utc};
use cistash_archive::{ArchiveInfo, ExtractInfo};
use cistash_store::{StoreType, TransferInfo};
use std::time::Duration;

/// Outcome of saving one cache
#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    /// Cache identity
    pub id: String,
    /// Resolved primary key
    pub key: String,
    /// Resolved fallback keys sent to the registry
    pub fallback_keys: Vec<String>,
    /// Registry slug used
    pub registry: String,
    /// False when the key already existed and nothing was uploaded
    pub cache_created: bool,
    /// Archive that was built
    pub archive: Option<ArchiveInfo>,
    /// Upload metrics
    pub transfer: Option<TransferInfo>,
    /// Store the archive was uploaded to
    pub store: Option<StoreType>,
    /// Object name inside the store
    pub store_object_name: Option<String>,
    /// Wall-clock time for the whole operation
    pub duration: Duration,
}

/// Outcome of restoring one cache
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreResult {
    /// Cache identity
    pub id: String,
    /// Key that was requested
    pub requested_key: String,
    /// Key that matched; a fallback key when `fallback_used`
    pub key: String,
    /// Registry slug used
    pub registry: String,
    /// Whether files were restored
    pub cache_restored: bool,
    /// The primary key matched exactly
    pub cache_hit: bool,
    /// A fallback key matched instead of the primary key
    pub fallback_used: bool,
    /// When the registry entry expires
    pub expires_at: Option<DateTime<Utc>>,
    /// Store the archive came from
    pub store: Option<StoreType>,
    /// Download metrics
    pub transfer: Option<TransferInfo>,
    /// Extraction metrics
    pub extract: Option<ExtractInfo>,
    /// Wall-clock time for the whole operation
    pub duration: Duration,
}
