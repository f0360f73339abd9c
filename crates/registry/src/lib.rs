//! Cache registry client
//!
//! The registry is the service of record for cache entries: it reports
//! whether a key exists, issues upload targets, makes committed entries
//! visible and resolves fallback keys on retrieval.
//!
//! [`CacheRegistry`] is the protocol seam used by the orchestrators;
//! [`HttpRegistryClient`] speaks it over HTTP.

mod client;
mod error;
mod types;

pub use client::HttpRegistryClient;
pub use error::{Error, Result};
pub use types::{
    CommitResponse, CreateRequest, CreateResponse, DEFAULT_TIMEOUT_SECS, PeekResponse,
    RegistryConfig, RetrieveRequest, RetrieveResponse,
};

use async_trait::async_trait;

/// Operations the save and restore protocols need from a registry.
///
/// Cache misses are reported as `Ok(None)`, never as errors.
#[async_trait]
pub trait CacheRegistry: Send + Sync {
    /// Check whether `key` already exists in `registry`
    async fn peek(&self, registry: &str, key: &str, branch: &str) -> Result<Option<PeekResponse>>;

    /// Register a new entry and obtain its upload target
    async fn create(&self, registry: &str, request: &CreateRequest) -> Result<CreateResponse>;

    /// Make an uploaded entry visible
    async fn commit(&self, registry: &str, upload_id: &str) -> Result<CommitResponse>;

    /// Resolve a key, or the best matching fallback, to an artifact
    async fn retrieve(
        &self,
        registry: &str,
        request: &RetrieveRequest,
    ) -> Result<Option<RetrieveResponse>>;
}
