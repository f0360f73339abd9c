//! Registry protocol payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Registry client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Base URL of the registry API
    pub url: String,
    /// Bearer token
    pub token: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl RegistryConfig {
    /// Configuration for `url` with no token and the default timeout
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the bearer token
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Entry metadata returned when a key exists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekResponse {
    /// Key that exists
    #[serde(default)]
    pub key: String,
    /// Store tag holding the artifact
    #[serde(default)]
    pub store: String,
    /// Archive digest recorded at creation
    #[serde(default)]
    pub digest: String,
    /// Archive size recorded at creation
    #[serde(default)]
    pub file_size: u64,
    /// When the entry expires
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to create a new cache entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Resolved primary key
    pub key: String,
    /// Resolved fallback keys in priority order
    pub fallback_keys: Vec<String>,
    /// Archive compression (e.g. `zstd`)
    pub compression: String,
    /// Archive size in bytes
    pub file_size: u64,
    /// Archive SHA-256 as lowercase hex
    pub digest: String,
    /// Paths contained in the archive
    pub paths: Vec<String>,
    /// `os/arch` of the agent
    pub platform: String,
    /// Pipeline slug
    pub pipeline: String,
    /// Branch name
    pub branch: String,
    /// Organization slug
    pub owner: String,
}

/// Upload target issued by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    /// Identifier to pass to commit
    pub upload_id: String,
    /// Name of the object in the blob store
    pub store_object_name: String,
    /// Whether the server expects a multipart upload
    #[serde(default)]
    pub multipart: bool,
    /// Backend-specific upload hints
    #[serde(default)]
    pub upload_instructions: Vec<String>,
    /// Store tag to upload to, when the registry chooses one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
}

/// Commit acknowledgement
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Server message
    #[serde(default)]
    pub message: String,
}

/// Request to resolve a key (or one of its fallbacks) to an artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveRequest {
    /// Resolved primary key
    pub key: String,
    /// Branch name
    pub branch: String,
    /// Resolved fallback keys in priority order
    pub fallback_keys: Vec<String>,
}

/// Artifact location for a retrieved key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveResponse {
    /// Key that matched (the primary key, or the fallback the server chose)
    pub key: String,
    /// Store tag holding the artifact
    pub store: String,
    /// True if a fallback key matched instead of the primary key
    #[serde(default)]
    pub fallback: bool,
    /// Name of the object in the blob store
    pub store_object_name: String,
    /// When the entry expires
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Backend-specific download hints
    #[serde(default)]
    pub download_instructions: Vec<String>,
}

/// Error body returned by the registry
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: String,
}
