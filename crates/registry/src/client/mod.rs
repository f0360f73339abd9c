//! HTTP registry client.
//!
//! Public API: no status code knowledge. All HTTP/status mapping in http.rs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    CommitResponse, CreateRequest, CreateResponse, PeekResponse, RegistryConfig,
    RetrieveRequest, RetrieveResponse,
};
use crate::CacheRegistry;

mod http;

use http::{HttpBackend, Outcome, decode};

const USER_AGENT_VALUE: &str = concat!("cistash/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct CommitRequest<'a> {
    upload_id: &'a str,
}

/// Registry client speaking the cache registry HTTP protocol
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    http: HttpBackend,
}

impl HttpRegistryClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let base_url = Url::parse(config.url.trim())
            .map_err(|e| Error::configuration(format!("invalid registry URL {:?}: {e}", config.url)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::configuration(format!(
                "registry URL must be http(s), got {:?}",
                config.url
            )));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http: HttpBackend {
                client,
                base_url,
                token: config.token.filter(|t| !t.is_empty()),
            },
        })
    }
}

#[async_trait]
impl CacheRegistry for HttpRegistryClient {
    async fn peek(&self, registry: &str, key: &str, branch: &str) -> Result<Option<PeekResponse>> {
        let url = self.http.endpoint(registry, "peek")?;
        debug!(url = %url, key, "peeking cache entry");

        let request = self
            .http
            .client
            .get(url)
            .query(&[("key", key), ("branch", branch)]);
        match self.http.send(registry, request).await? {
            Outcome::Found(response) => decode(response).await.map(Some),
            Outcome::Missing { message } => {
                debug!(key, message = %message, "cache entry not found");
                Ok(None)
            }
        }
    }

    async fn create(&self, registry: &str, request: &CreateRequest) -> Result<CreateResponse> {
        let url = self.http.endpoint(registry, "store")?;
        debug!(url = %url, key = %request.key, size = request.file_size, "creating cache entry");

        let builder = self.http.client.put(url).json(request);
        match self.http.send(registry, builder).await? {
            Outcome::Found(response) => decode(response).await,
            Outcome::Missing { message } => Err(Error::UnexpectedStatus {
                status: 404,
                body: message,
            }),
        }
    }

    async fn commit(&self, registry: &str, upload_id: &str) -> Result<CommitResponse> {
        let url = self.http.endpoint(registry, "commit")?;
        debug!(url = %url, upload_id, "committing cache entry");

        let builder = self.http.client.put(url).json(&CommitRequest { upload_id });
        match self.http.send(registry, builder).await? {
            Outcome::Found(response) => decode(response).await,
            Outcome::Missing { message } => Err(Error::UnexpectedStatus {
                status: 404,
                body: message,
            }),
        }
    }

    async fn retrieve(
        &self,
        registry: &str,
        request: &RetrieveRequest,
    ) -> Result<Option<RetrieveResponse>> {
        let url = self.http.endpoint(registry, "retrieve")?;
        let fallback_keys = request.fallback_keys.join(",");
        debug!(url = %url, key = %request.key, fallback_keys = %fallback_keys, "retrieving cache entry");

        let builder = self.http.client.get(url).query(&[
            ("key", request.key.as_str()),
            ("branch", request.branch.as_str()),
            ("fallback_keys", fallback_keys.as_str()),
        ]);
        match self.http.send(registry, builder).await? {
            Outcome::Found(response) => decode(response).await.map(Some),
            Outcome::Missing { message } => {
                debug!(key = %request.key, message = %message, "cache miss");
                Ok(None)
            }
        }
    }
}
