//! HTTP layer: status and content-type mapping.
//!
//! This is the only place that interprets status codes. `client/mod.rs`
//! works in terms of [`Outcome`].

use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::ErrorBody;

/// Longest response body kept in an error
const MAX_ERROR_BODY: usize = 1024;

/// Outcome of a registry request that did not fail outright
#[derive(Debug)]
pub(crate) enum Outcome {
    /// 2xx with a JSON body
    Found(Response),
    /// 404 for an entry (not for the registry itself)
    Missing { message: String },
}

/// HTTP backend for making requests (holds the reqwest client, auth and base URL)
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    pub(crate) client: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) token: Option<String>,
}

impl HttpBackend {
    /// `<base>/cache_registries/<registry>/<action>`
    pub(crate) fn endpoint(&self, registry: &str, action: &str) -> Result<Url> {
        if registry.trim().is_empty() {
            return Err(Error::configuration("registry slug must not be empty"));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::configuration(format!("invalid registry URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["cache_registries", registry, action]);
        Ok(url)
    }

    /// Send a request and map its status.
    pub(crate) async fn send(&self, registry: &str, request: RequestBuilder) -> Result<Outcome> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "registry response");

        if status.is_success() {
            check_content_type(&response)?;
            return Ok(Outcome::Found(response));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.message)
                .unwrap_or_else(|_| body.clone());
            if mentions_registry(&message) {
                return Err(Error::RegistryNotFound {
                    registry: registry.to_string(),
                    message,
                });
            }
            return Ok(Outcome::Missing { message });
        }

        Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            body: truncate(body),
        })
    }
}

/// Decode a JSON body
pub(crate) async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| Error::invalid_response(e.to_string()))
}

fn check_content_type(response: &Response) -> Result<()> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if is_json_content_type(content_type) {
        Ok(())
    } else {
        Err(Error::UnexpectedContentType {
            content_type: content_type.to_string(),
        })
    }
}

/// `application/json` or `application/<anything>+json`, parameters ignored
pub(crate) fn is_json_content_type(value: &str) -> bool {
    let essence = value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.strip_prefix("application/") {
        Some("json") => true,
        Some(subtype) => subtype.len() > "+json".len() && subtype.ends_with("+json"),
        None => false,
    }
}

fn mentions_registry(message: &str) -> bool {
    message.to_ascii_lowercase().contains("registry")
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push_str("...");
    }
    body
}
