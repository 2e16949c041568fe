// crates/db-relay-api/src/client.rs
// ============================================================================
// Module: Upstream API Client
// Description: Bounded blocking HTTP client for the upstream REST API.
// Purpose: Centralize URL building, auth headers, status, and size limits.
// Dependencies: reqwest, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`ApiClient`] issues JSON requests against a fixed base URL. Path segments
//! are appended through URL path-segment encoding, so caller values such as
//! access codes cannot alter the route. Redirects are disabled, bodies are
//! read under a hard byte limit, and non-2xx statuses become errors carrying
//! a bounded excerpt of the upstream body.
//! Security posture: upstream responses are untrusted input.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Read;
use std::time::Duration;

use db_relay_core::EngineError;
use reqwest::Method;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::blocking::Response;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum bytes of an error body echoed into an error message.
const MAX_ERROR_BODY_BYTES: usize = 1024;
/// JSON media type.
const APPLICATION_JSON: &str = "application/json";

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the REST engine.
///
/// # Invariants
/// - `base_url` uses `http` or `https`.
/// - `max_response_bytes` is a hard upper bound on response bodies.
/// - `timeout_ms` applies to the full request lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiEngineConfig {
    /// Upstream base URL; a trailing slash is ignored.
    pub base_url: String,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Page size for drained listings.
    pub page_size: u32,
    /// Maximum pages drained from one listing.
    pub max_pages: u32,
    /// Maximum response body size in bytes.
    pub max_response_bytes: usize,
    /// Whether mutations are permitted.
    pub allow_write: bool,
    /// User agent sent upstream.
    pub user_agent: String,
}

impl Default for ApiEngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_ms: 15_000,
            page_size: 200,
            max_pages: 1_000,
            max_response_bytes: 16 * 1024 * 1024,
            allow_write: false,
            user_agent: concat!("db-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while talking to the upstream API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiEngineError {
    /// Invalid client configuration.
    #[error("invalid api config: {0}")]
    Invalid(String),
    /// Transport failure.
    #[error("api request failed: {0}")]
    Transport(String),
    /// Upstream returned a non-2xx status.
    #[error("{0}")]
    Status(String),
    /// Upstream body could not be read or decoded.
    #[error("api response invalid: {0}")]
    Decode(String),
}

impl From<ApiEngineError> for EngineError {
    fn from(error: ApiEngineError) -> Self {
        Self::Backend(error.to_string())
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Blocking JSON client bound to one upstream base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Parsed base URL.
    base: Url,
    /// Optional bearer token.
    token: Option<String>,
    /// Response size limit.
    max_response_bytes: usize,
    /// Underlying HTTP client.
    http: Client,
}

impl ApiClient {
    /// Builds a client from engine configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiEngineError::Invalid`] when the base URL is missing,
    /// malformed, not `http`/`https`, or the HTTP client cannot be built.
    pub fn new(config: &ApiEngineConfig) -> Result<Self, ApiEngineError> {
        let trimmed = config.base_url.trim();
        if trimmed.is_empty() {
            return Err(ApiEngineError::Invalid("api base url is required".to_string()));
        }
        let base = Url::parse(trimmed.trim_end_matches('/'))
            .map_err(|err| ApiEngineError::Invalid(format!("api base url: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ApiEngineError::Invalid("api base url must use http or https".to_string()));
        }
        if base.cannot_be_a_base() {
            return Err(ApiEngineError::Invalid("api base url cannot be a base".to_string()));
        }
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|_| ApiEngineError::Invalid("http client build failed".to_string()))?;
        let token = config.token.as_deref().map(str::trim).filter(|token| !token.is_empty());
        Ok(Self {
            base,
            token: token.map(str::to_string),
            max_response_bytes: config.max_response_bytes,
            http,
        })
    }

    /// Builds an endpoint URL from encoded path segments and query pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ApiEngineError::Invalid`] when the base cannot take segments.
    pub fn endpoint(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Url, ApiEngineError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiEngineError::Invalid("api base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Issues a GET and decodes the JSON body; an empty body decodes as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiEngineError`] on transport failure, non-2xx status, size
    /// overflow, or invalid JSON.
    pub fn get_json(&self, url: Url) -> Result<Value, ApiEngineError> {
        let body = self.send(Method::GET, url, None)?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body).map_err(|err| ApiEngineError::Decode(err.to_string()))
    }

    /// Issues a request with an optional JSON body and returns the raw body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiEngineError`] on transport failure, non-2xx status, or
    /// size overflow.
    pub fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Vec<u8>, ApiEngineError> {
        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, APPLICATION_JSON)
            .header(CONTENT_TYPE, APPLICATION_JSON);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|err| ApiEngineError::Decode(err.to_string()))?;
            request = request.body(bytes);
        }
        let mut response = request.send().map_err(|err| ApiEngineError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&mut response));
        }
        read_response_limited(&mut response, self.max_response_bytes)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the error for a non-2xx response with a bounded body excerpt.
fn status_error(response: &mut Response) -> ApiEngineError {
    let status = response.status();
    let mut buf = Vec::new();
    let limit = u64::try_from(MAX_ERROR_BODY_BYTES).unwrap_or(u64::MAX);
    let _ = response.take(limit).read_to_end(&mut buf);
    let excerpt = String::from_utf8_lossy(&buf);
    let excerpt = excerpt.trim();
    if excerpt.is_empty() {
        ApiEngineError::Status(format!("api error: {status}"))
    } else {
        ApiEngineError::Status(format!("api error: {status}: {excerpt}"))
    }
}

/// Reads the response body while enforcing a byte limit.
fn read_response_limited(response: &mut Response, max_bytes: usize) -> Result<Vec<u8>, ApiEngineError> {
    let max_bytes_u64 = u64::try_from(max_bytes)
        .map_err(|_| ApiEngineError::Decode("response size limit exceeds u64".to_string()))?;
    if let Some(expected) = response.content_length()
        && expected > max_bytes_u64
    {
        return Err(ApiEngineError::Decode("response exceeds size limit".to_string()));
    }
    let mut buf = Vec::new();
    response
        .take(max_bytes_u64.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|err| ApiEngineError::Decode(format!("failed to read response: {err}")))?;
    if buf.len() > max_bytes {
        return Err(ApiEngineError::Decode("response exceeds size limit".to_string()));
    }
    Ok(buf)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    fn client(base_url: &str) -> Result<ApiClient, ApiEngineError> {
        ApiClient::new(&ApiEngineConfig {
            base_url: base_url.to_string(),
            ..ApiEngineConfig::default()
        })
    }

    #[test]
    fn base_url_is_required_and_scheme_checked() {
        assert!(matches!(client("  "), Err(ApiEngineError::Invalid(_))));
        assert!(matches!(client("ftp://example.com"), Err(ApiEngineError::Invalid(_))));
        assert!(matches!(client("not a url"), Err(ApiEngineError::Invalid(_))));
    }

    #[test]
    fn endpoint_encodes_segments_under_base_path() {
        let client = client("http://127.0.0.1:9/prefix/").unwrap();
        let url = client.endpoint(&["api", "Cards", "a/b c"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/prefix/api/Cards/a%2Fb%20c");
        let url = client.endpoint(&["api", "Users"], &[("page", "2".to_string())]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9/prefix/api/Users?page=2");
    }
}
