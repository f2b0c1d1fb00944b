//! Offline-continuity caching agent
//!
//! This module holds the request-interception core: classification of
//! intercepted requests, the generation-scoped cache store abstraction,
//! per-class caching strategies, the install/activate lifecycle and the
//! synthesized offline responses.

pub mod classify;
pub mod control;
pub mod fetcher;
pub mod key;
pub mod lifecycle;
pub mod manifest;
pub mod memory;
pub mod offline;
pub mod sqlite;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use fincache_proto::ResponseSnapshot;
use thiserror::Error;
use tracing::warn;

pub use key::CacheKey;

/// Error type for cache store operations
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Snapshot codec error: {0}")]
    Codec(String),

    #[error("Hash mismatch for {key}: expected {expected}, got {actual}")]
    HashMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid stored response: {0}")]
    InvalidSnapshot(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}

/// Error type for upstream fetches
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Upstream unreachable: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),

    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to read upstream body: {0}")]
    Body(String),
}

/// Error type for intercepted requests the agent refuses to handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid request target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: &'static str },
}

/// One versioned instance of the cache store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
    /// `<prefix>-<version>`
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Build the generation name for a version tag
pub fn generation_name(prefix: &str, version: &str) -> String {
    format!("{}-{}", prefix, version)
}

/// A stored response together with where and when it was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: ResponseSnapshot,
    pub generation: String,
    pub stored_at: DateTime<Utc>,
}

/// Trait for generation-scoped response storage
///
/// Every operation is an optimization from the caller's point of view:
/// callers log failures and carry on as if the entry were missing or the
/// write had been skipped.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Open (creating if absent) the named generation
    async fn open(&self, name: &str) -> Result<CacheGeneration, CacheError>;

    /// Look up a stored response. Has no side effects.
    async fn lookup(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError>;

    /// Store a response, overwriting any existing entry for the key
    ///
    /// Recreates the generation if it has been deleted in the meantime.
    async fn put(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<(), CacheError>;

    /// Names of every generation present in the store
    async fn generation_names(&self) -> Result<Vec<String>, CacheError>;

    /// Keys stored in a generation
    async fn keys(&self, generation: &CacheGeneration) -> Result<Vec<CacheKey>, CacheError>;

    /// Number of live entries in a generation (0 if it doesn't exist)
    async fn entry_count(&self, generation: &CacheGeneration) -> Result<u64, CacheError>;

    /// Delete a generation and all its entries. Returns whether it existed.
    async fn delete_generation(&self, name: &str) -> Result<bool, CacheError>;

    /// Delete every entry of a generation whose target starts with `target_prefix`
    async fn delete_prefix(
        &self,
        generation: &CacheGeneration,
        target_prefix: &str,
    ) -> Result<u64, CacheError>;

    /// Delete every generation. Returns the number of entries removed.
    async fn delete_all(&self) -> Result<u64, CacheError>;

    /// Storage type identifier (e.g. "memory", "sqlite")
    fn storage_type(&self) -> &str;

    /// Delete every generation except `keep`, returning the deleted names
    async fn delete_generations_except(&self, keep: &str) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.generation_names().await? {
            if name != keep && self.delete_generation(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}

// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// An intercepted request
///
/// The target is canonical from construction on: classification, cache keys
/// and the upstream fetch all see the same path.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub method: Method,
    uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AgentRequest {
    /// Build a request from its parts, canonicalizing the target
    ///
    /// Any authority in `uri` is ignored; the upstream is fixed.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Result<Self, RequestError> {
        let raw = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .ok_or_else(|| RequestError::InvalidTarget {
                target: uri.to_string(),
                reason: "missing path",
            })?;
        let canonical = key::canonical_target(raw)?;
        let uri = canonical
            .parse::<Uri>()
            .map_err(|_| RequestError::InvalidTarget {
                target: raw.to_string(),
                reason: "not a valid URI",
            })?;

        Ok(Self {
            method,
            uri,
            headers,
            body,
        })
    }

    /// A bodiless GET for an origin-relative target
    pub fn get(target: &str) -> Result<Self, RequestError> {
        let uri = target
            .parse::<Uri>()
            .map_err(|_| RequestError::InvalidTarget {
                target: target.to_string(),
                reason: "not a valid URI",
            })?;
        Self::new(Method::GET, uri, HeaderMap::new(), Bytes::new())
    }

    /// Same request marked as a top-level navigation
    pub fn navigation(mut self) -> Self {
        self.headers
            .insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
        self.headers
            .insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Origin-relative path plus query, as sent to the upstream
    pub fn target(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    /// Whether the client declared this to be a top-level document load
    pub fn is_navigation(&self) -> bool {
        self.headers
            .get("sec-fetch-mode")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("navigate"))
    }

    /// Whether the declared acceptable content types include HTML
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"))
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, self.target())
    }
}

/// A response produced by the network, the cache or the offline responder
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AgentResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// True for 2xx statuses
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn to_snapshot(&self) -> ResponseSnapshot {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        ResponseSnapshot::new(self.status.as_u16(), headers, self.body.to_vec())
    }

    pub fn from_snapshot(snapshot: ResponseSnapshot) -> Result<Self, CacheError> {
        let status = StatusCode::from_u16(snapshot.status)
            .map_err(|e| CacheError::InvalidSnapshot(e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(snapshot.headers.len());
        for (name, value) in &snapshot.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!("Dropping unrepresentable stored header {:?}", name),
            }
        }

        Ok(Self::new(status, headers, snapshot.body))
    }
}

impl IntoResponse for AgentResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
