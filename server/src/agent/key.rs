//! Cache key derivation and body digests

use crate::agent::RequestError;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

// Only used to resolve relative targets; never contacted
const KEY_BASE: &str = "http://fincache.invalid/";

/// Normalized request identity: method plus origin-relative target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    method: String,
    target: String,
}

impl CacheKey {
    pub fn new(method: &Method, target: &str) -> Self {
        Self {
            method: method.as_str().to_ascii_uppercase(),
            target: normalize_target(target),
        }
    }

    /// Key for a GET of `target`
    pub fn get(target: &str) -> Self {
        Self::new(&Method::GET, target)
    }

    /// Rebuild a key from its stored parts without re-normalizing
    pub(crate) fn from_parts(method: String, target: String) -> Self {
        Self { method, target }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.target)
    }
}

/// Reduce a request target to its canonical path plus query
///
/// Absolute URLs lose their origin, fragments are dropped, dot-segments are
/// resolved and an empty query is removed.
pub fn normalize_target(target: &str) -> String {
    let parsed = if target.starts_with("http://") || target.starts_with("https://") {
        Url::parse(target)
    } else {
        Url::parse(KEY_BASE).and_then(|base| base.join(target))
    };

    match parsed {
        Ok(url) => {
            let mut normalized = url.path().to_string();
            if let Some(query) = url.query().filter(|q| !q.is_empty()) {
                normalized.push('?');
                normalized.push_str(query);
            }
            normalized
        }
        // Unparseable targets still get a stable key
        Err(_) => target.split('#').next().unwrap_or(target).to_string(),
    }
}

/// Canonical form of an origin-relative request target
///
/// Unreserved percent-escapes are decoded before dot-segments are resolved,
/// so `/%61pi/x` and `/_next/../api/x` both become `/api/x`. Targets that
/// could address another host or hide a path separator are rejected.
pub fn canonical_target(target: &str) -> Result<String, RequestError> {
    let invalid = |reason: &'static str| RequestError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let without_fragment = target.split('#').next().unwrap_or(target);
    if !without_fragment.starts_with('/') || without_fragment.starts_with("//") {
        return Err(invalid("not a single origin-relative path"));
    }
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };
    if path.contains('\\') {
        return Err(invalid("backslash in path"));
    }

    let mut decoded = decode_unreserved(path).map_err(invalid)?;
    if let Some(query) = query {
        decoded.push('?');
        decoded.push_str(query);
    }

    let base = Url::parse(KEY_BASE).map_err(|_| invalid("unparseable path"))?;
    let url = base.join(&decoded).map_err(|_| invalid("unparseable path"))?;
    if url.origin() != base.origin() {
        return Err(invalid("not a single origin-relative path"));
    }

    let mut canonical = url.path().to_string();
    if canonical.starts_with("//") {
        return Err(invalid("empty leading path segment"));
    }
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        canonical.push('?');
        canonical.push_str(query);
    }
    Ok(canonical)
}

// Decode %XX escapes of unreserved characters; keep the rest, uppercased
fn decode_unreserved(path: &str) -> Result<String, &'static str> {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
            let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
            if let (Some(hi), Some(lo)) = (hi, lo) {
                let byte = (hi * 16 + lo) as u8;
                if byte == b'/' || byte == b'\\' {
                    return Err("encoded path separator");
                }
                if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
                    out.push(byte);
                } else {
                    out.extend_from_slice(format!("%{:02X}", byte).as_bytes());
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).map_err(|_| "invalid UTF-8 in path")
}

/// Compute the SHA-256 hex digest of a response body
pub fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
