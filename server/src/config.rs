//! Environment-driven agent configuration

use crate::agent::AgentRequest;
use crate::agent::manifest::PrecacheManifest;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8724";
pub const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:3000";
pub const DEFAULT_CACHE_PREFIX: &str = "fincache";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

/// Error type for configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Runtime settings for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen_addr: SocketAddr,
    pub upstream: String,
    pub cache_version: String,
    pub cache_prefix: String,
    /// `None` keeps the cache in memory
    pub storage_dir: Option<PathBuf>,
    pub precache: PrecacheManifest,
    pub skip_waiting: bool,
    pub upstream_timeout: Duration,
}

impl AgentConfig {
    /// Load from `FINCACHE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let listen_addr = var("FINCACHE_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "FINCACHE_LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        let upstream = var("FINCACHE_UPSTREAM").unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());
        url::Url::parse(&upstream).map_err(|e| ConfigError::Invalid {
            var: "FINCACHE_UPSTREAM",
            reason: e.to_string(),
        })?;

        let cache_prefix =
            var("FINCACHE_CACHE_PREFIX").unwrap_or_else(|| DEFAULT_CACHE_PREFIX.to_string());

        let precache = match var("FINCACHE_PRECACHE") {
            Some(csv) => PrecacheManifest::from_csv(&csv),
            None => PrecacheManifest::default(),
        };
        for path in &precache.paths {
            AgentRequest::get(path).map_err(|e| ConfigError::Invalid {
                var: "FINCACHE_PRECACHE",
                reason: e.to_string(),
            })?;
        }

        let skip_waiting = match var("FINCACHE_SKIP_WAITING") {
            Some(value) => parse_bool(&value).ok_or_else(|| ConfigError::Invalid {
                var: "FINCACHE_SKIP_WAITING",
                reason: format!("expected a boolean, got {:?}", value),
            })?,
            None => false,
        };

        let timeout_secs = match var("FINCACHE_UPSTREAM_TIMEOUT_SECS") {
            Some(value) => value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: "FINCACHE_UPSTREAM_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };

        Ok(Self {
            listen_addr,
            upstream,
            cache_version: var("FINCACHE_CACHE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            cache_prefix,
            storage_dir: var("FINCACHE_STORAGE_DIR").map(PathBuf::from),
            precache,
            skip_waiting,
            upstream_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
