//! Precache manifest: core assets installed with every generation

use crate::agent::{AgentRequest, RequestError};
use serde::{Deserialize, Serialize};

/// Paths installed unconditionally when a generation is installed
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/manifest.json",
    "/favicon.ico",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

/// Fixed list of paths fetched during install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecacheManifest {
    pub paths: Vec<String>,
}

impl PrecacheManifest {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }

    /// Parse a comma-separated list, ignoring blanks and duplicates
    pub fn from_csv(value: &str) -> Self {
        let mut paths: Vec<String> = Vec::new();
        for path in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// GET requests for every manifest path, paired with the path as listed
    pub fn requests(&self) -> impl Iterator<Item = (&str, Result<AgentRequest, RequestError>)> + '_ {
        self.paths
            .iter()
            .map(|path| (path.as_str(), AgentRequest::get(path)))
    }
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self::new(DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect())
    }
}
