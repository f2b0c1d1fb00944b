//! Test doubles for the network and the cache store

use crate::agent::fetcher::Network;
use crate::agent::memory::MemoryCacheStore;
use crate::agent::{
    AgentRequest, AgentResponse, CacheEntry, CacheError, CacheGeneration, CacheKey, CacheStore,
    NetworkError,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use fincache_proto::ResponseSnapshot;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Scripted network: per-target responses, a global offline switch and a call log
#[derive(Default)]
pub struct StubNetwork {
    routes: Mutex<HashMap<String, (StatusCode, String, Vec<u8>)>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl StubNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, target: &str, status: StatusCode, content_type: &str, body: &[u8]) {
        self.routes.lock().unwrap().insert(
            target.to_string(),
            (status, content_type.to_string(), body.to_vec()),
        );
    }

    pub fn ok(&self, target: &str, content_type: &str, body: &[u8]) {
        self.route(target, StatusCode::OK, content_type, body);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Network for StubNetwork {
    async fn fetch(&self, request: &AgentRequest) -> Result<AgentResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log
            .lock()
            .unwrap()
            .push(format!("{} {}", request.method, request.target()));

        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Transport("connection refused".into()));
        }

        let routes = self.routes.lock().unwrap();
        match routes.get(request.target()) {
            Some((status, content_type, body)) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_str(content_type).unwrap(),
                );
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
                headers.insert(header::ETAG, HeaderValue::from_static("\"stub\""));
                Ok(AgentResponse::new(*status, headers, body.clone()))
            }
            None => Ok(AgentResponse::new(
                StatusCode::NOT_FOUND,
                HeaderMap::new(),
                b"not found".to_vec(),
            )),
        }
    }
}

/// Memory store that records every `put` and can be switched into failure mode
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCacheStore,
    puts: Mutex<Vec<CacheKey>>,
    failing: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puts(&self) -> Vec<CacheKey> {
        self.puts.lock().unwrap().clone()
    }

    /// Make every subsequent operation fail like an unavailable database
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Database("quota exceeded".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for RecordingStore {
    async fn open(&self, name: &str) -> Result<CacheGeneration, CacheError> {
        self.check()?;
        self.inner.open(name).await
    }

    async fn lookup(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        self.check()?;
        self.inner.lookup(generation, key).await
    }

    async fn put(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<(), CacheError> {
        self.puts.lock().unwrap().push(key.clone());
        self.check()?;
        self.inner.put(generation, key, response).await
    }

    async fn generation_names(&self) -> Result<Vec<String>, CacheError> {
        self.check()?;
        self.inner.generation_names().await
    }

    async fn keys(&self, generation: &CacheGeneration) -> Result<Vec<CacheKey>, CacheError> {
        self.check()?;
        self.inner.keys(generation).await
    }

    async fn entry_count(&self, generation: &CacheGeneration) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.entry_count(generation).await
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, CacheError> {
        self.check()?;
        self.inner.delete_generation(name).await
    }

    async fn delete_prefix(
        &self,
        generation: &CacheGeneration,
        target_prefix: &str,
    ) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.delete_prefix(generation, target_prefix).await
    }

    async fn delete_all(&self) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.delete_all().await
    }

    fn storage_type(&self) -> &str {
        "recording"
    }
}
