//! In-process implementation of the CacheStore trait

use crate::agent::{CacheEntry, CacheError, CacheGeneration, CacheKey, CacheStore};
use chrono::{DateTime, Utc};
use fincache_proto::ResponseSnapshot;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

struct MemoryGeneration {
    created_at: DateTime<Utc>,
    entries: HashMap<CacheKey, (ResponseSnapshot, DateTime<Utc>)>,
}

impl MemoryGeneration {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            entries: HashMap::new(),
        }
    }
}

/// Memory-backed implementation of CacheStore
///
/// Nothing is written to disk; the cache lives as long as the process.
#[derive(Default)]
pub struct MemoryCacheStore {
    generations: Mutex<BTreeMap<String, MemoryGeneration>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, MemoryGeneration>>, CacheError> {
        self.generations.lock().map_err(|_| CacheError::Poisoned)
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, name: &str) -> Result<CacheGeneration, CacheError> {
        let mut generations = self.lock()?;
        let generation = generations
            .entry(name.to_string())
            .or_insert_with(MemoryGeneration::new);
        Ok(CacheGeneration {
            name: name.to_string(),
            created_at: generation.created_at,
        })
    }

    async fn lookup(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let generations = self.lock()?;
        Ok(generations
            .get(&generation.name)
            .and_then(|g| g.entries.get(key))
            .map(|(response, stored_at)| CacheEntry {
                key: key.clone(),
                response: response.clone(),
                generation: generation.name.clone(),
                stored_at: *stored_at,
            }))
    }

    async fn put(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<(), CacheError> {
        let mut generations = self.lock()?;
        generations
            .entry(generation.name.clone())
            .or_insert_with(MemoryGeneration::new)
            .entries
            .insert(key.clone(), (response, Utc::now()));
        debug!("Stored {} in {}", key, generation.name);
        Ok(())
    }

    async fn generation_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn keys(&self, generation: &CacheGeneration) -> Result<Vec<CacheKey>, CacheError> {
        let generations = self.lock()?;
        let mut keys: Vec<CacheKey> = generations
            .get(&generation.name)
            .map(|g| g.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn entry_count(&self, generation: &CacheGeneration) -> Result<u64, CacheError> {
        Ok(self
            .lock()?
            .get(&generation.name)
            .map(|g| g.entries.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, CacheError> {
        Ok(self.lock()?.remove(name).is_some())
    }

    async fn delete_prefix(
        &self,
        generation: &CacheGeneration,
        target_prefix: &str,
    ) -> Result<u64, CacheError> {
        let mut generations = self.lock()?;
        let Some(g) = generations.get_mut(&generation.name) else {
            return Ok(0);
        };
        let before = g.entries.len();
        g.entries.retain(|key, _| !key.target().starts_with(target_prefix));
        Ok((before - g.entries.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64, CacheError> {
        let mut generations = self.lock()?;
        let removed = generations.values().map(|g| g.entries.len() as u64).sum();
        generations.clear();
        Ok(removed)
    }

    fn storage_type(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(body: &[u8]) -> ResponseSnapshot {
        ResponseSnapshot::new(
            200,
            vec![("content-type".to_string(), "application/javascript".to_string())],
            body.to_vec(),
        )
    }

    #[tokio::test]
    async fn test_put_then_lookup_is_identical() {
        let store = MemoryCacheStore::new();
        let generation = store.open("fincache-v1").await.unwrap();
        let key = CacheKey::get("/_next/static/chunk.js");

        store.put(&generation, &key, snapshot(b"console.log(1)")).await.unwrap();

        let entry = store.lookup(&generation, &key).await.unwrap().unwrap();
        assert_eq!(entry.response, snapshot(b"console.log(1)"));
        assert_eq!(entry.generation, "fincache-v1");
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let store = MemoryCacheStore::new();
        let first = store.open("fincache-v1").await.unwrap();
        store.put(&first, &CacheKey::get("/"), snapshot(b"x")).await.unwrap();

        let second = store.open("fincache-v1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.entry_count(&second).await.unwrap(), 1);
        assert_eq!(store.generation_names().await.unwrap(), vec!["fincache-v1"]);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryCacheStore::new();
        let generation = store.open("g").await.unwrap();
        let key = CacheKey::get("/api/categories");

        store.put(&generation, &key, snapshot(b"old")).await.unwrap();
        store.put(&generation, &key, snapshot(b"new")).await.unwrap();

        let entry = store.lookup(&generation, &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body, b"new");
        assert_eq!(store.entry_count(&generation).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_generations_except() {
        let store = MemoryCacheStore::new();
        let g1 = store.open("fincache-v1").await.unwrap();
        let g2 = store.open("fincache-v2").await.unwrap();
        store.put(&g1, &CacheKey::get("/"), snapshot(b"1")).await.unwrap();

        let deleted = store.delete_generations_except("fincache-v2").await.unwrap();

        assert_eq!(deleted, vec!["fincache-v1"]);
        assert_eq!(store.generation_names().await.unwrap(), vec![g2.name.clone()]);
        assert!(store.lookup(&g1, &CacheKey::get("/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store = MemoryCacheStore::new();
        let generation = store.open("g").await.unwrap();
        for target in ["/api/categories", "/api/categories/2", "/api/ping", "/"] {
            store.put(&generation, &CacheKey::get(target), snapshot(b"x")).await.unwrap();
        }

        let removed = store.delete_prefix(&generation, "/api/categories").await.unwrap();

        assert_eq!(removed, 2);
        let keys = store.keys(&generation).await.unwrap();
        assert_eq!(keys, vec![CacheKey::get("/"), CacheKey::get("/api/ping")]);
    }

    #[tokio::test]
    async fn test_delete_all_and_put_recreates() {
        let store = MemoryCacheStore::new();
        let generation = store.open("g").await.unwrap();
        store.put(&generation, &CacheKey::get("/a.png"), snapshot(b"x")).await.unwrap();
        store.put(&generation, &CacheKey::get("/b.png"), snapshot(b"y")).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert_eq!(store.entry_count(&generation).await.unwrap(), 0);
        assert!(store.generation_names().await.unwrap().is_empty());

        store.put(&generation, &CacheKey::get("/a.png"), snapshot(b"x")).await.unwrap();
        assert_eq!(store.entry_count(&generation).await.unwrap(), 1);
    }
}
