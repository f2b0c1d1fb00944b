//! SQLite implementation of the CacheStore trait

use crate::agent::key::sha256;
use crate::agent::{CacheEntry, CacheError, CacheGeneration, CacheKey, CacheStore};
use chrono::{DateTime, Utc};
use fincache_proto::{ResponseSnapshot, decode_snapshot, encode_snapshot};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// SQLite-backed implementation of CacheStore
///
/// Responses are stored as encoded snapshot blobs next to a SHA-256 digest
/// of the body, which is checked again on every read.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Create a new SQLite cache store
    ///
    /// If the database doesn't exist, it will be created with the required schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn.lock().map_err(|_| CacheError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.lock()?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS generations (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // One row per (generation, method, target); snapshot is the encoded response
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                generation TEXT NOT NULL,
                method TEXT NOT NULL,
                target TEXT NOT NULL,
                status INTEGER NOT NULL,
                body_sha256 TEXT NOT NULL,
                snapshot BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (generation, method, target)
            )
            "#,
            [],
        )?;

        info!("Cache store database schema initialized");
        Ok(())
    }

    fn ensure_generation(conn: &Connection, name: &str) -> Result<DateTime<Utc>, CacheError> {
        conn.execute(
            "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
            params![name, Utc::now().to_rfc3339()],
        )?;
        let created_at: String = conn.query_row(
            "SELECT created_at FROM generations WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        parse_timestamp(&created_at)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CacheError::Database(format!("Invalid timestamp {:?}: {}", value, e)))
}

#[async_trait::async_trait]
impl CacheStore for SqliteCacheStore {
    async fn open(&self, name: &str) -> Result<CacheGeneration, CacheError> {
        let conn = self.lock()?;
        let created_at = Self::ensure_generation(&conn, name)?;
        Ok(CacheGeneration {
            name: name.to_string(),
            created_at,
        })
    }

    async fn lookup(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
    ) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                r#"
                SELECT body_sha256, snapshot, stored_at FROM entries
                WHERE generation = ?1 AND method = ?2 AND target = ?3
                "#,
                params![generation.name, key.method(), key.target()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((expected, blob, stored_at)) = row else {
            return Ok(None);
        };

        let (_, response) = decode_snapshot(&blob).map_err(|e| CacheError::Codec(e.to_string()))?;
        let actual = sha256(&response.body);
        if actual != expected {
            return Err(CacheError::HashMismatch {
                key: key.to_string(),
                expected,
                actual,
            });
        }

        Ok(Some(CacheEntry {
            key: key.clone(),
            response,
            generation: generation.name.clone(),
            stored_at: parse_timestamp(&stored_at)?,
        }))
    }

    async fn put(
        &self,
        generation: &CacheGeneration,
        key: &CacheKey,
        response: ResponseSnapshot,
    ) -> Result<(), CacheError> {
        let now = Utc::now();
        let blob = encode_snapshot(&response, now.timestamp_millis().max(0) as u64)
            .map_err(|e| CacheError::Codec(e.to_string()))?;
        let digest = sha256(&response.body);

        let conn = self.lock()?;
        Self::ensure_generation(&conn, &generation.name)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO entries
                (generation, method, target, status, body_sha256, snapshot, stored_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                generation.name,
                key.method(),
                key.target(),
                response.status as i64,
                digest,
                blob,
                now.to_rfc3339()
            ],
        )?;

        debug!(
            "Stored {} in {} (sha256={}, {} bytes)",
            key,
            generation.name,
            &digest[..16],
            response.body.len()
        );
        Ok(())
    }

    async fn generation_names(&self) -> Result<Vec<String>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn keys(&self, generation: &CacheGeneration) -> Result<Vec<CacheKey>, CacheError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT method, target FROM entries WHERE generation = ?1 ORDER BY method, target",
        )?;
        let keys = stmt
            .query_map(params![generation.name], |row| {
                Ok(CacheKey::from_parts(row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    async fn entry_count(&self, generation: &CacheGeneration) -> Result<u64, CacheError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE generation = ?1",
            params![generation.name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn delete_generation(&self, name: &str) -> Result<bool, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries WHERE generation = ?1", params![name])?;
        let existed = tx.execute("DELETE FROM generations WHERE name = ?1", params![name])? > 0;
        tx.commit()?;
        Ok(existed)
    }

    async fn delete_prefix(
        &self,
        generation: &CacheGeneration,
        target_prefix: &str,
    ) -> Result<u64, CacheError> {
        let conn = self.lock()?;
        // substr instead of LIKE so `%` and `_` in the prefix are literal
        let removed = conn.execute(
            r#"
            DELETE FROM entries
            WHERE generation = ?1 AND substr(target, 1, length(?2)) = ?2
            "#,
            params![generation.name, target_prefix],
        )?;
        Ok(removed as u64)
    }

    async fn delete_all(&self) -> Result<u64, CacheError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM entries", [])?;
        tx.execute("DELETE FROM generations", [])?;
        tx.commit()?;
        Ok(removed as u64)
    }

    fn storage_type(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteCacheStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCacheStore::new(temp_dir.path().join("cache.db")).unwrap();
        (store, temp_dir)
    }

    fn snapshot(body: &[u8]) -> ResponseSnapshot {
        ResponseSnapshot::new(
            200,
            vec![
                ("content-type".to_string(), "image/png".to_string()),
                ("etag".to_string(), "\"v1\"".to_string()),
            ],
            body.to_vec(),
        )
    }

    #[tokio::test]
    async fn test_put_then_lookup_is_identical() {
        let (store, _temp_dir) = test_store();
        let generation = store.open("fincache-v1").await.unwrap();
        let key = CacheKey::get("/icons/icon-192x192.png");
        let body = [0x89, b'P', b'N', b'G', 0x00, 0xff];

        store.put(&generation, &key, snapshot(&body)).await.unwrap();

        let entry = store.lookup(&generation, &key).await.unwrap().unwrap();
        assert_eq!(entry.response, snapshot(&body));
        assert_eq!(entry.key, key);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("cache.db");
        {
            let store = SqliteCacheStore::new(&db_path).unwrap();
            let generation = store.open("fincache-v1").await.unwrap();
            store.put(&generation, &CacheKey::get("/"), snapshot(b"<html>")).await.unwrap();
        }

        let store = SqliteCacheStore::new(&db_path).unwrap();
        let generation = store.open("fincache-v1").await.unwrap();
        assert_eq!(store.entry_count(&generation).await.unwrap(), 1);
        assert_eq!(store.keys(&generation).await.unwrap(), vec![CacheKey::get("/")]);
    }

    #[tokio::test]
    async fn test_tampered_body_is_reported() {
        let (store, _temp_dir) = test_store();
        let generation = store.open("g").await.unwrap();
        let key = CacheKey::get("/logo.svg");
        store.put(&generation, &key, snapshot(b"<svg/>")).await.unwrap();

        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE entries SET body_sha256 = 'bogus'", []).unwrap();
        }

        assert!(matches!(
            store.lookup(&generation, &key).await,
            Err(CacheError::HashMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_generations_except() {
        let (store, _temp_dir) = test_store();
        let g1 = store.open("fincache-v1").await.unwrap();
        store.open("fincache-v2").await.unwrap();
        store.put(&g1, &CacheKey::get("/"), snapshot(b"old")).await.unwrap();

        let deleted = store.delete_generations_except("fincache-v2").await.unwrap();

        assert_eq!(deleted, vec!["fincache-v1"]);
        assert_eq!(store.generation_names().await.unwrap(), vec!["fincache-v2"]);
        assert_eq!(store.entry_count(&g1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_prefix_is_literal() {
        let (store, _temp_dir) = test_store();
        let generation = store.open("g").await.unwrap();
        for target in ["/api/categories", "/api/categories/1", "/api/c_tegories", "/"] {
            store.put(&generation, &CacheKey::get(target), snapshot(b"x")).await.unwrap();
        }

        let removed = store.delete_prefix(&generation, "/api/categories").await.unwrap();

        assert_eq!(removed, 2);
        assert_eq!(store.entry_count(&generation).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (store, _temp_dir) = test_store();
        let g1 = store.open("g1").await.unwrap();
        let g2 = store.open("g2").await.unwrap();
        store.put(&g1, &CacheKey::get("/a.png"), snapshot(b"a")).await.unwrap();
        store.put(&g2, &CacheKey::get("/b.png"), snapshot(b"b")).await.unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store.generation_names().await.unwrap().is_empty());
        assert_eq!(store.entry_count(&g1).await.unwrap(), 0);
    }
}
