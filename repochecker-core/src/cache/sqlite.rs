//! SQLite implementation of `CacheStore`.
//!
//! This is the durable backend that lets repeated runs share build status
//! lookups.
//!
//! # Schema Versioning
//!
//! The database uses SQLite's `user_version` pragma to track the schema
//! version. When the schema changes, increment `SCHEMA_VERSION` and add a
//! migration step in `run_migrations`.
//!
//! There is no cross-process locking beyond SQLite's own; concurrent runs of
//! the checker must be serialized externally.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use super::{CacheEntry, CacheStore};
use crate::error::CacheError;

/// Current schema version. Increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed cache store.
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a `Mutex`; every
/// call runs on the blocking pool via `tokio::task::spawn_blocking`.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open or create the cache database at `path`.
    ///
    /// Creates the parent directory when needed.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();

        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        CacheError::storage(
                            "create cache directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| CacheError::storage("open database", e.to_string()))?;

        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| CacheError::storage("configure pragmas", e.to_string()))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn new_in_memory() -> Result<Self, CacheError> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<(), CacheError> {
        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(|e| CacheError::storage("get schema version", e.to_string()))?;

        if current_version > SCHEMA_VERSION {
            return Err(CacheError::storage(
                "schema version",
                format!(
                    "cache schema version {} is newer than supported version {}",
                    current_version, SCHEMA_VERSION
                ),
            ));
        }

        if current_version < SCHEMA_VERSION {
            Self::run_migrations(conn, current_version)?;
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .map_err(|e| CacheError::storage("update schema version", e.to_string()))?;
        }

        Ok(())
    }

    fn run_migrations(conn: &Connection, from_version: i32) -> Result<(), CacheError> {
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS memo_entries (
                    key TEXT PRIMARY KEY,
                    stored_at INTEGER NOT NULL,
                    value TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_memo_stored_at
                    ON memo_entries(stored_at);
                "#,
            )
            .map_err(|e| CacheError::storage("migration v1", e.to_string()))?;
        }

        Ok(())
    }

    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("mutex poisoned");
            f(&conn)
        })
        .await
        .map_err(|e| CacheError::storage(operation, e.to_string()))?
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| CacheError::Corruption(format!("timestamp {} out of range", millis)))
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = key.to_string();
        self.blocking("get", move |conn| {
            let row: Option<(i64, String)> = conn
                .query_row(
                    "SELECT stored_at, value FROM memo_entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| CacheError::storage("get", e.to_string()))?;

            match row {
                Some((stored_at, value)) => Ok(Some(CacheEntry {
                    stored_at: from_millis(stored_at)?,
                    value,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let key = key.to_string();
        self.blocking("put", move |conn| {
            conn.execute(
                "INSERT INTO memo_entries (key, stored_at, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     stored_at = excluded.stored_at,
                     value = excluded.value",
                params![key, to_millis(entry.stored_at), entry.value],
            )
            .map_err(|e| CacheError::storage("put", e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn len(&self) -> Result<usize, CacheError> {
        self.blocking("len", |conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM memo_entries", [], |row| row.get(0))
                .map_err(|e| CacheError::storage("len", e.to_string()))?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    async fn evict_oldest(&self, count: usize) -> Result<usize, CacheError> {
        if count == 0 {
            return Ok(0);
        }
        let removed = self
            .blocking("evict", move |conn| {
                conn.execute(
                    "DELETE FROM memo_entries WHERE key IN (
                         SELECT key FROM memo_entries
                         ORDER BY stored_at ASC, key ASC
                         LIMIT ?1
                     )",
                    params![count as i64],
                )
                .map_err(|e| CacheError::storage("evict", e.to_string()))
            })
            .await?;

        if removed < count {
            warn!("Asked to evict {} cache entries, removed {}", count, removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePolicy, ManualClock, MemoCache};
    use chrono::{Duration, TimeZone};

    fn at(offset_secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing() {
        let store = SqliteCacheStore::new_in_memory().unwrap();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips_timestamp() {
        let store = SqliteCacheStore::new_in_memory().unwrap();
        let entry = CacheEntry {
            stored_at: at(42),
            value: "{\"repositories\":[]}".to_string(),
        };
        store.put("k", entry.clone()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_row() {
        let store = SqliteCacheStore::new_in_memory().unwrap();
        store
            .put("k", CacheEntry { stored_at: at(1), value: "1".to_string() })
            .await
            .unwrap();
        store
            .put("k", CacheEntry { stored_at: at(2), value: "2".to_string() })
            .await
            .unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, "2");
    }

    #[tokio::test]
    async fn test_evict_oldest() {
        let store = SqliteCacheStore::new_in_memory().unwrap();
        for (i, key) in ["c", "a", "b"].iter().enumerate() {
            let offset = match *key {
                "a" => 1,
                "b" => 2,
                _ => 3,
            };
            store
                .put(key, CacheEntry { stored_at: at(offset), value: i.to_string() })
                .await
                .unwrap();
        }

        assert_eq!(store.evict_oldest(2).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state").join("cache.db");

        {
            let store = Arc::new(SqliteCacheStore::new(&db_path).unwrap());
            let clock = Arc::new(ManualClock::new(at(0)));
            let cache = MemoCache::new(store, clock, CachePolicy::default());
            let value: Result<String, String> = cache
                .get_or_compute("lookup", &("x",), || async { Ok("first".to_string()) })
                .await;
            assert_eq!(value.unwrap(), "first");
        }

        let store = Arc::new(SqliteCacheStore::new(&db_path).unwrap());
        let clock = Arc::new(ManualClock::new(at(60)));
        let cache = MemoCache::new(store, clock, CachePolicy::default());
        let value: Result<String, String> = cache
            .get_or_compute("lookup", &("x",), || async { Ok("second".to_string()) })
            .await;
        assert_eq!(value.unwrap(), "first");
    }

    #[test]
    fn test_rejects_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cache.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
                .unwrap();
        }
        assert!(SqliteCacheStore::new(&db_path).is_err());
    }
}
