//! In-memory implementation of `CacheStore`.
//!
//! All entries are lost when the process exits; used by tests and by runs
//! that don't want a cache file.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};
use crate::error::CacheError;

pub struct InMemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().await.len())
    }

    async fn evict_oldest(&self, count: usize) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;

        // Ties on the timestamp are broken by key so eviction is deterministic.
        let mut by_age: Vec<(String, chrono::DateTime<chrono::Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.stored_at))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut removed = 0;
        for (key, _) in by_age.into_iter().take(count) {
            if entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
