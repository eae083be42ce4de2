//! In-memory cache.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{Cache, CacheError, Result};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local cache. Expired entries are removed lazily on access.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(entry.value.clone()),
                Some(_) => {}
                None => return Err(CacheError::NotFound(key.to_string())),
            }
        }

        // Expired: drop it unless it was refreshed meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        Err(CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().await.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
