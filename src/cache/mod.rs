//! Key-value cache.
//!
//! Implementations:
//! - `InMemoryCache`: process-local map with TTL, for tests and local runs
//! - `RedisCache`: Redis via a multiplexed connection manager (feature `redis`)

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Interface for string key-value caching.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value. Missing or expired keys are `CacheError::NotFound`.
    async fn get(&self, key: &str) -> Result<String>;

    /// Store a value. `None` keeps it until deleted or overwritten.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Cache connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Server address (`host:port`).
    pub address: String,
    /// Password, if the server requires one.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address: "localhost:6379".to_string(),
            password: None,
            db: 0,
        }
    }
}

impl CacheConfig {
    /// Connection URL in `redis://[:password@]host:port/db` form.
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!("redis://:{}@{}/{}", password, self.address, self.db),
            None => format!("redis://{}/{}", self.address, self.db),
        }
    }
}
