//! Redis cache.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use super::{Cache, CacheConfig, CacheError, Result};
use crate::utils::duration_ms;

/// Redis-backed cache.
///
/// Clones of the connection manager share one multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let client = Client::open(config.url())?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("{}: {}", config.address, e)))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(format!("ping {}: {}", config.address, e)))?;

        info!(address = %config.address, db = config.db, reply = %pong, "Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<String> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        value.ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            // PSETEX rejects a zero expiry.
            Some(ttl) => {
                let millis = duration_ms(ttl).max(1);
                let _: () = conn.pset_ex(key, value, millis).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        debug!(key = %key, ttl_ms = ?ttl.map(duration_ms), "Stored cache entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }
}
