//! Redis backend: cache entries and list-based command queues.

use super::{CacheBackend, QueueBackend};
use crate::error::{Error, Result};
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use std::time::Duration;

/// Default pool size, overridable with `REDIS_POOL_SIZE`.
const DEFAULT_POOL_SIZE: usize = 16;

/// Configuration for the Redis backend.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://localhost:6379".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Pooled Redis backend.
///
/// Cache entries are plain string keys (`SET`/`SETEX`); queues are lists the
/// backend process consumes from the head (`RPUSH`).
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// # Errors
    /// `Error::ConfigError` for a malformed URL or pool settings.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = deadpool_redis::Config::from_url(config.url.clone());
        cfg.pool = Some(PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create redis pool: {}", e)))?;

        info!(
            "✓ Redis backend initialized for {} (pool size: {})",
            config.url, config.pool_size
        );

        Ok(RedisBackend { pool })
    }

    /// Build from a URL, sizing the pool from `REDIS_POOL_SIZE`.
    ///
    /// # Errors
    /// `Error::ConfigError` for a malformed URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        let pool_size = std::env::var("REDIS_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        Self::new(RedisConfig {
            url: url.into(),
            pool_size,
        })
        .await
    }

    /// Wrap an existing pool owned by the host process.
    pub fn from_pool(pool: Pool) -> Self {
        RedisBackend { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::CacheUnavailable(format!("redis connection: {}", e)))
    }
}

impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| Error::CacheUnavailable(format!("redis GET {}: {}", key, e)))?;

        debug!(
            "✓ Redis GET {} -> {}",
            key,
            if value.is_some() { "HIT" } else { "MISS" }
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection().await?;
        let outcome: std::result::Result<(), _> = match ttl {
            Some(d) => conn.set_ex(key, value, d.as_secs().max(1)).await,
            None => conn.set(key, value).await,
        };
        outcome.map_err(|e| Error::CacheUnavailable(format!("redis SET {}: {}", key, e)))?;

        debug!("✓ Redis SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| Error::CacheUnavailable(format!("redis DEL {}: {}", key, e)))?;

        debug!("✓ Redis DEL {}", key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => {
                let probe: std::result::Result<bool, _> = conn.exists("__health_check__").await;
                Ok(probe.is_ok())
            }
            Err(_) => Ok(false),
        }
    }
}

impl QueueBackend for RedisBackend {
    async fn push(&self, queue: &str, job: String) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .rpush(queue, job)
            .await
            .map_err(|e| Error::CacheUnavailable(format!("redis RPUSH {}: {}", queue, e)))?;

        debug!("✓ Redis RPUSH {}", queue);
        Ok(())
    }
}
