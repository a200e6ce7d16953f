//! Memcached cache backend.
//!
//! Memcached has no list type, so it can only host the cache side of the
//! engine. Pair it with a queue-capable backend for the command queue.

use super::CacheBackend;
use crate::error::{Error, Result};
use async_memcached::AsciiProtocol;
use deadpool_memcached::{Manager, Pool};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default pool size, overridable with `MEMCACHED_POOL_SIZE`.
const DEFAULT_POOL_SIZE: u32 = 16;

/// Memcached reads expirations above 30 days as absolute unix timestamps.
const MAX_RELATIVE_EXPIRATION_SECS: u64 = 60 * 60 * 24 * 30;

/// Protocol limit on key length.
const MAX_KEY_LEN: usize = 250;

/// Configuration for the Memcached backend.
#[derive(Clone, Debug)]
pub struct MemcachedConfig {
    pub server: String,
    pub pool_size: u32,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            server: "localhost:11211".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Pooled Memcached cache backend.
#[derive(Clone)]
pub struct MemcachedBackend {
    pool: Pool,
}

impl MemcachedBackend {
    /// # Errors
    /// `Error::ConfigError` if the pool cannot be built.
    pub async fn new(config: MemcachedConfig) -> Result<Self> {
        let pool = Pool::builder(Manager::new(config.server.clone()))
            .max_size(config.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create memcached pool: {}", e)))?;

        info!(
            "✓ Memcached cache backend initialized with server: {} (pool size: {})",
            config.server, config.pool_size
        );

        Ok(MemcachedBackend { pool })
    }

    /// Build from a server address, sizing the pool from `MEMCACHED_POOL_SIZE`.
    ///
    /// # Errors
    /// `Error::ConfigError` if the pool cannot be built.
    pub async fn from_server(server: impl Into<String>) -> Result<Self> {
        let pool_size = std::env::var("MEMCACHED_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_POOL_SIZE);

        Self::new(MemcachedConfig {
            server: server.into(),
            pool_size,
        })
        .await
    }
}

fn unavailable(e: impl std::fmt::Display) -> Error {
    Error::CacheUnavailable(format!("memcached connection: {}", e))
}

fn check_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::ValidationError(format!(
            "memcached keys are limited to {} bytes, got {}",
            MAX_KEY_LEN,
            key.len()
        )));
    }
    Ok(())
}

fn expiration(ttl: Option<Duration>) -> Option<i64> {
    let secs = ttl?.as_secs().max(1);
    if secs <= MAX_RELATIVE_EXPIRATION_SECS {
        return Some(secs as i64);
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Some((now + secs) as i64)
}

impl CacheBackend for MemcachedBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        match conn.get(key).await {
            Ok(Some(value)) => {
                debug!("✓ Memcached GET {} -> HIT", key);
                Ok(value.data)
            }
            Ok(None) => {
                debug!("✓ Memcached GET {} -> MISS", key);
                Ok(None)
            }
            Err(e) => Err(Error::CacheUnavailable(format!(
                "memcached GET {}: {}",
                key, e
            ))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        conn.set(key, value.as_slice(), expiration(ttl), None)
            .await
            .map_err(|e| Error::CacheUnavailable(format!("memcached SET {}: {}", key, e)))?;

        debug!("✓ Memcached SET {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        let mut conn = self.pool.get().await.map_err(unavailable)?;

        match conn.delete(key).await {
            Ok(()) => {
                debug!("✓ Memcached DELETE {}", key);
                Ok(())
            }
            // Invalidation is idempotent.
            Err(e) if e.to_string().to_lowercase().contains("not found") => Ok(()),
            Err(e) => Err(Error::CacheUnavailable(format!(
                "memcached DELETE {}: {}",
                key, e
            ))),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        match self.pool.get().await {
            Ok(mut conn) => Ok(conn.get("__health_check__").await.is_ok()),
            Err(_) => Ok(false),
        }
    }
}
