//! Store capabilities the engine depends on.
//!
//! The host injects a backend handle at construction. Handles are cheap to
//! clone and share one process-wide connection or pool; the engine only
//! borrows them and never touches a concrete client.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

#[cfg(feature = "inmemory")]
mod inmemory;
#[cfg(feature = "memcached")]
mod memcached;
#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "inmemory")]
pub use inmemory::InMemoryBackend;
#[cfg(feature = "memcached")]
pub use memcached::{MemcachedBackend, MemcachedConfig};
#[cfg(feature = "redis")]
pub use redis::{RedisBackend, RedisConfig};

/// Key-value operations over the shared store.
///
/// Values are raw bytes; the engine stores JSON text so the backend process
/// can read and write the same entries.
pub trait CacheBackend: Send + Sync + Clone + 'static {
    /// Look up a key. `Ok(None)` is a miss; connectivity problems must be
    /// `Err(Error::CacheUnavailable)`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Overwrite a key. `ttl: None` means the entry never expires.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key. Deleting an absent key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Cheap liveness probe.
    fn health_check(&self) -> impl Future<Output = Result<bool>> + Send;

    /// Suspend until `key` may have changed, for at most `max_wait`.
    ///
    /// Backends without change notification just sleep the interval out;
    /// callers always re-read the key afterwards.
    fn wait_for_change(&self, key: &str, max_wait: Duration) -> impl Future<Output = ()> + Send {
        let _ = key;
        tokio::time::sleep(max_wait)
    }
}

/// Durable command queue operations.
pub trait QueueBackend: Send + Sync + Clone + 'static {
    /// Append a serialized job descriptor to `queue`.
    ///
    /// Returning is the store's acknowledgment. A backend with its own
    /// failure channel reports rejections as
    /// `Err(Error::BackendReportedFailure)`.
    fn push(&self, queue: &str, job: String) -> impl Future<Output = Result<()>> + Send;
}
