//! In-process backend for tests, demos and single-node deployments.

use super::{CacheBackend, QueueBackend};
use crate::error::Result;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Clone, Debug)]
struct StoredEntry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// DashMap-backed cache plus named FIFO queues.
///
/// Clones share the same storage. Every `set` wakes tasks parked in
/// [`CacheBackend::wait_for_change`], so awaited reads resolve as soon as
/// a simulated backend writes the key. Expiry uses tokio's clock, which
/// keeps paused-time tests deterministic.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    entries: Arc<DashMap<String, StoredEntry>>,
    queues: Arc<DashMap<String, VecDeque<String>>>,
    changed: Arc<Notify>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) cache entries.
    pub async fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Jobs waiting on `queue`, oldest first.
    pub fn queued_jobs(&self, queue: &str) -> Vec<String> {
        self.queues
            .get(queue)
            .map(|jobs| jobs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Take the oldest job off `queue`, as a consumer would.
    pub fn pop_job(&self, queue: &str) -> Option<String> {
        self.queues.get_mut(queue).and_then(|mut jobs| jobs.pop_front())
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(|jobs| jobs.len()).unwrap_or(0)
    }
}

impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                debug!("✓ InMemory GET {} -> HIT", key);
                return Ok(Some(entry.data.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            debug!("✓ InMemory GET {} -> EXPIRED", key);
        } else {
            debug!("✓ InMemory GET {} -> MISS", key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = StoredEntry {
            data: value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.insert(key.to_string(), entry);
        self.changed.notify_waiters();

        match ttl {
            Some(d) => debug!("✓ InMemory SET {} (TTL: {:?})", key, d),
            None => debug!("✓ InMemory SET {}", key),
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        debug!("✓ InMemory DELETE {}", key);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn wait_for_change(&self, _key: &str, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.changed.notified()).await;
    }
}

impl QueueBackend for InMemoryBackend {
    async fn push(&self, queue: &str, job: String) -> Result<()> {
        self.queues.entry(queue.to_string()).or_default().push_back(job);
        debug!("✓ InMemory PUSH {}", queue);
        Ok(())
    }
}
