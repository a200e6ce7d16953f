//! Shared test doubles and helpers.

#![allow(dead_code)]

use auth_cache_kit::backend::InMemoryBackend;
use auth_cache_kit::{AdapterConfig, CacheBackend, Error, QueueBackend, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();
}

/// Short read budgets: 50ms dequeue + 50ms process.
pub fn fast_config() -> AdapterConfig {
    AdapterConfig {
        dequeue_timeout_ms: 50,
        process_timeout_ms: 50,
        debug: true,
        ..Default::default()
    }
}

/// Write `value` as JSON under a fully qualified key, as the backend would.
pub async fn backend_writes(cache: &InMemoryBackend, key: &str, value: &Value) {
    let bytes = serde_json::to_vec(value).expect("Failed to serialize");
    cache
        .set(key, bytes, None)
        .await
        .expect("Failed to write cache");
}

pub async fn cached(cache: &InMemoryBackend, key: &str) -> Option<Value> {
    cache
        .get(key)
        .await
        .expect("Failed to read cache")
        .map(|bytes| serde_json::from_slice(&bytes).expect("cached value is JSON"))
}

/// Queue store that never acknowledges a push.
#[derive(Clone, Default)]
pub struct StallingQueue {
    pub pushes: Arc<AtomicU32>,
}

impl QueueBackend for StallingQueue {
    async fn push(&self, _queue: &str, _job: String) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Rejects the first `failures` pushes as transient, then accepts.
#[derive(Clone)]
pub struct FlakyQueue {
    pub inner: InMemoryBackend,
    failures: Arc<AtomicU32>,
    pub pushes: Arc<AtomicU32>,
}

impl FlakyQueue {
    pub fn new(inner: &InMemoryBackend, failures: u32) -> Self {
        FlakyQueue {
            inner: inner.clone(),
            failures: Arc::new(AtomicU32::new(failures)),
            pushes: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl QueueBackend for FlakyQueue {
    async fn push(&self, queue: &str, job: String) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::BackendReportedFailure {
                message: "queue store overloaded".to_string(),
                transient: true,
            });
        }
        self.inner.push(queue, job).await
    }
}

/// Cache store whose connection is down.
#[derive(Clone)]
pub struct UnavailableCache;

impl CacheBackend for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(Error::CacheUnavailable("connection refused".to_string()))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}
