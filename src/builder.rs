//! Builder pattern for adapter construction.

use crate::backend::{CacheBackend, QueueBackend};
use crate::config::{AdapterConfig, EntitySettings};
use crate::entity::EntityKind;
use crate::error::Result;
use crate::service::AuthCacheAdapter;
use std::time::Duration;

/// Fluent builder for an [`AuthCacheAdapter`].
///
/// Starts from [`AdapterConfig::default`]; each `with_*` call overrides one
/// concern. Nothing is validated until [`build`](Self::build).
///
/// # Example
///
/// ```ignore
/// use auth_cache_kit::{backend::InMemoryBackend, AdapterBuilder};
/// use std::time::Duration;
///
/// let backend = InMemoryBackend::new();
/// let adapter = AdapterBuilder::new(backend.clone(), backend)
///     .with_queue_name("identity")
///     .with_timeouts(Duration::from_secs(2), Duration::from_secs(5), Duration::from_secs(5))
///     .with_max_retries(5)
///     .with_concurrency(8, 4)
///     .build()?;
/// ```
pub struct AdapterBuilder<B: CacheBackend, Q: QueueBackend> {
    cache: B,
    queue: Q,
    config: AdapterConfig,
}

impl<B: CacheBackend, Q: QueueBackend> AdapterBuilder<B, Q> {
    pub fn new(cache: B, queue: Q) -> Self {
        AdapterBuilder {
            cache,
            queue,
            config: AdapterConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Default queue for every entity without an override.
    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.config.queue_name = queue_name.into();
        self
    }

    /// Deployment namespace placed before every cache key.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.cache_prefix = namespace.into();
        self
    }

    /// Enqueue acknowledgment, dequeue and processing budgets.
    ///
    /// Reads wait at most `dequeue + process` for the backend.
    pub fn with_timeouts(mut self, enqueue: Duration, dequeue: Duration, process: Duration) -> Self {
        self.config.enqueue_timeout_ms = enqueue.as_millis() as u64;
        self.config.dequeue_timeout_ms = dequeue.as_millis() as u64;
        self.config.process_timeout_ms = process.as_millis() as u64;
        self
    }

    /// Total enqueue attempts per write, including the first.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// In-flight operation bound and per-tick dispatch quota.
    pub fn with_concurrency(mut self, max_concurrency: usize, max_jobs_per_tick: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self.config.max_jobs_per_tick = max_jobs_per_tick;
        self
    }

    /// Settings for one entity kind.
    pub fn with_entity(mut self, kind: EntityKind, settings: EntitySettings) -> Self {
        match kind {
            EntityKind::User => self.config.user = settings,
            EntityKind::Session => self.config.session = settings,
            EntityKind::Account => self.config.account = settings,
            EntityKind::VerificationRequest => self.config.verification_request = settings,
        }
        self
    }

    /// Emit coordinator and queue traces at `debug` level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Validate the configuration and wire the adapter.
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` naming the first invalid setting.
    pub fn build(self) -> Result<AuthCacheAdapter<B, Q>> {
        AuthCacheAdapter::new(self.cache, self.queue, self.config)
    }
}
