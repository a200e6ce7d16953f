//! High-level adapter facade.
//!
//! [`AuthCacheAdapter`] is the surface the identity layer calls. It wires
//! the coordinators to one cache handle and one queue handle and is cheap to
//! clone: clones share the same limiter, store and configuration.
//!
//! ```ignore
//! use auth_cache_kit::{AdapterConfig, AuthCacheAdapter};
//! use serde_json::json;
//!
//! let adapter = AuthCacheAdapter::in_memory(AdapterConfig::default())?;
//! adapter.create_user(json!({ "id": "u1", "email": "a@b.com" })).await?;
//! let user = adapter.get_user_by_email("a@b.com").await?;
//! ```

use crate::backend::{CacheBackend, QueueBackend};
use crate::config::AdapterConfig;
use crate::entity::verification_key;
use crate::error::Result;
use crate::key::CacheKeyBuilder;
use crate::limiter::ConcurrencyLimiter;
use crate::operation::Operation;
use crate::queue::CommandQueue;
use crate::read::{ReadCoordinator, SessionAndUser};
use crate::store::CacheStore;
use crate::write::{WriteCoordinator, WriteOutcome};
use serde_json::{json, Value};
use std::sync::Arc;

struct Inner<B: CacheBackend, Q: QueueBackend> {
    config: Arc<AdapterConfig>,
    store: CacheStore<B>,
    limiter: ConcurrencyLimiter,
    reads: ReadCoordinator<B, Q>,
    writes: WriteCoordinator<B, Q>,
}

/// Identity/session adapter over a cache store and a command queue.
pub struct AuthCacheAdapter<B: CacheBackend, Q: QueueBackend> {
    inner: Arc<Inner<B, Q>>,
}

impl<B: CacheBackend, Q: QueueBackend> Clone for AuthCacheAdapter<B, Q> {
    fn clone(&self) -> Self {
        AuthCacheAdapter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: CacheBackend, Q: QueueBackend> AuthCacheAdapter<B, Q> {
    /// Wire an adapter from backend handles and a configuration.
    ///
    /// # Errors
    ///
    /// `Error::ConfigError` if the configuration does not validate.
    pub fn new(cache: B, queue: Q, config: AdapterConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let store = CacheStore::new(
            cache,
            CacheKeyBuilder::new(config.cache_prefix.clone(), config.key_separator.clone()),
        );
        let limiter = ConcurrencyLimiter::new(
            config.max_concurrency,
            config.max_jobs_per_tick,
            config.tick_interval(),
        );
        let commands = CommandQueue::new(
            queue,
            store.clone(),
            limiter.clone(),
            config.timeouts().enqueue,
            config.poll_interval(),
        )
        .with_debug(config.debug);

        info!(
            "✓ Auth cache adapter ready (queue: {}, concurrency: {}, retries: {})",
            config.queue_name, config.max_concurrency, config.max_retries
        );

        Ok(AuthCacheAdapter {
            inner: Arc::new(Inner {
                reads: ReadCoordinator::new(store.clone(), commands.clone(), config.clone()),
                writes: WriteCoordinator::new(store.clone(), commands, config.clone()),
                config,
                store,
                limiter,
            }),
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.inner.config
    }

    /// Read coordinator, for lookups with a caller deadline.
    pub fn reads(&self) -> &ReadCoordinator<B, Q> {
        &self.inner.reads
    }

    /// Write coordinator, for callers that need the idempotency key.
    pub fn writes(&self) -> &WriteCoordinator<B, Q> {
        &self.inner.writes
    }

    pub fn store(&self) -> &CacheStore<B> {
        &self.inner.store
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.inner.limiter
    }

    /// Run any write operation and get the full outcome.
    pub async fn execute(&self, operation: Operation, payload: Value) -> Result<WriteOutcome> {
        self.inner.writes.execute(operation, payload).await
    }

    // ---- users ----

    /// Create a user. Returns the user as cached.
    pub async fn create_user(&self, user: Value) -> Result<Value> {
        let outcome = self.execute(Operation::CreateUser, user.clone()).await?;
        Ok(outcome.value.unwrap_or(user))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<Value>> {
        self.inner.reads.get_user(id, None).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<Value>> {
        self.inner.reads.get_user_by_email(email, None).await
    }

    pub async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Value>> {
        self.inner
            .reads
            .get_user_by_account(provider, provider_account_id, None)
            .await
    }

    /// Apply a partial update; `patch` must carry `id`.
    ///
    /// Returns the merged user when it was cached, `None` otherwise.
    pub async fn update_user(&self, patch: Value) -> Result<Option<Value>> {
        Ok(self.execute(Operation::UpdateUser, patch).await?.value)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        self.execute(Operation::DeleteUser, json!({ "id": id })).await?;
        Ok(())
    }

    // ---- accounts ----

    pub async fn link_account(&self, account: Value) -> Result<Value> {
        let outcome = self.execute(Operation::LinkAccount, account.clone()).await?;
        Ok(outcome.value.unwrap_or(account))
    }

    pub async fn unlink_account(&self, provider: &str, provider_account_id: &str) -> Result<()> {
        self.execute(
            Operation::UnlinkAccount,
            json!({ "provider": provider, "providerAccountId": provider_account_id }),
        )
        .await?;
        Ok(())
    }

    // ---- sessions ----

    pub async fn create_session(&self, session: Value) -> Result<Value> {
        let outcome = self.execute(Operation::CreateSession, session.clone()).await?;
        Ok(outcome.value.unwrap_or(session))
    }

    pub async fn get_session_and_user(&self, session_token: &str) -> Result<Option<SessionAndUser>> {
        self.inner
            .reads
            .get_session_and_user(session_token, None)
            .await
    }

    /// Apply a partial update; `patch` must carry `sessionToken`.
    pub async fn update_session(&self, patch: Value) -> Result<Option<Value>> {
        Ok(self.execute(Operation::UpdateSession, patch).await?.value)
    }

    pub async fn delete_session(&self, session_token: &str) -> Result<()> {
        self.execute(
            Operation::DeleteSession,
            json!({ "sessionToken": session_token }),
        )
        .await?;
        Ok(())
    }

    // ---- verification requests ----

    pub async fn create_verification_request(&self, request: Value) -> Result<Value> {
        let outcome = self
            .execute(Operation::CreateVerificationRequest, request.clone())
            .await?;
        Ok(outcome.value.unwrap_or(request))
    }

    /// Consume a verification request.
    ///
    /// Returns the cached request as it was before consumption, or `None`
    /// when it was not cached. The backend is told to consume it either way.
    pub async fn use_verification_request(
        &self,
        identifier: &str,
        token: &str,
    ) -> Result<Option<Value>> {
        if self.inner.config.debug {
            debug!("» Using verification request {}", verification_key(identifier, token));
        }
        let outcome = self
            .execute(
                Operation::UseVerificationRequest,
                json!({ "identifier": identifier, "token": token }),
            )
            .await?;
        Ok(outcome.value)
    }

    // ---- lifecycle ----

    /// Probe the cache store.
    pub async fn health_check(&self) -> Result<bool> {
        self.inner.store.backend().health_check().await
    }

    /// Stop admitting queue operations. Cache-only paths keep working;
    /// anything that needs the queue fails with `Error::AdapterClosed`.
    pub fn close(&self) {
        if !self.inner.limiter.is_closed() {
            self.inner.limiter.close();
            info!("✓ Auth cache adapter closed");
        }
    }
}

#[cfg(feature = "inmemory")]
impl AuthCacheAdapter<crate::backend::InMemoryBackend, crate::backend::InMemoryBackend> {
    /// Adapter whose cache and queue share one in-process store.
    pub fn in_memory(config: AdapterConfig) -> Result<Self> {
        let backend = crate::backend::InMemoryBackend::new();
        AuthCacheAdapter::new(backend.clone(), backend, config)
    }
}
