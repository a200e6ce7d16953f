//! Read coordination.
//!
//! ```text
//! CacheCheck ──hit──▶ Return
//!     │
//!    miss
//!     ▼
//! AwaitBackend ──value appears──▶ Return
//!     │
//!  budget spent
//!     ▼
//! Fail(ReadTimeout)
//! ```
//!
//! The backend populates the cache itself, so this coordinator never writes
//! on the miss path; it only re-reads once the wait succeeds. Chained
//! lookups (index → entity, session → user) share one budget.

use crate::backend::{CacheBackend, QueueBackend};
use crate::config::AdapterConfig;
use crate::entity::{account_key, CachePrefix, EntityKind};
use crate::error::{Error, Result};
use crate::operation::Operation;
use crate::queue::{AwaitBudget, CommandQueue, QueueJob};
use crate::store::{index_target, CacheStore, IndexTarget};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

/// A session together with the user it belongs to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionAndUser {
    pub session: Value,
    pub user: Value,
}

/// Orchestrates reads: cache first, then the backend via the queue.
#[derive(Clone)]
pub struct ReadCoordinator<B: CacheBackend, Q: QueueBackend> {
    store: CacheStore<B>,
    queue: CommandQueue<B, Q>,
    config: Arc<AdapterConfig>,
}

impl<B: CacheBackend, Q: QueueBackend> ReadCoordinator<B, Q> {
    pub fn new(store: CacheStore<B>, queue: CommandQueue<B, Q>, config: Arc<AdapterConfig>) -> Self {
        ReadCoordinator {
            store,
            queue,
            config,
        }
    }

    /// Look up a user by ID.
    ///
    /// `deadline` lets the caller cut the dequeue + process budget short.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: malformed ID
    /// - `Error::CacheUnavailable`: store unreachable
    /// - `Error::EnqueueTimeout` / `Error::ReadTimeout`: backend did not answer in time
    pub async fn get_user(&self, id: &str, deadline: Option<Instant>) -> Result<Option<Value>> {
        self.store.key(CachePrefix::UserData, id)?;
        let settings = self.config.entity(EntityKind::User);

        if settings.cache {
            if let Some(user) = self.store.get(CachePrefix::UserData, id).await? {
                self.trace_hit(CachePrefix::UserData, id);
                return Ok(found(user));
            }
        }
        if !settings.persist {
            return Ok(None);
        }

        self.trace_miss(CachePrefix::UserData, id);
        let budget = self.budget(deadline);
        let job = self.job(Operation::GetUser, id, json!({ "id": id }))?;
        let user = self
            .queue
            .enqueue_and_await(&job, CachePrefix::UserData, id, &budget)
            .await?;
        Ok(found(user))
    }

    /// Look up a user through the email index.
    pub async fn get_user_by_email(
        &self,
        email: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<Value>> {
        self.user_via_index(
            EntityKind::User,
            CachePrefix::EmailIndex,
            email,
            Operation::GetUserByEmail,
            json!({ "email": email }),
            deadline,
        )
        .await
    }

    /// Look up a user through the `provider:providerAccountId` index.
    pub async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<Value>> {
        if provider.is_empty() || provider_account_id.is_empty() {
            return Err(Error::ValidationError(
                "provider and providerAccountId are required".to_string(),
            ));
        }
        let key = account_key(provider, provider_account_id);
        self.user_via_index(
            EntityKind::Account,
            CachePrefix::AccountIndex,
            &key,
            Operation::GetUserByAccount,
            json!({ "provider": provider, "providerAccountId": provider_account_id }),
            deadline,
        )
        .await
    }

    /// Look up a session and the user it references via `userId`.
    pub async fn get_session_and_user(
        &self,
        session_token: &str,
        deadline: Option<Instant>,
    ) -> Result<Option<SessionAndUser>> {
        self.store.key(CachePrefix::SessionData, session_token)?;
        let settings = self.config.entity(EntityKind::Session);

        if settings.cache {
            if let Some(session) = self.store.get(CachePrefix::SessionData, session_token).await? {
                if session.is_null() {
                    return Ok(None);
                }
                let user_id = session_user_id(&session)?;
                if let Some(user) = self.store.get(CachePrefix::UserData, &user_id).await? {
                    self.trace_hit(CachePrefix::SessionData, session_token);
                    return Ok(found(user).map(|user| SessionAndUser { session, user }));
                }
            }
        }
        if !settings.persist {
            return Ok(None);
        }

        self.trace_miss(CachePrefix::SessionData, session_token);
        let budget = self.budget(deadline);
        let job = self.job(
            Operation::GetSessionAndUser,
            session_token,
            json!({ "sessionToken": session_token }),
        )?;
        let session = self
            .queue
            .enqueue_and_await(&job, CachePrefix::SessionData, session_token, &budget)
            .await?;
        if session.is_null() {
            return Ok(None);
        }

        let user_id = session_user_id(&session)?;
        let user = self
            .queue
            .await_entry(CachePrefix::UserData, &user_id, &budget)
            .await?;
        Ok(found(user).map(|user| SessionAndUser { session, user }))
    }

    async fn user_via_index(
        &self,
        kind: EntityKind,
        index: CachePrefix,
        key: &str,
        operation: Operation,
        lookup: Value,
        deadline: Option<Instant>,
    ) -> Result<Option<Value>> {
        let full_key = self.store.key(index, key)?;
        let settings = self.config.entity(kind);

        if settings.cache {
            match self.store.get_index(index, key).await? {
                Some(IndexTarget::NotFound) => return Ok(None),
                Some(IndexTarget::Entity(user_id)) => {
                    if let Some(user) = self.store.get(CachePrefix::UserData, &user_id).await? {
                        if self.index_describes(index, key, &user_id, &user).await? {
                            self.trace_hit(index, key);
                            return Ok(found(user));
                        }
                    }
                    // An index must never outlive, or disagree with, its entity.
                    if self.config.debug {
                        debug!("✗ Dropping stale index {} -> {}", full_key, user_id);
                    }
                    self.store.invalidate(index, key).await?;
                }
                None => {}
            }
        }
        if !settings.persist {
            return Ok(None);
        }

        self.trace_miss(index, key);
        let budget = self.budget(deadline);
        let job = self.job(operation, key, lookup)?;
        let target = self
            .queue
            .enqueue_and_await(&job, index, key, &budget)
            .await?;

        match index_target(&full_key, target)? {
            IndexTarget::NotFound => Ok(None),
            IndexTarget::Entity(user_id) => {
                let user = self
                    .queue
                    .await_entry(CachePrefix::UserData, &user_id, &budget)
                    .await?;
                Ok(found(user))
            }
        }
    }

    /// Whether `user` is still the entity the index entry `key` points at.
    ///
    /// An email index must match the user's current email. An account index
    /// must agree with the cached account's `userId`, when that is cached.
    async fn index_describes(
        &self,
        index: CachePrefix,
        key: &str,
        user_id: &str,
        user: &Value,
    ) -> Result<bool> {
        if user.is_null() {
            return Ok(true);
        }
        match index {
            CachePrefix::EmailIndex => Ok(user.get("email").and_then(Value::as_str) == Some(key)),
            CachePrefix::AccountIndex => {
                let account = self.store.get(CachePrefix::AccountData, key).await?;
                Ok(match account.as_ref().and_then(|a| a.get("userId")) {
                    Some(Value::String(owner)) => owner == user_id,
                    _ => true,
                })
            }
            _ => Ok(true),
        }
    }

    fn job(&self, operation: Operation, lookup_id: &str, lookup: Value) -> Result<QueueJob> {
        QueueJob::new(
            self.config.queue_for(operation.entity()),
            operation,
            lookup_id,
            lookup,
        )
    }

    fn budget(&self, deadline: Option<Instant>) -> AwaitBudget {
        let timeouts = self.config.timeouts();
        AwaitBudget::new(timeouts.dequeue, timeouts.process).capped_at(deadline)
    }

    fn trace_hit(&self, prefix: CachePrefix, key: &str) {
        if self.config.debug {
            debug!("✓ Cache hit {}:{}", prefix, key);
        }
    }

    fn trace_miss(&self, prefix: CachePrefix, key: &str) {
        if self.config.debug {
            debug!("✗ Cache miss {}:{}, asking backend", prefix, key);
        }
    }
}

/// The backend's `null` sentinel means "no such entity".
fn found(value: Value) -> Option<Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

fn session_user_id(session: &Value) -> Result<String> {
    session
        .get("userId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::DeserializationError("cached session has no userId".to_string())
        })
}
