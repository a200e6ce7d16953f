//! Write coordination.
//!
//! ```text
//! DeriveKey ─▶ UpdateCacheOptimistically ─▶ Enqueue ──ack──▶ Success
//!                                              │  ▲
//!                                    retryable │  │ backoff
//!                                              ▼  │
//!                                             Retry ──exhausted──▶ RetryExhausted
//! ```
//!
//! The cache is updated before the job is handed to the backend so that a
//! read issued right after a write observes it. If the write then fails for
//! good, every entry written optimistically is invalidated again.

use crate::backend::{CacheBackend, QueueBackend};
use crate::config::AdapterConfig;
use crate::entity::{merge_patch, optional_str, require_object, required_str, CachePrefix};
use crate::error::{Error, Result};
use crate::idempotency::IdempotencyKey;
use crate::operation::Operation;
use crate::queue::{CommandQueue, QueueJob};
use crate::store::{CacheEntry, CacheStore, IndexEntry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Result of an accepted write.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOutcome {
    pub idempotency_key: IdempotencyKey,
    /// The entity as the adapter now knows it: the created entity, the
    /// merged update, or the consumed verification request. `None` when
    /// nothing is known (deletes, updates of uncached entities).
    pub value: Option<Value>,
    /// Enqueue attempts used; 0 when persistence is disabled.
    pub attempts: u32,
}

/// Cache changes made before enqueueing.
#[derive(Debug, Default)]
struct CachePlan {
    value: Option<Value>,
    written: Vec<(CachePrefix, String)>,
}

/// Orchestrates mutations: optimistic cache update, then enqueue with retry.
#[derive(Clone)]
pub struct WriteCoordinator<B: CacheBackend, Q: QueueBackend> {
    store: CacheStore<B>,
    queue: CommandQueue<B, Q>,
    config: Arc<AdapterConfig>,
}

impl<B: CacheBackend, Q: QueueBackend> WriteCoordinator<B, Q> {
    pub fn new(store: CacheStore<B>, queue: CommandQueue<B, Q>, config: Arc<AdapterConfig>) -> Self {
        WriteCoordinator {
            store,
            queue,
            config,
        }
    }

    /// Run one write operation end to end.
    ///
    /// # Errors
    ///
    /// - `Error::ValidationError`: read operation, non-object payload or missing ID field
    /// - `Error::CacheUnavailable`: the optimistic cache update could not be applied
    /// - `Error::RetryExhausted`: every attempt hit a retryable failure
    /// - `Error::BackendReportedFailure`: the backend rejected the job permanently
    /// - `Error::AdapterClosed`: the adapter was closed
    ///
    /// On any error after the cache update, the optimistic entries are
    /// invalidated before returning.
    pub async fn execute(&self, operation: Operation, payload: Value) -> Result<WriteOutcome> {
        if operation.is_read() {
            return Err(Error::ValidationError(format!(
                "{} is a read operation",
                operation
            )));
        }

        let kind = operation.entity();
        let entity_id = validate(operation, &payload)?;
        self.store.key(kind.cache_prefix(), &entity_id)?;

        let mut job = QueueJob::new(
            self.config.queue_for(kind),
            operation,
            &entity_id,
            payload.clone(),
        )?;

        let settings = self.config.entity(kind);
        let plan = if settings.cache {
            self.apply_cache_plan(operation, &entity_id, &payload).await?
        } else {
            CachePlan {
                value: created_value(operation, &payload),
                written: Vec::new(),
            }
        };

        if !settings.persist {
            self.trace(|| format!("✓ {} {} applied to cache only", operation, entity_id));
            return Ok(WriteOutcome {
                idempotency_key: job.idempotency_key,
                value: plan.value,
                attempts: 0,
            });
        }

        match self.enqueue_with_retry(&mut job).await {
            Ok(attempts) => Ok(WriteOutcome {
                idempotency_key: job.idempotency_key,
                value: plan.value,
                attempts,
            }),
            Err(e) => {
                self.compensate(&plan.written).await;
                Err(e)
            }
        }
    }

    /// Enqueue with the same job and key until acknowledged.
    async fn enqueue_with_retry(&self, job: &mut QueueJob) -> Result<u32> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            job.attempt_count = attempts;

            match self.queue.enqueue(job).await {
                Ok(()) => return Ok(attempts),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempts >= max_attempts {
                        warn!(
                            "✗ {} (key: {}) failed after {} attempts: {}",
                            job.operation, job.idempotency_key, attempts, e
                        );
                        return Err(Error::RetryExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }

                    self.trace(|| {
                        format!(
                            "⚠ {} failed (attempt {}/{}), retrying: {}",
                            job.operation, attempts, max_attempts, e
                        )
                    });
                    tokio::time::sleep(self.backoff(attempts)).await;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.config.retry_backoff().saturating_mul(factor)
    }

    async fn apply_cache_plan(
        &self,
        operation: Operation,
        entity_id: &str,
        payload: &Value,
    ) -> Result<CachePlan> {
        let ttl = self.config.entity(operation.entity()).ttl_seconds;

        match operation {
            Operation::CreateUser => {
                let indexes: Vec<IndexEntry> = optional_str(payload, "email")
                    .map(|email| IndexEntry {
                        prefix: CachePrefix::EmailIndex,
                        key: email.to_string(),
                        entity_id: entity_id.to_string(),
                        ttl_seconds: ttl,
                    })
                    .into_iter()
                    .collect();
                self.put(CachePrefix::UserData, entity_id, payload, ttl, &indexes)
                    .await
            }
            Operation::UpdateUser => {
                let current = self.store.get(CachePrefix::UserData, entity_id).await?;
                let merged = current.as_ref().and_then(|c| merge_patch(c, payload));
                let Some(merged) = merged else {
                    let mut stale = vec![(CachePrefix::UserData, entity_id.to_string())];
                    if let Some(email) = optional_str(payload, "email") {
                        stale.push((CachePrefix::EmailIndex, email.to_string()));
                    }
                    self.store.invalidate_many(&stale).await?;
                    return Ok(CachePlan::default());
                };

                let old_email = current
                    .as_ref()
                    .and_then(|c| optional_str(c, "email"))
                    .map(str::to_string);
                let new_email = optional_str(&merged, "email").map(str::to_string);

                // Drop the old index first: `put` must be the last fallible
                // step, or a failure after it leaves entries nobody undoes.
                if let Some(old) = old_email.filter(|old| Some(old) != new_email.as_ref()) {
                    self.store.invalidate(CachePrefix::EmailIndex, &old).await?;
                }

                let indexes: Vec<IndexEntry> = new_email
                    .iter()
                    .map(|email| IndexEntry {
                        prefix: CachePrefix::EmailIndex,
                        key: email.clone(),
                        entity_id: entity_id.to_string(),
                        ttl_seconds: ttl,
                    })
                    .collect();
                self.put(CachePrefix::UserData, entity_id, &merged, ttl, &indexes)
                    .await
            }
            Operation::DeleteUser => {
                let mut stale = vec![(CachePrefix::UserData, entity_id.to_string())];
                if let Some(cached) = self.store.get(CachePrefix::UserData, entity_id).await? {
                    if let Some(email) = optional_str(&cached, "email") {
                        stale.push((CachePrefix::EmailIndex, email.to_string()));
                    }
                }
                if let Some(email) = optional_str(payload, "email") {
                    if !stale.iter().any(|(_, key)| key == email) {
                        stale.push((CachePrefix::EmailIndex, email.to_string()));
                    }
                }
                self.store.invalidate_many(&stale).await?;
                Ok(CachePlan::default())
            }
            Operation::CreateSession | Operation::CreateVerificationRequest => {
                let prefix = operation.entity().cache_prefix();
                self.put(prefix, entity_id, payload, ttl, &[]).await
            }
            Operation::UpdateSession => {
                // Sessions are dropped, not rewritten; the backend repopulates
                // the entry on the next read.
                let current = self.store.get(CachePrefix::SessionData, entity_id).await?;
                self.store
                    .invalidate(CachePrefix::SessionData, entity_id)
                    .await?;
                Ok(CachePlan {
                    value: current.as_ref().and_then(|c| merge_patch(c, payload)),
                    written: Vec::new(),
                })
            }
            Operation::DeleteSession => {
                self.store
                    .invalidate(CachePrefix::SessionData, entity_id)
                    .await?;
                Ok(CachePlan::default())
            }
            Operation::UseVerificationRequest => {
                let cached = self
                    .store
                    .get(CachePrefix::VerificationRequestData, entity_id)
                    .await?
                    .filter(|v| !v.is_null());
                self.store
                    .invalidate(CachePrefix::VerificationRequestData, entity_id)
                    .await?;
                Ok(CachePlan {
                    value: cached,
                    written: Vec::new(),
                })
            }
            Operation::LinkAccount => {
                let index = IndexEntry {
                    prefix: CachePrefix::AccountIndex,
                    key: entity_id.to_string(),
                    entity_id: required_str(payload, "userId")?.to_string(),
                    ttl_seconds: ttl,
                };
                self.put(CachePrefix::AccountData, entity_id, payload, ttl, &[index])
                    .await
            }
            Operation::UnlinkAccount => {
                self.store
                    .invalidate_many(&[
                        (CachePrefix::AccountData, entity_id.to_string()),
                        (CachePrefix::AccountIndex, entity_id.to_string()),
                    ])
                    .await?;
                Ok(CachePlan::default())
            }
            Operation::GetUser
            | Operation::GetUserByEmail
            | Operation::GetUserByAccount
            | Operation::GetSessionAndUser => Ok(CachePlan::default()),
        }
    }

    async fn put(
        &self,
        prefix: CachePrefix,
        key: &str,
        value: &Value,
        ttl_seconds: u64,
        indexes: &[IndexEntry],
    ) -> Result<CachePlan> {
        let entry = CacheEntry {
            prefix,
            key: key.to_string(),
            value: value.clone(),
            ttl_seconds,
        };
        self.store.put_with_indexes(&entry, indexes).await?;

        let mut written = vec![(prefix, key.to_string())];
        written.extend(indexes.iter().map(|i| (i.prefix, i.key.clone())));
        Ok(CachePlan {
            value: Some(entry.value),
            written,
        })
    }

    /// Undo optimistic writes. A failure here is logged, never returned.
    async fn compensate(&self, written: &[(CachePrefix, String)]) {
        if written.is_empty() {
            return;
        }
        match self.store.invalidate_many(written).await {
            Ok(()) => self.trace(|| format!("✓ Invalidated {} optimistic entries", written.len())),
            Err(e) => warn!("⚠ Compensating invalidation failed: {}", e),
        }
    }

    fn trace(&self, line: impl FnOnce() -> String) {
        if self.config.debug {
            debug!("{}", line());
        }
    }
}

/// Check the fields each operation needs and return the entity's cache ID.
fn validate(operation: Operation, payload: &Value) -> Result<String> {
    let kind = operation.entity();
    require_object(payload, kind)?;
    let entity_id = kind.cache_key(payload)?;

    match operation {
        Operation::CreateSession | Operation::LinkAccount => {
            required_str(payload, "userId")?;
        }
        _ => {}
    }
    Ok(entity_id)
}

/// What a create reports when caching is off for its entity.
fn created_value(operation: Operation, payload: &Value) -> Option<Value> {
    match operation {
        Operation::CreateUser
        | Operation::CreateSession
        | Operation::CreateVerificationRequest
        | Operation::LinkAccount => Some(payload.clone()),
        _ => None,
    }
}
