//! Command queue dispatch.
//!
//! Writes are fire-and-forget: a job is done, from the adapter's point of
//! view, once the store acknowledges the push. Reads are bridged to a
//! synchronous answer: the backend fulfills a read job by writing the
//! result into the cache, and the adapter waits for that key to appear
//! within the dequeue + process budget.

use crate::backend::{CacheBackend, QueueBackend};
use crate::entity::CachePrefix;
use crate::error::{Error, Result};
use crate::idempotency::{IdempotencyKey, IdempotencyKeyBuilder};
use crate::limiter::ConcurrencyLimiter;
use crate::operation::Operation;
use crate::store::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Payload field carrying the idempotency key to the backend.
pub const IDEMPOTENCY_KEY_FIELD: &str = "idempotency_key";

/// A command addressed to the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueJob {
    pub queue_name: String,
    pub operation: Operation,
    pub payload: Value,
    pub idempotency_key: IdempotencyKey,
    /// Number of the current attempt, starting at 1 once pushed.
    pub attempt_count: u32,
    /// Unix millis of the latest push; informational only.
    pub enqueued_at: u64,
}

impl QueueJob {
    /// Build a job and derive its idempotency key.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` if the payload is not a JSON object or the
    /// key cannot be derived.
    pub fn new(
        queue_name: impl Into<String>,
        operation: Operation,
        entity_id: &str,
        payload: Value,
    ) -> Result<Self> {
        if !payload.is_object() {
            return Err(Error::ValidationError(format!(
                "{} payload must be a JSON object",
                operation
            )));
        }
        let idempotency_key = IdempotencyKeyBuilder::build(entity_id, operation.as_str(), &payload)?;

        Ok(QueueJob {
            queue_name: queue_name.into(),
            operation,
            payload,
            idempotency_key,
            attempt_count: 0,
            enqueued_at: 0,
        })
    }

    /// Serialize to the descriptor pushed onto the queue.
    ///
    /// The payload goes out JSON-stringified with `idempotency_key` added.
    pub fn to_wire(&self) -> Result<String> {
        let mut payload = self.payload.clone();
        if let Value::Object(fields) = &mut payload {
            fields.insert(
                IDEMPOTENCY_KEY_FIELD.to_string(),
                Value::String(self.idempotency_key.to_string()),
            );
        }

        let descriptor = JobDescriptor {
            queue: self.queue_name.clone(),
            operation: self.operation,
            payload: serde_json::to_string(&payload)?,
            idempotency_key: self.idempotency_key.to_string(),
            attempt_count: self.attempt_count,
            enqueued_at: self.enqueued_at,
        };
        Ok(serde_json::to_string(&descriptor)?)
    }
}

/// Wire form of a [`QueueJob`], as the backend consumes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub queue: String,
    pub operation: Operation,
    /// JSON-stringified entity fields plus `idempotency_key`.
    pub payload: String,
    pub idempotency_key: String,
    pub attempt_count: u32,
    pub enqueued_at: u64,
}

impl JobDescriptor {
    /// Parse a descriptor popped off a queue.
    pub fn parse(wire: &str) -> Result<Self> {
        serde_json::from_str(wire)
            .map_err(|e| Error::DeserializationError(format!("bad job descriptor: {}", e)))
    }

    /// Decode the stringified payload.
    pub fn payload_value(&self) -> Result<Value> {
        serde_json::from_str(&self.payload)
            .map_err(|e| Error::DeserializationError(format!("bad job payload: {}", e)))
    }
}

/// Deadline for a read waiting on the backend.
///
/// The clock starts at construction, so one budget can span a read job and
/// the follow-up waits of a chained lookup.
#[derive(Clone, Copy, Debug)]
pub struct AwaitBudget {
    deadline: Instant,
    total: Duration,
}

impl AwaitBudget {
    pub fn new(dequeue_timeout: Duration, process_timeout: Duration) -> Self {
        let total = dequeue_timeout + process_timeout;
        AwaitBudget {
            deadline: Instant::now() + total,
            total,
        }
    }

    /// Shorten the budget to a caller-imposed deadline, if earlier.
    pub fn capped_at(self, caller_deadline: Option<Instant>) -> Self {
        match caller_deadline {
            Some(limit) if limit < self.deadline => {
                let now = Instant::now();
                AwaitBudget {
                    deadline: limit,
                    total: limit.saturating_duration_since(now).min(self.total),
                }
            }
            _ => self,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}

/// Dispatches jobs onto the queue store under the concurrency limiter.
#[derive(Clone)]
pub struct CommandQueue<B: CacheBackend, Q: QueueBackend> {
    queue: Q,
    store: CacheStore<B>,
    limiter: ConcurrencyLimiter,
    enqueue_timeout: Duration,
    poll_interval: Duration,
    debug: bool,
}

impl<B: CacheBackend, Q: QueueBackend> CommandQueue<B, Q> {
    pub fn new(
        queue: Q,
        store: CacheStore<B>,
        limiter: ConcurrencyLimiter,
        enqueue_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        CommandQueue {
            queue,
            store,
            limiter,
            enqueue_timeout,
            poll_interval,
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Push a job and wait for the store's acknowledgment.
    ///
    /// Slot acquisition and the push share one `enqueue_timeout`.
    ///
    /// # Errors
    ///
    /// - `Error::EnqueueTimeout`: no acknowledgment within the timeout
    /// - `Error::BackendReportedFailure`: the backend rejected the job
    /// - `Error::AdapterClosed`: the limiter was closed
    pub async fn enqueue(&self, job: &QueueJob) -> Result<()> {
        let started = Instant::now();
        let _permit = self.acquire_slot(job).await?;
        self.push_within(job, self.enqueue_timeout.saturating_sub(started.elapsed()))
            .await
    }

    /// Push a read job, then wait for the backend to populate `prefix:key`.
    ///
    /// The limiter slot is held for the whole round trip. Never retried.
    ///
    /// # Errors
    ///
    /// - `Error::EnqueueTimeout`: the push itself was not acknowledged
    /// - `Error::ReadTimeout`: the key did not appear within `budget`
    /// - `Error::CacheUnavailable`: the store became unreachable while polling
    pub async fn enqueue_and_await(
        &self,
        job: &QueueJob,
        prefix: CachePrefix,
        key: &str,
        budget: &AwaitBudget,
    ) -> Result<Value> {
        let started = Instant::now();
        let _permit = self.acquire_slot(job).await?;
        self.push_within(job, self.enqueue_timeout.saturating_sub(started.elapsed()))
            .await?;
        self.await_entry(prefix, key, budget).await
    }

    /// Wait for `prefix:key` to appear, without enqueueing anything.
    ///
    /// Re-reads the key every `poll_interval`; backends that support change
    /// notification cut the interval short.
    pub async fn await_entry(
        &self,
        prefix: CachePrefix,
        key: &str,
        budget: &AwaitBudget,
    ) -> Result<Value> {
        let full_key = self.store.key(prefix, key)?;
        loop {
            if let Some(value) = self.store.get(prefix, key).await? {
                if self.debug {
                    debug!("✓ Backend populated {}", full_key);
                }
                return Ok(value);
            }

            let remaining = budget.remaining();
            if remaining.is_zero() {
                if self.debug {
                    debug!("✗ Gave up waiting for {} after {:?}", full_key, budget.total());
                }
                return Err(Error::ReadTimeout {
                    key: full_key,
                    budget: budget.total(),
                });
            }

            self.store
                .backend()
                .wait_for_change(&full_key, remaining.min(self.poll_interval))
                .await;
        }
    }

    async fn acquire_slot(&self, job: &QueueJob) -> Result<crate::limiter::LimiterPermit> {
        tokio::time::timeout(self.enqueue_timeout, self.limiter.acquire())
            .await
            .map_err(|_| self.timeout_error(job))?
    }

    async fn push_within(&self, job: &QueueJob, remaining: Duration) -> Result<()> {
        let mut job = job.clone();
        job.attempt_count = job.attempt_count.max(1);
        job.enqueued_at = unix_millis();
        let wire = job.to_wire()?;

        tokio::time::timeout(remaining, self.queue.push(&job.queue_name, wire))
            .await
            .map_err(|_| self.timeout_error(&job))??;

        if self.debug {
            debug!(
                "» Enqueued {} on {} (key: {}, attempt: {})",
                job.operation, job.queue_name, job.idempotency_key, job.attempt_count
            );
        }
        Ok(())
    }

    fn timeout_error(&self, job: &QueueJob) -> Error {
        Error::EnqueueTimeout {
            queue: job.queue_name.clone(),
            timeout: self.enqueue_timeout,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::key::CacheKeyBuilder;
    use serde_json::json;

    fn command_queue(backend: &InMemoryBackend) -> CommandQueue<InMemoryBackend, InMemoryBackend> {
        CommandQueue::new(
            backend.clone(),
            CacheStore::new(backend.clone(), CacheKeyBuilder::default()),
            ConcurrencyLimiter::new(4, 4, Duration::from_millis(1)),
            Duration::from_millis(100),
            Duration::from_millis(10),
        )
    }

    /// Queue store that never acknowledges.
    #[derive(Clone)]
    struct Silent;

    impl QueueBackend for Silent {
        async fn push(&self, _queue: &str, _job: String) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[test]
    fn test_job_wire_format() {
        let mut job = QueueJob::new(
            "auth",
            Operation::CreateUser,
            "u1",
            json!({ "id": "u1", "email": "a@b.com" }),
        )
        .expect("Failed to build job");
        job.attempt_count = 2;

        let descriptor = JobDescriptor::parse(&job.to_wire().unwrap()).unwrap();
        assert_eq!(descriptor.queue, "auth");
        assert_eq!(descriptor.operation, Operation::CreateUser);
        assert_eq!(descriptor.attempt_count, 2);
        assert_eq!(descriptor.idempotency_key, job.idempotency_key.as_str());

        let payload = descriptor.payload_value().unwrap();
        assert_eq!(payload["email"], "a@b.com");
        assert_eq!(payload[IDEMPOTENCY_KEY_FIELD], job.idempotency_key.as_str());
    }

    #[test]
    fn test_job_requires_object_payload() {
        assert!(matches!(
            QueueJob::new("auth", Operation::GetUser, "u1", json!("u1")),
            Err(Error::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_enqueue_pushes_to_named_queue() {
        let backend = InMemoryBackend::new();
        let queue = command_queue(&backend);
        let job = QueueJob::new("sessions", Operation::DeleteSession, "s1", json!({ "sessionToken": "s1" }))
            .unwrap();

        queue.enqueue(&job).await.expect("Failed to enqueue");

        assert_eq!(backend.queue_len("sessions"), 1);
        let wire = backend.pop_job("sessions").unwrap();
        let descriptor = JobDescriptor::parse(&wire).unwrap();
        assert_eq!(descriptor.operation, Operation::DeleteSession);
        assert!(descriptor.enqueued_at > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_timeout() {
        let backend = InMemoryBackend::new();
        let queue = CommandQueue::new(
            Silent,
            CacheStore::new(backend, CacheKeyBuilder::default()),
            ConcurrencyLimiter::new(1, 1, Duration::from_millis(1)),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
        let job = QueueJob::new("auth", Operation::CreateUser, "u1", json!({ "id": "u1" })).unwrap();

        let started = Instant::now();
        let err = queue.enqueue(&job).await.unwrap_err();
        assert!(matches!(err, Error::EnqueueTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_millis(150));
        // The slot is released with the failed attempt.
        assert_eq!(queue.limiter().available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_and_await_resolves_when_backend_writes() {
        let backend = InMemoryBackend::new();
        let queue = command_queue(&backend);
        let job = QueueJob::new("auth", Operation::GetUser, "u1", json!({ "id": "u1" })).unwrap();

        let responder = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            responder
                .set("USER_DATA:u1", br#"{"id":"u1"}"#.to_vec(), None)
                .await
                .unwrap();
        });

        let budget = AwaitBudget::new(Duration::from_millis(50), Duration::from_millis(50));
        let value = queue
            .enqueue_and_await(&job, CachePrefix::UserData, "u1", &budget)
            .await
            .expect("Failed to await");
        assert_eq!(value, json!({ "id": "u1" }));
        assert_eq!(backend.queue_len("auth"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_and_await_times_out_within_budget() {
        let backend = InMemoryBackend::new();
        let queue = command_queue(&backend);
        let job = QueueJob::new("auth", Operation::GetUser, "u9", json!({ "id": "u9" })).unwrap();

        let started = Instant::now();
        let budget = AwaitBudget::new(Duration::from_millis(50), Duration::from_millis(50));
        let err = queue
            .enqueue_and_await(&job, CachePrefix::UserData, "u9", &budget)
            .await
            .unwrap_err();

        match err {
            Error::ReadTimeout { key, budget } => {
                assert_eq!(key, "USER_DATA:u9");
                assert_eq!(budget, Duration::from_millis(100));
            }
            other => panic!("expected ReadTimeout, got {:?}", other),
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_shortens_budget() {
        let backend = InMemoryBackend::new();
        let queue = command_queue(&backend);

        let started = Instant::now();
        let budget = AwaitBudget::new(Duration::from_secs(10), Duration::from_secs(10))
            .capped_at(Some(Instant::now() + Duration::from_millis(40)));
        let err = queue
            .await_entry(CachePrefix::SessionData, "s1", &budget)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(60));
    }
}
