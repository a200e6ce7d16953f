//! End-to-end behavior of the adapter against simulated backends.

#![cfg(feature = "inmemory")]

mod common;

use auth_cache_kit::backend::InMemoryBackend;
use auth_cache_kit::queue::JobDescriptor;
use auth_cache_kit::{
    AdapterBuilder, AdapterConfig, AuthCacheAdapter, Error, Operation, QueueBackend, Result,
};
use common::{backend_writes, cached, fast_config, init_logging, FlakyQueue, StallingQueue, UnavailableCache};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

fn in_memory(config: AdapterConfig) -> (InMemoryBackend, AuthCacheAdapter<InMemoryBackend, InMemoryBackend>) {
    let backend = InMemoryBackend::new();
    let adapter = AuthCacheAdapter::new(backend.clone(), backend.clone(), config)
        .expect("Failed to build adapter");
    (backend, adapter)
}

#[tokio::test]
async fn test_scenario_a_email_lookup_after_backend_populates() {
    init_logging();
    let (backend, adapter) = in_memory(fast_config());

    adapter
        .create_user(json!({ "id": "u1", "email": "a@b.com" }))
        .await
        .expect("Failed to create user");

    // The backend consumes the job and writes its own view of the user.
    let job = JobDescriptor::parse(&backend.pop_job("auth").expect("job queued")).unwrap();
    assert_eq!(job.operation, Operation::CreateUser);
    let payload = job.payload_value().unwrap();
    backend_writes(&backend, "USER_DATA:u1", &json!({ "id": "u1", "email": payload["email"] })).await;
    backend_writes(&backend, "EMAIL_INDEX:a@b.com", &json!("u1")).await;

    let user = adapter
        .get_user_by_email("a@b.com")
        .await
        .expect("Failed to read")
        .expect("user exists");
    assert_eq!(user["id"], "u1");
    assert_eq!(backend.queue_len("auth"), 0, "no second queue round trip");
}

/// Records whether `SESSION_DATA:s1` was still cached when the push arrived.
#[derive(Clone)]
struct ProbeQueue {
    cache: InMemoryBackend,
    seen_cached: Arc<Mutex<Vec<bool>>>,
}

impl QueueBackend for ProbeQueue {
    async fn push(&self, queue: &str, job: String) -> Result<()> {
        let present = cached(&self.cache, "SESSION_DATA:s1").await.is_some();
        self.seen_cached.lock().unwrap().push(present);
        self.cache.push(queue, job).await
    }
}

#[tokio::test]
async fn test_scenario_b_update_session_invalidates_before_ack() {
    init_logging();
    let cache = InMemoryBackend::new();
    let probe = ProbeQueue {
        cache: cache.clone(),
        seen_cached: Arc::new(Mutex::new(Vec::new())),
    };
    let adapter = AdapterBuilder::new(cache.clone(), probe.clone())
        .with_config(fast_config())
        .build()
        .expect("Failed to build adapter");

    backend_writes(&cache, "SESSION_DATA:s1", &json!({ "sessionToken": "s1", "userId": "u1" })).await;

    adapter
        .update_session(json!({ "sessionToken": "s1", "expires": "2030-01-01" }))
        .await
        .expect("Failed to update session");

    assert_eq!(*probe.seen_cached.lock().unwrap(), vec![false]);
    assert_eq!(cached(&cache, "SESSION_DATA:s1").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_unanswered_read_times_out_at_budget() {
    init_logging();
    let (backend, adapter) = in_memory(fast_config());

    let started = Instant::now();
    let err = adapter.get_user("u404").await.unwrap_err();
    let elapsed = started.elapsed();

    match err {
        Error::ReadTimeout { key, budget } => {
            assert_eq!(key, "USER_DATA:u404");
            assert_eq!(budget, Duration::from_millis(100));
        }
        other => panic!("expected ReadTimeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(130));
    assert_eq!(backend.queue_len("auth"), 1);
}

#[tokio::test]
async fn test_write_then_read_observes_write() {
    let (backend, adapter) = in_memory(fast_config());

    adapter
        .create_user(json!({ "id": "u1", "email": "a@b.com", "name": "Ada" }))
        .await
        .unwrap();
    let updated = adapter
        .update_user(json!({ "id": "u1", "name": "Grace" }))
        .await
        .unwrap()
        .expect("user was cached");
    assert_eq!(updated["name"], "Grace");

    let user = adapter.get_user("u1").await.unwrap().unwrap();
    assert_eq!(user["name"], "Grace");
    assert_eq!(user["email"], "a@b.com");

    adapter
        .create_verification_request(json!({ "identifier": "a@b.com", "token": "t1" }))
        .await
        .unwrap();
    let used = adapter.use_verification_request("a@b.com", "t1").await.unwrap();
    assert_eq!(used.unwrap()["token"], "t1");
    assert_eq!(adapter.use_verification_request("a@b.com", "t1").await.unwrap(), None);

    // create, update, create, use, use
    assert_eq!(backend.queue_len("auth"), 5);
}

#[tokio::test(start_paused = true)]
async fn test_session_ttl_expires_entry() {
    let mut config = fast_config();
    config.session.ttl_seconds = 2;
    config.session.persist = false;
    let (backend, adapter) = in_memory(config);

    adapter
        .create_session(json!({ "sessionToken": "s1", "userId": "u1" }))
        .await
        .unwrap();
    assert!(cached(&backend, "SESSION_DATA:s1").await.is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cached(&backend, "SESSION_DATA:s1").await.is_none());
    assert!(adapter.get_session_and_user("s1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausted_once_without_phantom_entry() {
    init_logging();
    let cache = InMemoryBackend::new();
    let queue = StallingQueue::default();
    let mut config = fast_config();
    config.enqueue_timeout_ms = 20;
    config.retry_backoff_ms = 10;
    let adapter = AuthCacheAdapter::new(cache.clone(), queue.clone(), config).unwrap();

    let err = adapter
        .link_account(json!({ "provider": "github", "providerAccountId": "42", "userId": "u1" }))
        .await
        .unwrap_err();

    match &err {
        Error::RetryExhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert!(matches!(**last, Error::EnqueueTimeout { .. }));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    assert_eq!(err.report().code, "RETRY_EXHAUSTED");
    assert_eq!(queue.pushes.load(Ordering::SeqCst), 3);
    assert_eq!(cached(&cache, "ACCOUNT_DATA:github:42").await, None);
    assert_eq!(cached(&cache, "ACCOUNT_INDEX:github:42").await, None);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recovered_by_retry() {
    let cache = InMemoryBackend::new();
    let queue = FlakyQueue::new(&cache, 2);
    let adapter = AuthCacheAdapter::new(cache.clone(), queue.clone(), fast_config()).unwrap();

    let outcome = adapter
        .execute(Operation::CreateUser, json!({ "id": "u1" }))
        .await
        .expect("Failed to create user");

    assert_eq!(outcome.attempts, 3);
    assert_eq!(queue.pushes.load(Ordering::SeqCst), 3);
    assert_eq!(cache.queue_len("auth"), 1);
    assert!(cached(&cache, "USER_DATA:u1").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_extra_caller_suspends_not_rejected() {
    let mut config = fast_config();
    config.max_concurrency = 2;
    config.max_jobs_per_tick = 10;
    let (backend, adapter) = in_memory(config);

    let reads: Vec<_> = ["u1", "u2", "u3"]
        .into_iter()
        .map(|id| {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.get_user(id).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(adapter.limiter().in_flight(), 2);
    assert_eq!(backend.queue_len("auth"), 2, "third caller is parked in the limiter");

    for read in reads {
        let err = read.await.expect("task panicked").unwrap_err();
        assert!(matches!(err, Error::ReadTimeout { .. }));
    }
    assert_eq!(backend.queue_len("auth"), 3);
    assert_eq!(adapter.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_unavailable_cache_is_an_error_not_a_miss() {
    let queue = InMemoryBackend::new();
    let adapter = AuthCacheAdapter::new(UnavailableCache, queue.clone(), fast_config()).unwrap();

    assert!(matches!(
        adapter.get_user("u1").await,
        Err(Error::CacheUnavailable(_))
    ));
    assert!(matches!(
        adapter.create_user(json!({ "id": "u1" })).await,
        Err(Error::CacheUnavailable(_))
    ));
    assert!(!adapter.health_check().await.unwrap());
    assert_eq!(queue.queue_len("auth"), 0);
}

#[tokio::test]
async fn test_closed_adapter_rejects_queue_work() {
    let (_, adapter) = in_memory(fast_config());
    adapter.close();

    let err = adapter.get_user("u1").await.unwrap_err();
    assert_eq!(err.code(), "ADAPTER_CLOSED");
}
