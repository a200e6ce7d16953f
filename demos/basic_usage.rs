//! Basic usage of the auth cache adapter against an in-process store.
//!
//! A background task plays the backend: it drains the queue, "persists"
//! into a map, and answers read jobs by writing the result into the cache.

use auth_cache_kit::backend::InMemoryBackend;
use auth_cache_kit::queue::JobDescriptor;
use auth_cache_kit::{AdapterBuilder, CacheBackend, Operation, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Minimal stand-in for the persistence service that consumes the queue.
async fn run_backend(store: InMemoryBackend) {
    let mut users: HashMap<String, Value> = HashMap::new();

    loop {
        let Some(wire) = store.pop_job("auth") else {
            tokio::time::sleep(Duration::from_millis(5)).await;
            continue;
        };
        let Ok(job) = JobDescriptor::parse(&wire) else {
            continue;
        };
        let Ok(payload) = job.payload_value() else {
            continue;
        };
        println!("  [backend] {} (attempt {})", job.operation, job.attempt_count);

        match job.operation {
            Operation::CreateUser | Operation::UpdateUser => {
                if let Some(id) = payload["id"].as_str() {
                    let entry = users.entry(id.to_string()).or_insert_with(|| json!({}));
                    if let (Some(current), Some(patch)) = (entry.as_object_mut(), payload.as_object()) {
                        for (k, v) in patch {
                            if k != "idempotency_key" {
                                current.insert(k.clone(), v.clone());
                            }
                        }
                    }
                }
            }
            Operation::GetUser => {
                let id = payload["id"].as_str().unwrap_or_default();
                let user = users.get(id).cloned().unwrap_or(Value::Null);
                let _ = store
                    .set(&format!("USER_DATA:{}", id), user.to_string().into_bytes(), None)
                    .await;
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Auth Cache Kit - Basic Example ===\n");

    // 1. One in-process store serves as both cache and queue
    println!("1. Initializing in-memory store and simulated backend...");
    let store = InMemoryBackend::new();
    tokio::spawn(run_backend(store.clone()));

    let adapter = AdapterBuilder::new(store.clone(), store.clone())
        .with_queue_name("auth")
        .with_timeouts(
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .with_debug(true)
        .build()?;
    println!("   ✓ Adapter ready\n");

    // 2. Write-through: visible in the cache before the backend acknowledges
    let id = uuid::Uuid::now_v7().to_string();
    println!("2. Creating user {}:", id);
    adapter
        .create_user(json!({ "id": id, "email": "ada@example.com", "name": "Ada" }))
        .await?;
    if let Some(user) = adapter.get_user_by_email("ada@example.com").await? {
        println!("   ✓ Served from cache: {}\n", user["name"]);
    }

    // 3. Read-through: the backend answers a cache miss
    println!("3. Dropping the cached entry and reading again:");
    adapter
        .store()
        .invalidate(auth_cache_kit::CachePrefix::UserData, &id)
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    if let Some(user) = adapter.get_user(&id).await? {
        println!("   ✓ Backend populated the cache: {}\n", user);
    }

    // 4. Unknown users come back as None, not as an error
    println!("4. Looking up a user the backend does not know:");
    let missing = adapter.get_user("nobody").await?;
    println!("   ✓ Result: {:?}\n", missing);

    // 5. Writes carry a stable idempotency key
    println!("5. Idempotency key of an update:");
    let outcome = adapter
        .execute(Operation::UpdateUser, json!({ "id": id, "name": "Ada L." }))
        .await?;
    println!(
        "   ✓ key {} after {} attempt(s)\n",
        outcome.idempotency_key, outcome.attempts
    );

    adapter.close();
    println!("=== Example Complete ===\n");

    Ok(())
}
