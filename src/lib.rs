//! # auth-cache-kit
//!
//! A cache-and-queue mediation engine for identity and session storage.
//!
//! The identity layer calls a synchronous-looking API; persistence is owned
//! by a separate backend process that consumes a durable command queue and
//! populates a shared key-value cache. This crate sits in between.
//!
//! ## Features
//!
//! - **Read-through:** lookups hit the cache first, then enqueue a read job
//!   and wait for the backend to write the answer into the cache
//! - **Write-through:** mutations update the cache optimistically, then
//!   enqueue with retry and exponential backoff
//! - **Idempotent jobs:** every job carries a stable key derived from
//!   `(entityId, operation, canonical payload)`
//! - **Backpressure:** bounded in-flight operations and a per-tick dispatch quota
//! - **Backend Agnostic:** in-memory, Redis and Memcached, or your own
//!
//! ## Quick Start
//!
//! ```ignore
//! use auth_cache_kit::{backend::InMemoryBackend, AdapterBuilder};
//! use serde_json::json;
//!
//! let backend = InMemoryBackend::new();
//! let adapter = AdapterBuilder::new(backend.clone(), backend)
//!     .with_queue_name("auth")
//!     .build()?;
//!
//! adapter.create_user(json!({ "id": "u1", "email": "a@b.com" })).await?;
//! let user = adapter.get_user_by_email("a@b.com").await?;
//! ```

#[macro_use]
extern crate log;

pub mod backend;
pub mod builder;
pub mod config;
pub mod entity;
pub mod error;
pub mod idempotency;
pub mod key;
pub mod limiter;
pub mod operation;
pub mod queue;
pub mod read;
pub mod service;
pub mod store;
pub mod write;

// Re-exports for convenience
pub use backend::{CacheBackend, QueueBackend};
pub use builder::AdapterBuilder;
pub use config::{AdapterConfig, EntitySettings};
pub use entity::{CachePrefix, EntityKind};
pub use error::{Error, ErrorReport, Result};
pub use idempotency::{IdempotencyKey, IdempotencyKeyBuilder};
pub use operation::Operation;
pub use read::SessionAndUser;
pub use service::AuthCacheAdapter;
pub use write::WriteOutcome;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
