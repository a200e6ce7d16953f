//! Adapter configuration.
//!
//! Consumed once at construction. Field names follow the camelCase options
//! object the identity layer passes in, so a config can be deserialized
//! straight from that JSON.

use crate::entity::EntityKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-entity persistence, caching and TTL settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EntitySettings {
    /// Enqueue mutations and read misses for the backend.
    pub persist: bool,
    /// Maintain cache entries for this entity.
    pub cache: bool,
    /// TTL for entries and their indexes; 0 = never expire.
    pub ttl_seconds: u64,
    /// Queue override for this entity's jobs.
    pub queue: Option<String>,
}

impl Default for EntitySettings {
    fn default() -> Self {
        EntitySettings {
            persist: true,
            cache: true,
            ttl_seconds: 0,
            queue: None,
        }
    }
}

/// Full adapter configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterConfig {
    pub user: EntitySettings,
    pub session: EntitySettings,
    pub account: EntitySettings,
    pub verification_request: EntitySettings,

    pub queue_name: String,
    /// Deployment namespace placed before every cache key. Empty = none.
    pub cache_prefix: String,
    pub key_separator: String,

    pub enqueue_timeout_ms: u64,
    pub dequeue_timeout_ms: u64,
    pub process_timeout_ms: u64,

    pub max_retries: u32,
    pub max_concurrency: usize,
    pub max_jobs_per_tick: usize,
    pub tick_interval_ms: u64,

    /// Interval between cache re-reads while awaiting a backend response.
    pub poll_interval_ms: u64,
    /// Base delay of the exponential backoff between write attempts.
    pub retry_backoff_ms: u64,

    pub debug: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            user: EntitySettings::default(),
            session: EntitySettings::default(),
            account: EntitySettings::default(),
            verification_request: EntitySettings::default(),
            queue_name: "auth".to_string(),
            cache_prefix: String::new(),
            key_separator: ":".to_string(),
            enqueue_timeout_ms: 10_000,
            dequeue_timeout_ms: 10_000,
            process_timeout_ms: 10_000,
            max_retries: 3,
            max_concurrency: 1,
            max_jobs_per_tick: 1,
            tick_interval_ms: 10,
            poll_interval_ms: 25,
            retry_backoff_ms: 100,
            debug: false,
        }
    }
}

impl AdapterConfig {
    /// Parse a configuration from its JSON options form.
    ///
    /// Missing fields take their defaults. The result is validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AdapterConfig = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("Invalid adapter config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConfigError` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(Error::ConfigError("queueName must not be empty".to_string()));
        }
        if self.key_separator.is_empty() {
            return Err(Error::ConfigError(
                "keySeparator must not be empty".to_string(),
            ));
        }
        for (field, value) in [
            ("enqueueTimeoutMs", self.enqueue_timeout_ms),
            ("dequeueTimeoutMs", self.dequeue_timeout_ms),
            ("processTimeoutMs", self.process_timeout_ms),
            ("tickIntervalMs", self.tick_interval_ms),
            ("pollIntervalMs", self.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(Error::ConfigError(format!("{} must be positive", field)));
            }
        }
        if self.max_retries == 0 {
            return Err(Error::ConfigError("maxRetries must be at least 1".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(Error::ConfigError(
                "maxConcurrency must be at least 1".to_string(),
            ));
        }
        if self.max_jobs_per_tick == 0 {
            return Err(Error::ConfigError(
                "maxJobsPerTick must be at least 1".to_string(),
            ));
        }
        for kind in EntityKind::ALL {
            if let Some(queue) = &self.entity(kind).queue {
                if queue.trim().is_empty() {
                    return Err(Error::ConfigError(format!(
                        "queue override for {} must not be empty",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// Settings for one entity kind.
    pub fn entity(&self, kind: EntityKind) -> &EntitySettings {
        match kind {
            EntityKind::User => &self.user,
            EntityKind::Session => &self.session,
            EntityKind::Account => &self.account,
            EntityKind::VerificationRequest => &self.verification_request,
        }
    }

    /// Queue that receives jobs for `kind`.
    pub fn queue_for(&self, kind: EntityKind) -> &str {
        self.entity(kind)
            .queue
            .as_deref()
            .unwrap_or(self.queue_name.as_str())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            enqueue: Duration::from_millis(self.enqueue_timeout_ms),
            dequeue: Duration::from_millis(self.dequeue_timeout_ms),
            process: Duration::from_millis(self.process_timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// The three suspension budgets of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub enqueue: Duration,
    pub dequeue: Duration,
    pub process: Duration,
}

impl Timeouts {
    /// Total time a read may wait for the backend to populate the cache.
    pub fn read_budget(&self) -> Duration {
        self.dequeue + self.process
    }
}
