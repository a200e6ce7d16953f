//! Error types for the mediation engine.
//!
//! Every failure reaching a caller can be flattened into an [`ErrorReport`],
//! the single structured shape the identity layer expects.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Result type for all adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for cache, queue and coordinator operations.
#[derive(Debug)]
pub enum Error {
    /// Malformed input: missing ID fields, bad cache key, empty operation name.
    ValidationError(String),

    /// The queue store did not acknowledge the push within the enqueue timeout.
    EnqueueTimeout { queue: String, timeout: Duration },

    /// The awaited cache key did not appear within the dequeue + process budget.
    ReadTimeout { key: String, budget: Duration },

    /// A write failed on every permitted attempt.
    RetryExhausted { attempts: u32, last: Box<Error> },

    /// The key-value store is unreachable. Never reported as a cache miss.
    CacheUnavailable(String),

    /// The backend rejected a job through its own channel.
    BackendReportedFailure { message: String, transient: bool },

    /// Entity or job could not be encoded.
    SerializationError(String),

    /// Cached bytes are not valid JSON.
    DeserializationError(String),

    /// Invalid adapter or backend configuration.
    ConfigError(String),

    /// The adapter was closed; no further queue operations are admitted.
    AdapterClosed,
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::ValidationError(_) => "VALIDATION_ERROR",
            Error::EnqueueTimeout { .. } => "ENQUEUE_TIMEOUT",
            Error::ReadTimeout { .. } => "READ_TIMEOUT",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Error::BackendReportedFailure { .. } => "BACKEND_REPORTED_FAILURE",
            Error::SerializationError(_) => "SERIALIZATION_ERROR",
            Error::DeserializationError(_) => "DESERIALIZATION_ERROR",
            Error::ConfigError(_) => "CONFIG_ERROR",
            Error::AdapterClosed => "ADAPTER_CLOSED",
        }
    }

    /// Whether a write may resubmit the same job after this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::EnqueueTimeout { .. } => true,
            Error::BackendReportedFailure { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this is a timeout-class failure (enqueue or read budget).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::EnqueueTimeout { .. } | Error::ReadTimeout { .. })
    }

    /// Flatten into the structured `{ message, code, stack?, data? }` shape.
    pub fn report(&self) -> ErrorReport {
        let data = match self {
            Error::RetryExhausted { attempts, last } => Some(serde_json::json!({
                "attempts": attempts,
                "last": last.report(),
            })),
            Error::EnqueueTimeout { queue, timeout } => Some(serde_json::json!({
                "queue": queue,
                "timeoutMs": timeout.as_millis() as u64,
            })),
            Error::ReadTimeout { key, budget } => Some(serde_json::json!({
                "key": key,
                "budgetMs": budget.as_millis() as u64,
            })),
            Error::BackendReportedFailure { transient, .. } => {
                Some(serde_json::json!({ "transient": transient }))
            }
            _ => None,
        };

        ErrorReport {
            message: self.to_string(),
            code: self.code().to_string(),
            stack: self.cause_chain(),
            data,
        }
    }

    fn cause_chain(&self) -> Option<String> {
        let mut chain = Vec::new();
        let mut current = self;
        while let Error::RetryExhausted { last, .. } = current {
            chain.push(format!("{}: {}", last.code(), last));
            current = last;
        }
        if chain.is_empty() {
            None
        } else {
            Some(chain.join("\n"))
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::EnqueueTimeout { queue, timeout } => {
                write!(f, "Enqueue on '{}' timed out after {:?}", queue, timeout)
            }
            Error::ReadTimeout { key, budget } => {
                write!(f, "Read of '{}' timed out after {:?}", key, budget)
            }
            Error::RetryExhausted { attempts, last } => {
                write!(f, "Write failed after {} attempts: {}", attempts, last)
            }
            Error::CacheUnavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            Error::BackendReportedFailure { message, transient } => {
                let kind = if *transient { "transient" } else { "permanent" };
                write!(f, "Backend reported {} failure: {}", kind, message)
            }
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::DeserializationError(msg) => write!(f, "Deserialization error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::AdapterClosed => write!(f, "Adapter is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RetryExhausted { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

/// Structured error shape handed back to the identity layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}
