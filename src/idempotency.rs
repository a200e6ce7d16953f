//! Idempotency key derivation.
//!
//! A key is an xxh3-128 digest over the entity ID, the operation name and
//! the canonical JSON form of the payload. Canonical form sorts object keys
//! and drops all insignificant whitespace, so two encodings of the same
//! logical payload always hash identically. No clock or randomness is
//! involved: the same inputs give the same key in any process, at any time.

use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use xxhash_rust::xxh3::xxh3_128;

/// Fixed-width (32 hex chars) deduplication key for one logical command.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub const LEN: usize = 32;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives [`IdempotencyKey`]s.
pub struct IdempotencyKeyBuilder;

impl IdempotencyKeyBuilder {
    /// Derive the key for `(entity_id, operation, payload)`.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` if `entity_id` or `operation` is empty, or
    /// if `payload` cannot be represented as JSON.
    pub fn build<P: Serialize + ?Sized>(
        entity_id: &str,
        operation: &str,
        payload: &P,
    ) -> Result<IdempotencyKey> {
        if entity_id.is_empty() {
            return Err(Error::ValidationError(
                "idempotency key needs a non-empty entity id".to_string(),
            ));
        }
        if operation.is_empty() {
            return Err(Error::ValidationError(
                "idempotency key needs a non-empty operation name".to_string(),
            ));
        }

        let canonical = canonicalize(payload)?;

        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        let mut input =
            Vec::with_capacity(entity_id.len() + operation.len() + canonical.len() + 32);
        for part in [entity_id, operation, canonical.as_str()] {
            input.extend_from_slice(&(part.len() as u64).to_le_bytes());
            input.extend_from_slice(part.as_bytes());
        }

        Ok(IdempotencyKey(format!("{:032x}", xxh3_128(&input))))
    }
}

/// Canonical JSON text for `payload`: sorted object keys, no whitespace.
///
/// # Errors
///
/// `Error::ValidationError` if the payload does not serialize to JSON
/// (e.g. a map with non-string keys).
pub fn canonicalize<P: Serialize + ?Sized>(payload: &P) -> Result<String> {
    let value = serde_json::to_value(payload).map_err(|e| {
        Error::ValidationError(format!("payload is not canonicalizable: {}", e))
    })?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (field, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(field)?);
                out.push(':');
                write_canonical(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}
