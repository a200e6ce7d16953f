//! Cache key construction.

use crate::entity::CachePrefix;
use crate::error::{Error, Result};

/// Builds fully qualified cache keys: `[namespace SEP] PREFIX SEP id`.
#[derive(Clone, Debug)]
pub struct CacheKeyBuilder {
    namespace: String,
    separator: String,
}

impl CacheKeyBuilder {
    pub fn new(namespace: impl Into<String>, separator: impl Into<String>) -> Self {
        CacheKeyBuilder {
            namespace: namespace.into(),
            separator: separator.into(),
        }
    }

    /// Build the stored key for `id` under `prefix`.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` for an empty id or one containing whitespace
    /// or control characters, which no backend accepts in a key.
    pub fn build(&self, prefix: CachePrefix, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(Error::ValidationError(format!(
                "empty cache key under {}",
                prefix
            )));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::ValidationError(format!(
                "cache key '{}' under {} contains whitespace or control characters",
                id.escape_debug(),
                prefix
            )));
        }

        let mut key = String::with_capacity(
            self.namespace.len() + prefix.as_str().len() + id.len() + 2 * self.separator.len(),
        );
        if !self.namespace.is_empty() {
            key.push_str(&self.namespace);
            key.push_str(&self.separator);
        }
        key.push_str(prefix.as_str());
        key.push_str(&self.separator);
        key.push_str(id);
        Ok(key)
    }
}

impl Default for CacheKeyBuilder {
    fn default() -> Self {
        CacheKeyBuilder::new("", ":")
    }
}
