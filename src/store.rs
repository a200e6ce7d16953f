//! Typed front end over the shared key-value store.

use crate::backend::CacheBackend;
use crate::entity::CachePrefix;
use crate::error::{Error, Result};
use crate::key::CacheKeyBuilder;
use futures::future::try_join_all;
use serde_json::Value;
use std::time::Duration;

/// A primary cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub prefix: CachePrefix,
    pub key: String,
    pub value: Value,
    /// 0 = never expire.
    pub ttl_seconds: u64,
}

/// A secondary entry mapping an attribute to a primary entity ID.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub prefix: CachePrefix,
    pub key: String,
    pub entity_id: String,
    pub ttl_seconds: u64,
}

/// What an index entry resolves to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexTarget {
    Entity(String),
    /// The backend answered "no such entity" by writing `null`.
    NotFound,
}

/// Cache store: prefixed keys, JSON values, TTLs and index entries.
///
/// Clones share the underlying backend handle.
#[derive(Clone)]
pub struct CacheStore<B: CacheBackend> {
    backend: B,
    keys: CacheKeyBuilder,
}

impl<B: CacheBackend> CacheStore<B> {
    pub fn new(backend: B, keys: CacheKeyBuilder) -> Self {
        CacheStore { backend, keys }
    }

    /// Fully qualified key for `(prefix, key)`.
    pub fn key(&self, prefix: CachePrefix, key: &str) -> Result<String> {
        self.keys.build(prefix, key)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Look up an entry.
    ///
    /// # Errors
    ///
    /// - `Error::CacheUnavailable`: the store is unreachable (never a miss)
    /// - `Error::DeserializationError`: the stored bytes are not JSON
    /// - `Error::ValidationError`: malformed key
    pub async fn get(&self, prefix: CachePrefix, key: &str) -> Result<Option<Value>> {
        let full_key = self.key(prefix, key)?;
        match self.backend.get(&full_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                Error::DeserializationError(format!("entry {} is not JSON: {}", full_key, e))
            }),
            None => Ok(None),
        }
    }

    /// Overwrite an entry.
    pub async fn set(
        &self,
        prefix: CachePrefix,
        key: &str,
        value: &Value,
        ttl_seconds: u64,
    ) -> Result<()> {
        let full_key = self.key(prefix, key)?;
        let bytes = serde_json::to_vec(value)?;
        self.backend
            .set(&full_key, bytes, ttl_from_seconds(ttl_seconds))
            .await
    }

    /// Delete an entry. Absent keys are not an error.
    pub async fn invalidate(&self, prefix: CachePrefix, key: &str) -> Result<()> {
        let full_key = self.key(prefix, key)?;
        self.backend.delete(&full_key).await
    }

    /// Delete several entries concurrently.
    pub async fn invalidate_many(&self, targets: &[(CachePrefix, String)]) -> Result<()> {
        let full_keys = targets
            .iter()
            .map(|(prefix, key)| self.key(*prefix, key))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(full_keys.iter().map(|k| self.backend.delete(k))).await?;
        Ok(())
    }

    /// Resolve an index entry.
    pub async fn get_index(&self, prefix: CachePrefix, key: &str) -> Result<Option<IndexTarget>> {
        let full_key = self.key(prefix, key)?;
        match self.get(prefix, key).await? {
            Some(value) => index_target(&full_key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Write a primary entry and its indexes as one logical operation.
    ///
    /// If any index write fails, the primary and the indexes already written
    /// are invalidated before the original error is returned, so no entity
    /// is left cached with missing or mismatched indexes.
    pub async fn put_with_indexes(&self, entry: &CacheEntry, indexes: &[IndexEntry]) -> Result<()> {
        // Validate every key up front so a malformed index never leaves a
        // half-written entity behind.
        self.key(entry.prefix, &entry.key)?;
        for index in indexes {
            self.key(index.prefix, &index.key)?;
        }

        self.set(entry.prefix, &entry.key, &entry.value, entry.ttl_seconds)
            .await?;

        let mut written = vec![(entry.prefix, entry.key.clone())];
        for index in indexes {
            let target = Value::String(index.entity_id.clone());
            if let Err(e) = self
                .set(index.prefix, &index.key, &target, index.ttl_seconds)
                .await
            {
                if let Err(cleanup) = self.invalidate_many(&written).await {
                    warn!(
                        "⚠ Failed to roll back {} after index write failure: {}",
                        entry.key, cleanup
                    );
                }
                return Err(e);
            }
            written.push((index.prefix, index.key.clone()));
        }
        Ok(())
    }
}

/// Interpret the JSON value stored under an index key.
///
/// Index values are JSON strings holding the entity ID; `null` is the
/// backend's not-found answer.
pub fn index_target(full_key: &str, value: Value) -> Result<IndexTarget> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(IndexTarget::Entity(id)),
        Value::Null => Ok(IndexTarget::NotFound),
        other => Err(Error::DeserializationError(format!(
            "index {} holds {} instead of an entity id",
            full_key, other
        ))),
    }
}

/// `0` means no expiry.
pub fn ttl_from_seconds(ttl_seconds: u64) -> Option<Duration> {
    (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn store() -> (InMemoryBackend, CacheStore<InMemoryBackend>) {
        let backend = InMemoryBackend::new();
        (backend.clone(), CacheStore::new(backend, CacheKeyBuilder::default()))
    }

    /// Fails every `set` after the first `allowed` ones.
    #[derive(Clone)]
    struct FailingSets {
        inner: InMemoryBackend,
        allowed: usize,
        calls: Arc<AtomicUsize>,
    }

    impl CacheBackend for FailingSets {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.allowed {
                return Err(Error::CacheUnavailable("connection reset".to_string()));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    /// Every call fails as if the store were unreachable.
    #[derive(Clone)]
    struct Unreachable;

    impl CacheBackend for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Err(Error::CacheUnavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::CacheUnavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(Error::CacheUnavailable("connection refused".to_string()))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let (backend, store) = store();
        let user = json!({ "id": "u1", "email": "a@b.com" });

        store
            .set(CachePrefix::UserData, "u1", &user, 0)
            .await
            .expect("Failed to set");
        assert_eq!(
            store.get(CachePrefix::UserData, "u1").await.expect("Failed to get"),
            Some(user)
        );
        assert!(backend.get("USER_DATA:u1").await.unwrap().is_some());

        store
            .invalidate(CachePrefix::UserData, "u1")
            .await
            .expect("Failed to invalidate");
        assert_eq!(store.get(CachePrefix::UserData, "u1").await.unwrap(), None);

        // Idempotent.
        store
            .invalidate(CachePrefix::UserData, "u1")
            .await
            .expect("Failed to invalidate twice");
    }

    #[tokio::test]
    async fn test_set_overwrites_without_merge() {
        let (_, store) = store();
        store
            .set(CachePrefix::SessionData, "s1", &json!({ "a": 1, "b": 2 }), 0)
            .await
            .unwrap();
        store
            .set(CachePrefix::SessionData, "s1", &json!({ "a": 3 }), 0)
            .await
            .unwrap();

        assert_eq!(
            store.get(CachePrefix::SessionData, "s1").await.unwrap(),
            Some(json!({ "a": 3 }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_zero_never_expires_and_ttl_n_expires() {
        let (_, store) = store();
        store
            .set(CachePrefix::UserData, "forever", &json!({}), 0)
            .await
            .unwrap();
        store
            .set(CachePrefix::UserData, "brief", &json!({}), 2)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get(CachePrefix::UserData, "brief").await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(60 * 60 * 24 * 365)).await;
        assert!(store
            .get(CachePrefix::UserData, "forever")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_not_a_miss() {
        let store = CacheStore::new(Unreachable, CacheKeyBuilder::default());
        let err = store.get(CachePrefix::UserData, "u1").await.unwrap_err();
        assert!(matches!(err, Error::CacheUnavailable(_)));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_deserialization_error() {
        let (backend, store) = store();
        backend
            .set("USER_DATA:u1", b"\xff\xfe".to_vec(), None)
            .await
            .unwrap();

        assert!(matches!(
            store.get(CachePrefix::UserData, "u1").await,
            Err(Error::DeserializationError(_))
        ));
    }

    #[tokio::test]
    async fn test_get_index_variants() {
        let (backend, store) = store();
        backend
            .set("EMAIL_INDEX:a@b.com", b"\"u1\"".to_vec(), None)
            .await
            .unwrap();
        backend
            .set("EMAIL_INDEX:num@b.com", b"42".to_vec(), None)
            .await
            .unwrap();
        backend
            .set("EMAIL_INDEX:none@b.com", b"null".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(
            store.get_index(CachePrefix::EmailIndex, "a@b.com").await.unwrap(),
            Some(IndexTarget::Entity("u1".to_string()))
        );
        assert!(matches!(
            store.get_index(CachePrefix::EmailIndex, "num@b.com").await,
            Err(Error::DeserializationError(_))
        ));
        assert_eq!(
            store.get_index(CachePrefix::EmailIndex, "none@b.com").await.unwrap(),
            Some(IndexTarget::NotFound)
        );
        assert_eq!(
            store.get_index(CachePrefix::EmailIndex, "x@b.com").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_put_with_indexes() {
        let (_, store) = store();
        let entry = CacheEntry {
            prefix: CachePrefix::UserData,
            key: "u1".to_string(),
            value: json!({ "id": "u1", "email": "a@b.com" }),
            ttl_seconds: 0,
        };
        let index = IndexEntry {
            prefix: CachePrefix::EmailIndex,
            key: "a@b.com".to_string(),
            entity_id: "u1".to_string(),
            ttl_seconds: 0,
        };

        store
            .put_with_indexes(&entry, &[index])
            .await
            .expect("Failed to put");

        assert!(store.get(CachePrefix::UserData, "u1").await.unwrap().is_some());
        assert_eq!(
            store.get_index(CachePrefix::EmailIndex, "a@b.com").await.unwrap(),
            Some(IndexTarget::Entity("u1".to_string()))
        );
    }

    #[tokio::test]
    async fn test_index_failure_rolls_back_primary() {
        let inner = InMemoryBackend::new();
        let backend = FailingSets {
            inner: inner.clone(),
            allowed: 2,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let store = CacheStore::new(backend, CacheKeyBuilder::default());

        let entry = CacheEntry {
            prefix: CachePrefix::AccountData,
            key: "github:42".to_string(),
            value: json!({ "provider": "github", "providerAccountId": "42", "userId": "u1" }),
            ttl_seconds: 0,
        };
        let indexes = [
            IndexEntry {
                prefix: CachePrefix::AccountIndex,
                key: "github:42".to_string(),
                entity_id: "u1".to_string(),
                ttl_seconds: 0,
            },
            IndexEntry {
                prefix: CachePrefix::EmailIndex,
                key: "a@b.com".to_string(),
                entity_id: "u1".to_string(),
                ttl_seconds: 0,
            },
        ];

        let err = store.put_with_indexes(&entry, &indexes).await.unwrap_err();
        assert!(matches!(err, Error::CacheUnavailable(_)));

        // Primary and the first index were written, then rolled back.
        assert!(inner.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_index_key_writes_nothing() {
        let (backend, store) = store();
        let entry = CacheEntry {
            prefix: CachePrefix::UserData,
            key: "u1".to_string(),
            value: json!({ "id": "u1" }),
            ttl_seconds: 0,
        };
        let index = IndexEntry {
            prefix: CachePrefix::EmailIndex,
            key: "has space@b.com".to_string(),
            entity_id: "u1".to_string(),
            ttl_seconds: 0,
        };

        assert!(matches!(
            store.put_with_indexes(&entry, &[index]).await,
            Err(Error::ValidationError(_))
        ));
        assert!(backend.is_empty().await);
    }
}
