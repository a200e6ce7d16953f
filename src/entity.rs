//! Entity kinds and cache namespaces.
//!
//! Entity bodies stay opaque JSON. This module only knows which fields
//! identify each kind and which cache prefixes hold them.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;

/// Cache namespaces shared with the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CachePrefix {
    UserData,
    EmailIndex,
    AccountIndex,
    SessionData,
    VerificationRequestData,
    AccountData,
}

impl CachePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePrefix::UserData => "USER_DATA",
            CachePrefix::EmailIndex => "EMAIL_INDEX",
            CachePrefix::AccountIndex => "ACCOUNT_INDEX",
            CachePrefix::SessionData => "SESSION_DATA",
            CachePrefix::VerificationRequestData => "VERIFICATION_REQUEST_DATA",
            CachePrefix::AccountData => "ACCOUNT_DATA",
        }
    }
}

impl fmt::Display for CachePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity schemas the identity layer persists through this adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Session,
    Account,
    VerificationRequest,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::User,
        EntityKind::Session,
        EntityKind::Account,
        EntityKind::VerificationRequest,
    ];

    /// Prefix of the primary data entry for this kind.
    pub fn cache_prefix(&self) -> CachePrefix {
        match self {
            EntityKind::User => CachePrefix::UserData,
            EntityKind::Session => CachePrefix::SessionData,
            EntityKind::Account => CachePrefix::AccountData,
            EntityKind::VerificationRequest => CachePrefix::VerificationRequestData,
        }
    }

    /// Extract the entity's cache ID from its body.
    ///
    /// Accounts and verification requests have composite IDs joined with `:`,
    /// which is the format the backend writes as well.
    ///
    /// # Errors
    ///
    /// `Error::ValidationError` when an identifying field is absent or not a
    /// non-empty string.
    pub fn cache_key(&self, payload: &Value) -> Result<String> {
        match self {
            EntityKind::User => required_str(payload, "id").map(str::to_string),
            EntityKind::Session => required_str(payload, "sessionToken").map(str::to_string),
            EntityKind::Account => Ok(account_key(
                required_str(payload, "provider")?,
                required_str(payload, "providerAccountId")?,
            )),
            EntityKind::VerificationRequest => Ok(verification_key(
                required_str(payload, "identifier")?,
                required_str(payload, "token")?,
            )),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::User => "user",
            EntityKind::Session => "session",
            EntityKind::Account => "account",
            EntityKind::VerificationRequest => "verification request",
        };
        f.write_str(name)
    }
}

/// `provider:providerAccountId`
pub fn account_key(provider: &str, provider_account_id: &str) -> String {
    format!("{}:{}", provider, provider_account_id)
}

/// `identifier:token`
pub fn verification_key(identifier: &str, token: &str) -> String {
    format!("{}:{}", identifier, token)
}

/// Read a required, non-empty string field.
pub fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    match payload.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(Error::ValidationError(format!(
            "field '{}' must not be empty",
            field
        ))),
        Some(_) => Err(Error::ValidationError(format!(
            "field '{}' must be a string",
            field
        ))),
        None => Err(Error::ValidationError(format!(
            "missing required field '{}'",
            field
        ))),
    }
}

/// Read an optional string field; non-strings count as absent.
pub fn optional_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Require the payload to be a JSON object.
pub fn require_object(payload: &Value, kind: EntityKind) -> Result<()> {
    if payload.is_object() {
        Ok(())
    } else {
        Err(Error::ValidationError(format!(
            "{} payload must be a JSON object",
            kind
        )))
    }
}

/// Shallow merge: top-level fields of `patch` overwrite those of `current`.
///
/// Returns `None` when either side is not an object.
pub fn merge_patch(current: &Value, patch: &Value) -> Option<Value> {
    let mut merged = current.as_object()?.clone();
    for (field, value) in patch.as_object()? {
        merged.insert(field.clone(), value.clone());
    }
    Some(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_generation() {
        let user = json!({ "id": "user_123", "email": "a@b.com" });
        assert_eq!(EntityKind::User.cache_key(&user).unwrap(), "user_123");
        assert_eq!(EntityKind::User.cache_prefix().as_str(), "USER_DATA");

        let session = json!({ "sessionToken": "s1", "userId": "user_123" });
        assert_eq!(EntityKind::Session.cache_key(&session).unwrap(), "s1");
    }

    #[test]
    fn test_composite_keys() {
        let account = json!({
            "provider": "github",
            "providerAccountId": "42",
            "userId": "u1",
        });
        assert_eq!(EntityKind::Account.cache_key(&account).unwrap(), "github:42");

        let request = json!({ "identifier": "a@b.com", "token": "t0k" });
        assert_eq!(
            EntityKind::VerificationRequest.cache_key(&request).unwrap(),
            "a@b.com:t0k"
        );
    }

    #[test]
    fn test_missing_or_malformed_id_is_validation_error() {
        let err = EntityKind::User
            .cache_key(&json!({ "email": "a@b.com" }))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));

        let err = EntityKind::User.cache_key(&json!({ "id": 7 })).unwrap_err();
        assert!(err.to_string().contains("must be a string"));

        let err = EntityKind::Session
            .cache_key(&json!({ "sessionToken": "" }))
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_merge_patch() {
        let current = json!({ "id": "u1", "name": "Ada", "email": "a@b.com" });
        let patch = json!({ "id": "u1", "name": "Grace" });

        let merged = merge_patch(&current, &patch).unwrap();
        assert_eq!(merged["name"], "Grace");
        assert_eq!(merged["email"], "a@b.com");

        assert!(merge_patch(&Value::Null, &patch).is_none());
    }
}
