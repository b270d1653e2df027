//! Session identity allocation and client-held token persistence.

use std::fmt::{self, Write as _};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use thiserror::Error;

/// Default lifetime of the client-held session token (365 days).
pub const DEFAULT_TOKEN_MAX_AGE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Random bytes in the token part of a generated id (128 bits).
const TOKEN_BYTES: usize = 16;

/// Upper bound for ids accepted from the client.
const MAX_ID_LEN: usize = 256;

/// Opaque, durable identifier of one browsing context's conversation.
///
/// Generated ids look like `20240521_` followed by 32 lowercase hex
/// characters. The date stamp is the local creation day and carries no
/// meaning beyond that; uniqueness comes from the random token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id stamped with today's local date.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_on(Local::now().date_naive())
    }

    /// Generate a fresh id stamped with the given date.
    #[must_use]
    pub fn generate_on(date: NaiveDate) -> Self {
        let mut token = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut token);

        let mut id = date.format("%Y%m%d_").to_string();
        for byte in token {
            let _ = write!(id, "{byte:02x}");
        }
        Self(id)
    }

    /// Accept an id presented by the client.
    ///
    /// Ids stay opaque, so anything that is safe to round-trip through a
    /// cookie and a store key is accepted, not only the generated format.
    #[must_use]
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_graphic() && b != b';' && b != b',');
        valid.then_some(Self(raw))
    }

    /// Whether this id has the `{YYYYMMDD}_{32 hex}` shape produced by
    /// [`SessionId::generate`].
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        let Some((date, token)) = self.0.split_once('_') else {
            return false;
        };
        date.len() == 8
            && NaiveDate::parse_from_str(date, "%Y%m%d").is_ok()
            && token.len() == TOKEN_BYTES * 2
            && token
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The client-held session token could not be read or written.
#[derive(Debug, Error)]
#[error("session token persistence failed: {0}")]
pub struct IdentityPersistenceError(pub String);

/// Capability over the client-held token of a single browsing context.
///
/// The core never assumes a persistence medium; the HTTP layer supplies a
/// cookie-backed implementation and tests use [`MemoryTokenStore`].
#[async_trait]
pub trait SessionTokenStore: Send + Sync {
    /// Read the current token, if one is set and unexpired.
    async fn get(&self) -> Result<Option<String>, IdentityPersistenceError>;

    /// Store `value` with the given lifetime unless a token already exists.
    ///
    /// Returns the token held after the call: `value` when it was stored,
    /// otherwise the token that was already present.
    async fn set_if_absent(
        &self,
        value: &str,
        max_age: Duration,
    ) -> Result<String, IdentityPersistenceError>;

    /// Remove the token. Removing an absent token is not an error.
    async fn delete(&self) -> Result<(), IdentityPersistenceError>;
}

/// Allocates and persists the session id of one browsing context.
#[derive(Clone, Copy)]
pub struct IdentityManager<'a> {
    tokens: &'a dyn SessionTokenStore,
    max_age: Duration,
}

impl fmt::Debug for IdentityManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityManager")
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl<'a> IdentityManager<'a> {
    /// Create a manager over the given token store.
    #[must_use]
    pub fn new(tokens: &'a dyn SessionTokenStore) -> Self {
        Self {
            tokens,
            max_age: DEFAULT_TOKEN_MAX_AGE,
        }
    }

    /// Override the token lifetime.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Return the persisted id, creating and persisting one if absent.
    ///
    /// An existing id is never overwritten. If another request created an
    /// id between our read and write, that id is returned instead of ours.
    pub async fn get_or_create(&self) -> Result<SessionId, IdentityPersistenceError> {
        if let Some(raw) = self.tokens.get().await? {
            if let Some(id) = SessionId::parse(raw) {
                return Ok(id);
            }
            tracing::warn!(
                name: "session.token.rejected",
                "Discarding malformed session token"
            );
            self.tokens.delete().await?;
        }

        let candidate = SessionId::generate();
        let stored = self
            .tokens
            .set_if_absent(candidate.as_str(), self.max_age)
            .await?;

        let id = SessionId::parse(stored).ok_or_else(|| {
            IdentityPersistenceError("token store returned a malformed session id".to_string())
        })?;

        if id == candidate {
            tracing::info!(name: "session.created", session_id = %id, "Session created");
        } else {
            tracing::debug!(
                session_id = %id,
                "Concurrent session creation observed, adopting existing id"
            );
        }
        Ok(id)
    }

    /// Delete the persisted id. History is left untouched.
    pub async fn invalidate(&self) -> Result<(), IdentityPersistenceError> {
        self.tokens.delete().await?;
        tracing::info!(name: "session.invalidated", "Session token deleted");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct StoredToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process token store modelling a single browsing context.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, Option<StoredToken>>, IdentityPersistenceError> {
        self.slot
            .lock()
            .map_err(|e| IdentityPersistenceError(e.to_string()))
    }
}

#[async_trait]
impl SessionTokenStore for MemoryTokenStore {
    async fn get(&self) -> Result<Option<String>, IdentityPersistenceError> {
        let mut slot = self.lock()?;
        if slot.as_ref().is_some_and(|t| t.expires_at <= Utc::now()) {
            *slot = None;
        }
        Ok(slot.as_ref().map(|t| t.value.clone()))
    }

    async fn set_if_absent(
        &self,
        value: &str,
        max_age: Duration,
    ) -> Result<String, IdentityPersistenceError> {
        let mut slot = self.lock()?;
        let now = Utc::now();
        if let Some(existing) = slot.as_ref().filter(|t| t.expires_at > now) {
            return Ok(existing.value.clone());
        }

        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| IdentityPersistenceError(e.to_string()))?;
        *slot = Some(StoredToken {
            value: value.to_string(),
            expires_at: now + max_age,
        });
        Ok(value.to_string())
    }

    async fn delete(&self) -> Result<(), IdentityPersistenceError> {
        *self.lock()? = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_format() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 21).unwrap();
        let id = SessionId::generate_on(date);

        assert!(id.as_str().starts_with("20240521_"));
        assert_eq!(id.as_str().len(), "20240521_".len() + 32);
        assert!(id.is_canonical());
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn test_parse_rejects_unsafe_values() {
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("has space").is_none());
        assert!(SessionId::parse("a;b").is_none());
        assert!(SessionId::parse("x".repeat(MAX_ID_LEN + 1)).is_none());

        let legacy = SessionId::parse("legacy-id").unwrap();
        assert!(!legacy.is_canonical());
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let tokens = MemoryTokenStore::new();
        let identity = IdentityManager::new(&tokens);

        let first = identity.get_or_create().await.unwrap();
        let second = identity.get_or_create().await.unwrap();

        assert_eq!(first, second);
        assert!(first.is_canonical());
    }

    #[tokio::test]
    async fn test_invalidate_yields_new_id() {
        let tokens = MemoryTokenStore::new();
        let identity = IdentityManager::new(&tokens);

        let first = identity.get_or_create().await.unwrap();
        identity.invalidate().await.unwrap();
        assert!(tokens.get().await.unwrap().is_none());

        let second = identity.get_or_create().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_existing_token_is_not_overwritten() {
        let tokens = MemoryTokenStore::new();
        let stored = tokens
            .set_if_absent("20200101_winner", DEFAULT_TOKEN_MAX_AGE)
            .await
            .unwrap();
        assert_eq!(stored, "20200101_winner");

        let stored = tokens
            .set_if_absent("20200101_loser", DEFAULT_TOKEN_MAX_AGE)
            .await
            .unwrap();
        assert_eq!(stored, "20200101_winner");

        let id = IdentityManager::new(&tokens).get_or_create().await.unwrap();
        assert_eq!(id.as_str(), "20200101_winner");
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        let tokens = MemoryTokenStore::new();
        let identity = IdentityManager::new(&tokens).with_max_age(Duration::ZERO);

        let first = identity.get_or_create().await.unwrap();
        let second = identity.get_or_create().await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_malformed_token_is_replaced() {
        let tokens = MemoryTokenStore::new();
        tokens
            .set_if_absent("bad token", DEFAULT_TOKEN_MAX_AGE)
            .await
            .unwrap();

        let id = IdentityManager::new(&tokens).get_or_create().await.unwrap();
        assert!(id.is_canonical());
    }
}
