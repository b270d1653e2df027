//! Append-only, session-keyed conversation history.
//!
//! The [`HistoryStore`] trait is the only way the rest of the crate touches
//! stored turns. Backends:
//!
//! - [`RedisHistoryStore`]: durable store shared across processes
//! - [`MemoryHistoryStore`]: process-local store for tests and local runs
//!
//! Read order always equals append order. Store failures are reported as
//! [`StoreUnavailable`] and must never be replaced by an empty history.

mod memory;
mod redis;

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// Author of a stored turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the end user.
    User,
    /// Response produced by the model.
    Assistant,
}

/// One immutable conversational entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author of the turn.
    pub role: Role,
    /// Full text of the turn.
    pub content: String,
}

impl Turn {
    /// Create a user turn.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The external history store could not serve a request.
#[derive(Debug, Clone, Error)]
#[error("history store unavailable: {reason}")]
pub struct StoreUnavailable {
    reason: String,
}

impl StoreUnavailable {
    /// Wrap a backend failure.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Backend-provided failure description.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Durable, ordered log of turns keyed by session.
#[async_trait]
pub trait HistoryStore: Send + Sync + std::fmt::Debug {
    /// Append one turn. The turn is durable once this returns `Ok`.
    async fn append(&self, id: &SessionId, turn: &Turn) -> Result<(), StoreUnavailable>;

    /// Read every turn for `id` in append order. Unknown ids yield `[]`.
    async fn read_all(&self, id: &SessionId) -> Result<Vec<Turn>, StoreUnavailable>;

    /// Remove every turn for `id`. Clearing an empty history is a no-op.
    async fn clear(&self, id: &SessionId) -> Result<(), StoreUnavailable>;
}
