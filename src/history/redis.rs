//! Redis-backed history store.
//!
//! Each session is one Redis list at `{key_prefix}{session_id}`. Entries are
//! pushed to the head (`LPUSH`) and read back reversed, and each entry is a
//! JSON document of the form:
//!
//! ```json
//! {"type": "human", "data": {"content": "Hello"}}
//! ```
//!
//! This matches the layout used by existing LangChain-style deployments, so
//! histories written by them stay readable.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

use crate::session::SessionId;

use super::{HistoryStore, Role, StoreUnavailable, Turn};

/// Default key namespace for stored histories.
pub const DEFAULT_KEY_PREFIX: &str = "message_store:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum StoredKind {
    Human,
    Ai,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredData {
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredMessage {
    #[serde(rename = "type")]
    kind: StoredKind,
    data: StoredData,
}

impl From<&Turn> for StoredMessage {
    fn from(turn: &Turn) -> Self {
        let kind = match turn.role {
            Role::User => StoredKind::Human,
            Role::Assistant => StoredKind::Ai,
        };
        Self {
            kind,
            data: StoredData {
                content: turn.content.clone(),
            },
        }
    }
}

impl From<StoredMessage> for Turn {
    fn from(msg: StoredMessage) -> Self {
        let role = match msg.kind {
            StoredKind::Human => Role::User,
            StoredKind::Ai => Role::Assistant,
        };
        Self {
            role,
            content: msg.data.content,
        }
    }
}

fn encode(turn: &Turn) -> Result<String, StoreUnavailable> {
    serde_json::to_string(&StoredMessage::from(turn))
        .map_err(|e| StoreUnavailable::new(format!("encode turn: {e}")))
}

fn decode(raw: &str) -> Result<Turn, StoreUnavailable> {
    serde_json::from_str::<StoredMessage>(raw)
        .map(Turn::from)
        .map_err(|e| StoreUnavailable::new(format!("corrupt history entry: {e}")))
}

/// History store on top of a Redis connection manager.
///
/// The connection manager reconnects on its own; a request issued while the
/// server is unreachable fails with [`StoreUnavailable`].
#[derive(Clone)]
pub struct RedisHistoryStore {
    conn: ConnectionManager,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for RedisHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisHistoryStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RedisHistoryStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreUnavailable> {
        let client = redis::Client::open(url).map_err(|e| StoreUnavailable::new(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;

        Ok(Self {
            conn,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            ttl: None,
        })
    }

    /// Use a different key namespace.
    #[must_use]
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Expire a session's history after `ttl` without appends.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl.filter(|t| !t.is_zero());
        self
    }

    /// Verify the server answers.
    pub async fn ping(&self) -> Result<(), StoreUnavailable> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| StoreUnavailable::new(e.to_string()))
    }

    fn key(&self, id: &SessionId) -> String {
        format!("{}{}", self.key_prefix, id)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn append(&self, id: &SessionId, turn: &Turn) -> Result<(), StoreUnavailable> {
        let key = self.key(id);
        let payload = encode(turn)?;
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().lpush(&key, payload).ignore();
        if let Some(ttl) = self.ttl {
            let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
            pipe.expire(&key, seconds).ignore();
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;

        tracing::debug!(
            name: "history.appended",
            session_id = %id,
            role = ?turn.role,
            content_length = turn.content.len(),
            "Turn appended"
        );
        Ok(())
    }

    async fn read_all(&self, id: &SessionId) -> Result<Vec<Turn>, StoreUnavailable> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(self.key(id), 0, -1)
            .await
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;

        decode_list(&raw)
    }

    async fn clear(&self, id: &SessionId) -> Result<(), StoreUnavailable> {
        let mut conn = self.conn.clone();
        let removed: usize = conn
            .del(self.key(id))
            .await
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;

        tracing::debug!(session_id = %id, removed, "History cleared");
        Ok(())
    }
}

/// Decode an `LRANGE` result. The list is newest-first; turns come back in
/// append order. One bad entry fails the whole read.
fn decode_list(raw: &[String]) -> Result<Vec<Turn>, StoreUnavailable> {
    raw.iter().rev().map(String::as_str).map(decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_legacy_layout() {
        let json = encode(&Turn::user("Hello")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "human");
        assert_eq!(value["data"]["content"], "Hello");

        let json = encode(&Turn::assistant("Hi there!")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "ai");
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let raw = r#"{"type": "ai", "data": {"content": "Hi", "type": "ai", "additional_kwargs": {}, "example": false}}"#;
        assert_eq!(decode(raw).unwrap(), Turn::assistant("Hi"));
    }

    #[test]
    fn test_decode_rejects_corrupt_entry() {
        let err = decode("not json").unwrap_err();
        assert!(err.reason().contains("corrupt history entry"));

        let err = decode(r#"{"type": "tool", "data": {"content": "x"}}"#).unwrap_err();
        assert!(err.reason().contains("corrupt history entry"));
    }

    #[test]
    fn test_decode_list_restores_append_order() {
        let turns = [
            Turn::user("Hello"),
            Turn::assistant("Hi there!"),
            Turn::user("Again"),
        ];
        // LPUSH leaves the newest entry at the head.
        let raw: Vec<String> = turns.iter().rev().map(|t| encode(t).unwrap()).collect();

        assert_eq!(decode_list(&raw).unwrap(), turns.to_vec());
        assert!(decode_list(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_list_fails_on_one_corrupt_entry() {
        let raw = vec![
            encode(&Turn::assistant("Hi there!")).unwrap(),
            "{truncated".to_string(),
            encode(&Turn::user("Hello")).unwrap(),
        ];

        let err = decode_list(&raw).unwrap_err();
        assert!(err.reason().contains("corrupt history entry"));
    }
}
