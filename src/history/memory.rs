//! Process-local history store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::session::SessionId;

use super::{HistoryStore, StoreUnavailable, Turn};

/// Thread-safe in-memory history store.
///
/// Cloning shares the underlying map. History does not survive the process,
/// so this backend is meant for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<RwLock<HashMap<SessionId, Vec<Turn>>>>,
}

impl MemoryHistoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with at least one stored turn.
    pub fn session_count(&self) -> Result<usize, StoreUnavailable> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;
        Ok(guard.len())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append(&self, id: &SessionId, turn: &Turn) -> Result<(), StoreUnavailable> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;
        guard.entry(id.clone()).or_default().push(turn.clone());
        Ok(())
    }

    async fn read_all(&self, id: &SessionId) -> Result<Vec<Turn>, StoreUnavailable> {
        let guard = self
            .inner
            .read()
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;
        Ok(guard.get(id).cloned().unwrap_or_default())
    }

    async fn clear(&self, id: &SessionId) -> Result<(), StoreUnavailable> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| StoreUnavailable::new(e.to_string()))?;
        guard.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_read_unknown_session_is_empty() {
        let store = MemoryHistoryStore::new();
        let turns = store.read_all(&SessionId::generate()).await.unwrap();
        assert!(turns.is_empty());
    }

    #[tokio::test]
    async fn test_append_order_round_trip() {
        let store = MemoryHistoryStore::new();
        let id = session("20240521_order");
        let turns = vec![
            Turn::user("one"),
            Turn::assistant("two"),
            Turn::user("one"),
            Turn::assistant("three"),
        ];

        for turn in &turns {
            store.append(&id, turn).await.unwrap();
        }

        assert_eq!(store.read_all(&id).await.unwrap(), turns);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = MemoryHistoryStore::new();
        let id = session("20240521_clear");

        store.clear(&id).await.unwrap();
        assert!(store.read_all(&id).await.unwrap().is_empty());

        store.append(&id, &Turn::user("hello")).await.unwrap();
        store.clear(&id).await.unwrap();
        store.clear(&id).await.unwrap();
        assert!(store.read_all(&id).await.unwrap().is_empty());
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = MemoryHistoryStore::new();
        let a = session("20240521_a");
        let b = session("20240521_b");

        store.append(&a, &Turn::user("for a")).await.unwrap();

        assert_eq!(store.read_all(&a).await.unwrap().len(), 1);
        assert!(store.read_all(&b).await.unwrap().is_empty());
        assert_eq!(store.session_count().unwrap(), 1);
    }
}
