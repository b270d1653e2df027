//! Caller-facing chat operations.
//!
//! [`ChatService`] ties the pieces together: identity through a
//! [`SessionTokenStore`], turns through a [`HistoryStore`], and streaming
//! through the [`StreamCoordinator`].
//!
//! # Example
//!
//! ```rust,ignore
//! let tokens = MemoryTokenStore::new();
//! let session = service.get_active_session(&tokens).await?;
//!
//! let mut events = service.submit_message(&session, "Hello").await?;
//! while let Some(event) = events.next().await {
//!     // forward fragments to the user
//! }
//! ```

pub mod coordinator;

pub use coordinator::{EventStream, Interruption, StreamCoordinator, StreamEvent};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ChatError;
use crate::history::{HistoryStore, Turn};
use crate::llm::GenerationPipeline;
use crate::session::{DEFAULT_TOKEN_MAX_AGE, IdentityManager, SessionId, SessionTokenStore};

/// Entry point for session, history and message operations.
#[derive(Debug, Clone)]
pub struct ChatService {
    history: Arc<dyn HistoryStore>,
    coordinator: StreamCoordinator,
    token_max_age: Duration,
}

impl ChatService {
    /// Create a service over a history store and generation pipeline.
    pub fn new(history: Arc<dyn HistoryStore>, pipeline: GenerationPipeline) -> Self {
        let coordinator = StreamCoordinator::new(Arc::clone(&history), pipeline);
        Self {
            history,
            coordinator,
            token_max_age: DEFAULT_TOKEN_MAX_AGE,
        }
    }

    /// Override the lifetime of newly issued session tokens.
    #[must_use]
    pub fn with_token_max_age(mut self, max_age: Duration) -> Self {
        self.token_max_age = max_age;
        self
    }

    fn identity<'a>(&self, tokens: &'a dyn SessionTokenStore) -> IdentityManager<'a> {
        IdentityManager::new(tokens).with_max_age(self.token_max_age)
    }

    /// Return the browsing context's session, creating one if needed.
    pub async fn get_active_session(
        &self,
        tokens: &dyn SessionTokenStore,
    ) -> Result<SessionId, ChatError> {
        Ok(self.identity(tokens).get_or_create().await?)
    }

    /// Every stored turn of `session`, oldest first.
    pub async fn get_history(&self, session: &SessionId) -> Result<Vec<Turn>, ChatError> {
        Ok(self.history.read_all(session).await?)
    }

    /// Send `text` as the next user turn and stream the response.
    pub async fn submit_message(
        &self,
        session: &SessionId,
        text: &str,
    ) -> Result<EventStream, ChatError> {
        self.submit_message_with_cancel(session, text, CancellationToken::new())
            .await
    }

    /// Like [`ChatService::submit_message`], abandoning the exchange when
    /// `cancel` fires.
    pub async fn submit_message_with_cancel(
        &self,
        session: &SessionId,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<EventStream, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::InvalidInput("message must not be empty".to_string()));
        }

        let prior = self.history.read_all(session).await?;
        tracing::debug!(
            session_id = %session,
            prior_turns = prior.len(),
            "Submitting message"
        );

        Ok(self
            .coordinator
            .run(session.clone(), prior, text.to_string(), cancel)
            .await?)
    }

    /// Clear `session`'s history, drop its token and issue a new session.
    ///
    /// History is cleared before the token is deleted so a failure part way
    /// never leaves unreachable history behind. Repeating a reset is safe.
    pub async fn reset_session(
        &self,
        session: &SessionId,
        tokens: &dyn SessionTokenStore,
    ) -> Result<SessionId, ChatError> {
        self.history.clear(session).await?;

        let identity = self.identity(tokens);
        identity.invalidate().await?;
        let fresh = identity.get_or_create().await?;

        tracing::info!(
            name: "session.reset",
            old_session_id = %session,
            session_id = %fresh,
            "Session reset"
        );
        Ok(fresh)
    }
}
