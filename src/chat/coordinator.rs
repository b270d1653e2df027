//! Streaming relay with exactly-once history commit.
//!
//! The coordinator drives one exchange:
//! 1. Append the user turn before any generation starts
//! 2. Forward each fragment to the caller as soon as it arrives
//! 3. Accumulate fragments into the assistant text
//! 4. On normal completion, append the assistant turn once
//! 5. On error or cancellation, report the partial text and append nothing
//!
//! Dropping the returned stream early drops the provider stream with it and
//! commits nothing.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::history::{HistoryStore, StoreUnavailable, Turn};
use crate::llm::{GenerationError, GenerationPipeline};
use crate::session::SessionId;

/// Why a response stopped before completion.
#[derive(Debug, Clone)]
pub enum Interruption {
    /// The provider failed before or during generation.
    Failed(GenerationError),
    /// The caller cancelled the exchange.
    Cancelled,
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Event produced while relaying one exchange.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One fragment of model output, in arrival order.
    Fragment(String),
    /// Generation finished and the assistant turn is in history.
    Committed(Turn),
    /// Generation stopped early; `partial` was shown but not stored.
    Incomplete {
        /// Concatenation of every fragment delivered so far.
        partial: String,
        /// What stopped the response.
        cause: Interruption,
    },
    /// Generation finished but the assistant turn could not be stored.
    CommitFailed {
        /// The full response that was delivered.
        content: String,
        /// Store failure.
        error: StoreUnavailable,
    },
}

impl StreamEvent {
    /// Whether this event ends the exchange.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Boxed stream of [`StreamEvent`]s for one exchange.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Bridges the generation pipeline to the caller and commits the result.
#[derive(Debug, Clone)]
pub struct StreamCoordinator {
    history: Arc<dyn HistoryStore>,
    pipeline: GenerationPipeline,
}

impl StreamCoordinator {
    /// Create a coordinator over the given store and pipeline.
    pub fn new(history: Arc<dyn HistoryStore>, pipeline: GenerationPipeline) -> Self {
        Self { history, pipeline }
    }

    /// Run one exchange for `session`.
    ///
    /// `prior` is the history read before this exchange. The user turn is
    /// appended before this returns, so a failed store surfaces here rather
    /// than mid-stream.
    pub async fn run(
        &self,
        session: SessionId,
        prior: Vec<Turn>,
        user_text: String,
        cancel: CancellationToken,
    ) -> Result<EventStream, StoreUnavailable> {
        let context = self.pipeline.build_context(&prior, &user_text);
        self.history.append(&session, &Turn::user(user_text)).await?;

        let history = Arc::clone(&self.history);
        let mut fragments = self.pipeline.generate(context);

        let out = async_stream::stream! {
            let mut content = String::new();
            let mut count = 0usize;

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    next = fragments.next() => Some(next),
                };

                match next {
                    None => {
                        tracing::info!(
                            name: "chat.incomplete",
                            session_id = %session,
                            fragments = count,
                            reason = "cancelled",
                            "Exchange cancelled, assistant turn not committed"
                        );
                        yield StreamEvent::Incomplete {
                            partial: content,
                            cause: Interruption::Cancelled,
                        };
                        return;
                    }
                    Some(Some(Ok(fragment))) => {
                        count += 1;
                        content.push_str(&fragment);
                        yield StreamEvent::Fragment(fragment);
                    }
                    Some(Some(Err(e))) => {
                        tracing::warn!(
                            name: "chat.incomplete",
                            session_id = %session,
                            fragments = count,
                            error = %e,
                            "Generation failed, assistant turn not committed"
                        );
                        yield StreamEvent::Incomplete {
                            partial: content,
                            cause: Interruption::Failed(e),
                        };
                        return;
                    }
                    Some(None) => break,
                }
            }

            let turn = Turn::assistant(content);
            match history.append(&session, &turn).await {
                Ok(()) => {
                    tracing::info!(
                        name: "chat.committed",
                        session_id = %session,
                        fragments = count,
                        content_length = turn.content.len(),
                        "Assistant turn committed"
                    );
                    yield StreamEvent::Committed(turn);
                }
                Err(error) => {
                    tracing::error!(
                        session_id = %session,
                        error = %error,
                        "Failed to commit assistant turn"
                    );
                    yield StreamEvent::CommitFailed {
                        content: turn.content,
                        error,
                    };
                }
            }
        };

        Ok(Box::pin(out))
    }
}
