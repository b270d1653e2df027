//! Language-model access.
//!
//! This module turns a conversation into a stream of text fragments. The
//! [`LlmDriver`] trait is the seam to the hosted provider; the
//! [`GenerationPipeline`] assembles the request context and exposes the
//! provider output as a lazy, single-pass [`FragmentStream`].
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: `OpenAI`-compatible Chat Completions API
//!   (`/v1/chat/completions`) with SSE streaming
//!
//! # Example
//!
//! ```rust,ignore
//! use persistent_chat::llm::{ChatCompletionsDriver, GenerationPipeline, LlmSettings, Provider};
//!
//! let settings = LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-3.5-turbo".to_string(),
//!     provider: Provider::OpenAI,
//! };
//! let pipeline = GenerationPipeline::new(
//!     Arc::new(ChatCompletionsDriver::new(settings)),
//!     "You're an assistant.",
//! );
//! ```

pub mod chat_completions;
pub mod pipeline;
pub mod provider;

pub use chat_completions::ChatCompletionsDriver;
pub use pipeline::{GenerationContext, GenerationPipeline};
pub use provider::Provider;

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

use crate::history::{Role, Turn};

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-3.5-turbo`).
    pub model: String,
    /// Provider type (auto-detected from `base_url` if not specified).
    pub provider: Provider,
}

/// Role of a message sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Fixed system instruction.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

impl From<Role> for MessageRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

/// A message in a provider request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

impl Message {
    /// Create a message with the given role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Turn> for Message {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role.into(), turn.content.clone())
    }
}

/// Request to an LLM driver.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation messages, system instruction first.
    pub messages: Vec<Message>,
}

/// The provider failed before or during generation.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// Could not reach the provider or the connection dropped.
    #[error("provider connection failed: {0}")]
    Transport(String),

    /// The provider rejected the request.
    #[error("provider returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// The provider reported an error inside the stream.
    #[error("provider error: {0}")]
    Provider(String),

    /// The stream contained a frame we could not parse.
    #[error("malformed provider stream: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

/// Finite, single-use sequence of model output fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Trait for LLM streaming drivers.
///
/// Implementations emit the assistant's text as it is generated. The stream
/// ends when the provider finishes; dropping it abandons the request.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Open a streaming generation for `req`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or is rejected.
    async fn stream(&self, req: LlmRequest) -> Result<FragmentStream, GenerationError>;
}
