//! Context assembly and lazy generation.

use std::sync::Arc;

use futures::StreamExt;

use crate::history::Turn;

use super::{FragmentStream, LlmDriver, LlmRequest, Message, MessageRole};

/// Default fixed system instruction.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You're an assistant.";

/// Ephemeral model input for one request: system instruction, prior
/// history and the new user turn, in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationContext {
    messages: Vec<Message>,
}

impl GenerationContext {
    /// Messages in the order they are sent to the provider.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn into_request(self) -> LlmRequest {
        LlmRequest {
            messages: self.messages,
        }
    }
}

/// Builds generation contexts and opens fragment streams on a driver.
#[derive(Clone)]
pub struct GenerationPipeline {
    driver: Arc<dyn LlmDriver>,
    system_prompt: String,
}

impl std::fmt::Debug for GenerationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationPipeline")
            .field("system_prompt", &self.system_prompt)
            .finish_non_exhaustive()
    }
}

impl GenerationPipeline {
    /// Create a pipeline over `driver` with a fixed system instruction.
    pub fn new(driver: Arc<dyn LlmDriver>, system_prompt: impl Into<String>) -> Self {
        Self {
            driver,
            system_prompt: system_prompt.into(),
        }
    }

    /// Merge the system instruction, `history` and the new user text.
    ///
    /// History is included in full; any token budget is the caller's concern.
    #[must_use]
    pub fn build_context(&self, history: &[Turn], user_text: &str) -> GenerationContext {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::new(MessageRole::System, self.system_prompt.clone()));
        messages.extend(history.iter().map(Message::from));
        messages.push(Message::new(MessageRole::User, user_text));
        GenerationContext { messages }
    }

    /// Stream the model's output for `context`.
    ///
    /// Nothing is sent to the provider until the stream is first polled.
    /// A failure to open the request arrives as the first item. The stream
    /// ends after the first error.
    pub fn generate(&self, context: GenerationContext) -> FragmentStream {
        let driver = Arc::clone(&self.driver);
        let request = context.into_request();

        Box::pin(async_stream::stream! {
            let mut inner = match driver.stream(request).await {
                Ok(s) => s,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            while let Some(item) = inner.next().await {
                match item {
                    Ok(text) if text.is_empty() => {}
                    Ok(text) => yield Ok(text),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }
}
