//! `OpenAI` Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for the Chat Completions
//! API (`/v1/chat/completions`), streaming assistant text deltas.

use futures::StreamExt;

use super::provider::AuthScheme;
use super::{FragmentStream, GenerationError, LlmDriver, LlmRequest, LlmSettings};

/// A decoded `data:` payload from the provider's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamData {
    /// Assistant text delta.
    Fragment(String),
    /// A choice reported a `finish_reason`; more frames may follow.
    Finished,
    /// The provider signalled the end of the response.
    Done,
}

/// Driver for the `OpenAI` Chat Completions API.
///
/// Connects to the provider's chat completions endpoint and streams the
/// assistant's text deltas.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> Result<FragmentStream, GenerationError> {
        let url = self.settings.provider.build_chat_url(&self.settings.base_url);

        let body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = match self.settings.provider.auth_scheme() {
                AuthScheme::Bearer => rb.bearer_auth(k),
                AuthScheme::ApiKeyHeader => rb.header("api-key", k),
            };
        }

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count = req.messages.len(),
            "Sending chat completions request"
        );

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let byte_stream = resp.bytes_stream();

        let out = async_stream::stream! {
            let mut buf = Vec::<u8>::new();
            let mut finished = false;

            futures::pin_mut!(byte_stream);
            loop {
                let chunk = match byte_stream.next().await {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        yield Err(GenerationError::from(e));
                        return;
                    }
                    None => break,
                };
                buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    match parse_frame(&String::from_utf8_lossy(&frame)) {
                        Ok(items) => {
                            for item in items {
                                match item {
                                    StreamData::Fragment(text) => yield Ok(text),
                                    StreamData::Finished => finished = true,
                                    StreamData::Done => return,
                                }
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // Some servers close without a trailing blank line.
            if !buf.is_empty() {
                match parse_frame(&String::from_utf8_lossy(&buf)) {
                    Ok(items) => {
                        for item in items {
                            match item {
                                StreamData::Fragment(text) => yield Ok(text),
                                StreamData::Finished => finished = true,
                                StreamData::Done => return,
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            // A connection closed mid-answer must not look like a complete one.
            if !finished {
                yield Err(GenerationError::Protocol(
                    "stream ended before [DONE]".to_string(),
                ));
            }
        };

        Ok(Box::pin(out))
    }
}

/// Decode every `data:` line of one SSE frame.
fn parse_frame(frame: &str) -> Result<Vec<StreamData>, GenerationError> {
    let mut items = Vec::new();

    for line in frame.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();

        if data == "[DONE]" {
            items.push(StreamData::Done);
            continue;
        }

        let v: serde_json::Value =
            serde_json::from_str(data).map_err(|e| GenerationError::Protocol(e.to_string()))?;

        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map_or_else(|| err.to_string(), ToString::to_string);
            return Err(GenerationError::Provider(message));
        }

        let choice = &v["choices"][0];
        if let Some(s) = choice["delta"]["content"].as_str()
            && !s.is_empty()
        {
            items.push(StreamData::Fragment(s.to_string()));
        }
        if choice["finish_reason"].is_string() {
            items.push(StreamData::Finished);
        }
    }

    Ok(items)
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
