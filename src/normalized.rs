//! Wire events for streamed chat responses.
//!
//! This module defines the event model sent to the browser over Server-Sent
//! Events while a response streams, and the mapping from the coordinator's
//! [`StreamEvent`]s onto it.
//!
//! # Event Types
//!
//! - `stream.start`: exchange accepted, carries the session id
//! - `message.delta`: one fragment of assistant text
//! - `message.complete`: full response, committed to history
//! - `message.incomplete`: partial response, not committed
//! - `error`: the exchange failed
//! - `done`: nothing further will be sent
//!
//! # Example
//!
//! ```rust
//! use persistent_chat::normalized::{ChatEvent, event_name};
//!
//! let event = ChatEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! assert_eq!(event_name(&event), "message.delta");
//! assert!(event.to_json().contains("Hello"));
//! ```

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

use crate::chat::{Interruption, StreamEvent};

/// Events streamed to the client for one exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Stream Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    /// The exchange was accepted and the user turn stored.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
        /// Session the exchange belongs to.
        session_id: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Message Content
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    /// The response finished and is stored in history.
    #[serde(rename = "message.complete")]
    MessageComplete {
        /// Full assistant text, equal to the concatenated deltas.
        content: String,
    },

    /// The response stopped early and was not stored.
    #[serde(rename = "message.incomplete")]
    MessageIncomplete {
        /// Text delivered before the interruption.
        partial: String,
        /// `generation` or `cancelled`.
        reason: String,
        /// Human-readable description.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Errors and Completion
    // ─────────────────────────────────────────────────────────────────────
    /// An error occurred during streaming.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has ended.
    #[serde(rename = "done")]
    Done,
}

impl From<StreamEvent> for ChatEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Fragment(text) => Self::MessageDelta { text },
            StreamEvent::Committed(turn) => Self::MessageComplete {
                content: turn.content,
            },
            StreamEvent::Incomplete { partial, cause } => {
                let reason = match cause {
                    Interruption::Failed(_) => "generation",
                    Interruption::Cancelled => "cancelled",
                };
                Self::MessageIncomplete {
                    partial,
                    reason: reason.to_string(),
                    message: cause.to_string(),
                }
            }
            StreamEvent::CommitFailed { error, .. } => Self::Error {
                message: error.to_string(),
                code: Some("store_unavailable".to_string()),
            },
        }
    }
}

impl ChatEvent {
    /// Serialize the event payload as JSON.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
        })
    }
}

/// Convert a [`ChatEvent`] to an axum SSE event.
///
/// The `event:` field carries [`event_name`] for `EventSource` listeners and
/// the `data:` field the JSON payload.
pub fn sse_event(evt: &ChatEvent) -> Event {
    Event::default().event(event_name(evt)).data(evt.to_json())
}

/// Get the SSE event name for a [`ChatEvent`].
pub fn event_name(evt: &ChatEvent) -> &'static str {
    match evt {
        ChatEvent::StreamStart { .. } => "stream.start",
        ChatEvent::MessageDelta { .. } => "message.delta",
        ChatEvent::MessageComplete { .. } => "message.complete",
        ChatEvent::MessageIncomplete { .. } => "message.incomplete",
        ChatEvent::Error { .. } => "error",
        ChatEvent::Done => "done",
    }
}
