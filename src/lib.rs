//! Persistent conversational sessions over a streaming LLM.
//!
//! A browser is tied to a long-lived session through a cookie; each session
//! owns an append-only history of user and assistant turns; new messages are
//! answered by streaming the model's output while it is generated and storing
//! the finished answer once.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with SSE streaming
//! - **Sessions**: Cookie-backed session identity with compare-and-set creation
//! - **History**: Redis-backed (or in-memory) append-only turn storage
//! - **Generation**: Streaming Chat Completions driver behind a trait seam
//!
//! # Modules
//!
//! - [`chat`]: Caller-facing operations and the stream coordinator
//! - [`history`]: Turn storage
//! - [`llm`]: LLM driver trait, Chat Completions driver, generation pipeline
//! - [`normalized`]: Streaming event model sent to clients
//! - [`session`]: Session identity

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod chat;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod normalized;
pub mod server;
pub mod session;
pub mod telemetry;

use std::sync::Arc;

use crate::chat::ChatService;
use crate::config::AppConfig;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session, history and message operations.
    pub chat: ChatService,
    /// Loaded application configuration.
    pub config: Arc<AppConfig>,
}
