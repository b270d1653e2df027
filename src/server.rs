//! HTTP routes, handlers and server startup.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::ChatService;
use crate::config::{AppConfig, HistoryBackend};
use crate::error::ChatError;
use crate::history::{HistoryStore, MemoryHistoryStore, RedisHistoryStore, Turn};
use crate::llm::{ChatCompletionsDriver, GenerationPipeline, LlmSettings};
use crate::normalized::{ChatEvent, sse_event};
use crate::session::CookieTokenStore;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: LlmSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        "LLM configuration loaded"
    );

    let history: Arc<dyn HistoryStore> = match config.history.backend {
        HistoryBackend::Redis => {
            let store = RedisHistoryStore::connect(&config.history.redis_url)
                .await?
                .with_key_prefix(config.history.key_prefix.clone())
                .with_ttl(config.history.ttl_seconds.map(Duration::from_secs));
            store.ping().await?;
            info!(
                name: "history.backend.ready",
                backend = "redis",
                key_prefix = %config.history.key_prefix,
                "History store connected"
            );
            Arc::new(store)
        }
        HistoryBackend::Memory => {
            tracing::warn!(
                name: "history.backend.ready",
                backend = "memory",
                "Using in-memory history; conversations are lost on restart"
            );
            Arc::new(MemoryHistoryStore::new())
        }
    };

    let driver = Arc::new(ChatCompletionsDriver::new(settings));
    let pipeline = GenerationPipeline::new(driver, config.llm.system_prompt.clone());
    let chat = ChatService::new(history, pipeline).with_token_max_age(config.session.max_age());

    let state = AppState {
        chat,
        config: Arc::clone(&config),
    };
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the HTTP router over `state`.
pub fn router(state: AppState) -> Router {
    // Bounds the time to response headers only; SSE bodies keep streaming.
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(api_session))
        .route("/api/session/reset", post(api_reset_session))
        .route("/api/history", get(api_history))
        .route("/api/chat", post(api_chat))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
}

/// Identifies the caller's active session.
#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /api/session - Return the active session, issuing one if needed.
async fn api_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), ChatError> {
    let tokens = CookieTokenStore::new(jar, &state.config.session);
    let session = state.chat.get_active_session(&tokens).await?;

    Ok((
        tokens.into_jar()?,
        Json(SessionResponse {
            session_id: session.to_string(),
        }),
    ))
}

/// GET /api/history - Every stored turn of the active session.
async fn api_history(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<Vec<Turn>>), ChatError> {
    let tokens = CookieTokenStore::new(jar, &state.config.session);
    let session = state.chat.get_active_session(&tokens).await?;
    let turns = state.chat.get_history(&session).await?;

    tracing::debug!(session_id = %session, turns = turns.len(), "History read");
    Ok((tokens.into_jar()?, Json(turns)))
}

/// POST /api/session/reset - Clear the conversation and rotate the session.
async fn api_reset_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SessionResponse>), ChatError> {
    let tokens = CookieTokenStore::new(jar, &state.config.session);
    let current = state.chat.get_active_session(&tokens).await?;
    let fresh = state.chat.reset_session(&current, &tokens).await?;

    Ok((
        tokens.into_jar()?,
        Json(SessionResponse {
            session_id: fresh.to_string(),
        }),
    ))
}

/// POST /api/chat - Submit a message and stream the response as SSE.
///
/// Errors that happen before the stream opens (empty message, history store
/// down) are plain JSON error responses. A client disconnect drops the stream
/// and leaves the assistant turn uncommitted.
async fn api_chat(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(req): Json<ChatRequest>,
) -> Result<
    (
        CookieJar,
        Sse<impl Stream<Item = Result<Event, Infallible>> + Send>,
    ),
    ChatError,
> {
    let tokens = CookieTokenStore::new(jar, &state.config.session);
    let session = state.chat.get_active_session(&tokens).await?;
    let events = state.chat.submit_message(&session, &req.message).await?;
    let jar = tokens.into_jar()?;

    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        name: "chat.stream.started",
        session_id = %session,
        request_id = %request_id,
        "Starting SSE stream"
    );

    let start = ChatEvent::StreamStart {
        request_id,
        session_id: session.to_string(),
    };
    let sse_stream = stream::iter([start])
        .chain(events.map(ChatEvent::from))
        .chain(stream::iter([ChatEvent::Done]))
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));

    Ok((
        jar,
        Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))),
    ))
}
