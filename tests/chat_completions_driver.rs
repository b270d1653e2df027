//! Chat Completions driver against a local fake provider.

use std::sync::Arc;

use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::post,
};
use futures::StreamExt;

use persistent_chat::chat::{ChatService, Interruption, StreamEvent};
use persistent_chat::history::{HistoryStore, MemoryHistoryStore, Turn};
use persistent_chat::llm::pipeline::DEFAULT_SYSTEM_PROMPT;
use persistent_chat::llm::{
    ChatCompletionsDriver, GenerationError, GenerationPipeline, LlmDriver, LlmRequest,
    LlmSettings, Message, MessageRole, Provider,
};
use persistent_chat::session::SessionId;

const STREAM_BODY: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\r\n\r\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\r\n\r\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" there\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"!\"}}]}\n\n",
    "data: [DONE]\n\n",
);

/// Connection closes mid-answer: no `finish_reason`, no `[DONE]`.
const TRUNCATED_BODY: &str =
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi th\"}}]}\n\n";

/// Ends on a `finish_reason` but never sends `[DONE]`.
const FINISHED_BODY: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hi\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}",
);

fn event_stream(body: &'static str) -> axum::response::Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn completions(
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-key");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "bad key").into_response();
    }

    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");

    event_stream(STREAM_BODY)
}

async fn spawn_provider() -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route(
            "/truncated/v1/chat/completions",
            post(|| async { event_stream(TRUNCATED_BODY) }),
        )
        .route(
            "/finished/v1/chat/completions",
            post(|| async { event_stream(FINISHED_BODY) }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings(base_url: String, api_key: &str) -> LlmSettings {
    LlmSettings {
        base_url,
        api_key: Some(api_key.to_string()),
        model: "gpt-3.5-turbo".to_string(),
        provider: Provider::Generic,
    }
}

fn request() -> LlmRequest {
    LlmRequest {
        messages: vec![
            Message::new(MessageRole::System, "You're an assistant."),
            Message::new(MessageRole::User, "Hello"),
        ],
    }
}

#[tokio::test]
async fn test_streams_fragments_in_order() {
    let base_url = spawn_provider().await;
    let driver = ChatCompletionsDriver::new(settings(base_url, "test-key"));

    let stream = driver.stream(request()).await.unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
    assert_eq!(fragments, vec!["Hi", " there", "!"]);
}

#[tokio::test]
async fn test_rejected_request_reports_status() {
    let base_url = spawn_provider().await;
    let driver = ChatCompletionsDriver::new(settings(base_url, "wrong-key"));

    match driver.stream(request()).await {
        Err(GenerationError::Status { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad key");
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("expected the request to be rejected"),
    }
}

#[tokio::test]
async fn test_unreachable_provider_is_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let driver = ChatCompletionsDriver::new(settings(format!("http://{addr}"), "test-key"));
    assert!(matches!(
        driver.stream(request()).await,
        Err(GenerationError::Transport(_))
    ));
}

#[tokio::test]
async fn test_stream_closed_before_done_is_an_error() {
    let base_url = spawn_provider().await;
    let driver =
        ChatCompletionsDriver::new(settings(format!("{base_url}/truncated"), "test-key"));

    let items: Vec<Result<String, GenerationError>> =
        driver.stream(request()).await.unwrap().collect().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "Hi th");
    assert!(matches!(items[1], Err(GenerationError::Protocol(_))));
}

#[tokio::test]
async fn test_finish_reason_without_done_completes() {
    let base_url = spawn_provider().await;
    let driver =
        ChatCompletionsDriver::new(settings(format!("{base_url}/finished"), "test-key"));

    let fragments: Vec<String> = driver
        .stream(request())
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(fragments, vec!["Hi"]);
}

#[tokio::test]
async fn test_truncated_answer_is_not_committed() {
    let base_url = spawn_provider().await;
    let driver =
        ChatCompletionsDriver::new(settings(format!("{base_url}/truncated"), "test-key"));
    let store = MemoryHistoryStore::new();
    let chat = ChatService::new(
        Arc::new(store.clone()),
        GenerationPipeline::new(Arc::new(driver), DEFAULT_SYSTEM_PROMPT),
    );
    let session = SessionId::generate();

    let events: Vec<StreamEvent> = chat
        .submit_message(&session, "Hello")
        .await
        .unwrap()
        .collect()
        .await;
    match events.last() {
        Some(StreamEvent::Incomplete { partial, cause }) => {
            assert_eq!(partial, "Hi th");
            assert!(matches!(cause, Interruption::Failed(GenerationError::Protocol(_))));
        }
        other => panic!("unexpected final event {other:?}"),
    }

    assert_eq!(
        store.read_all(&session).await.unwrap(),
        vec![Turn::user("Hello")]
    );
}
