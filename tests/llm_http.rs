//! The chat-completion client against a local mock of the OpenAI-style API.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use index_chat::llm::{LlmClient, LlmSettings, OpenAiCompatibleClient};
use index_chat::models::ChatMessage;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: &'static str,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn completions(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push((auth, body));
    (state.status, state.body.to_string())
}

async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/v1", addr)
}

fn settings(base_url: String, max_retries: u32) -> LlmSettings {
    LlmSettings {
        model: "llama3-8b-8192".to_string(),
        api_key: "test-key".to_string(),
        base_url,
        temperature: 0.1,
        max_tokens: 64,
        timeout: Duration::from_secs(5),
        max_retries,
    }
}

fn mock(status: StatusCode, body: &'static str) -> MockState {
    MockState {
        status,
        body,
        requests: Arc::new(Mutex::new(Vec::new())),
    }
}

const OK_BODY: &str = r#"{"id":"chatcmpl-1","object":"chat.completion","choices":[{"index":0,"message":{"role":"assistant","content":"The sky is blue."},"finish_reason":"stop"}]}"#;

#[tokio::test]
async fn sends_model_messages_and_bearer_key() {
    let state = mock(StatusCode::OK, OK_BODY);
    let requests = state.requests.clone();
    let base_url = spawn_mock(state).await;

    let client = OpenAiCompatibleClient::new(settings(base_url, 0)).unwrap();
    let reply = client
        .chat(&[
            ChatMessage::system("Context: The sky is blue."),
            ChatMessage::user("What color is the sky?"),
        ])
        .await
        .unwrap();
    assert_eq!(reply, "The sky is blue.");

    let log = requests.lock().unwrap();
    assert_eq!(log.len(), 1);
    let (auth, body) = &log[0];
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "llama3-8b-8192");
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "What color is the sky?");
    assert_eq!(body["max_tokens"], 64);
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let state = mock(
        StatusCode::UNAUTHORIZED,
        r#"{"error":{"message":"Invalid API Key"}}"#,
    );
    let requests = state.requests.clone();
    let base_url = spawn_mock(state).await;

    let client = OpenAiCompatibleClient::new(settings(base_url, 3)).unwrap();
    let err = client.chat(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(err.to_string().contains("401"), "got: {}", err);
    assert_eq!(requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn server_error_is_retried() {
    let state = mock(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
    let requests = state.requests.clone();
    let base_url = spawn_mock(state).await;

    let client = OpenAiCompatibleClient::new(settings(base_url, 1)).unwrap();
    let err = client.chat(&[ChatMessage::user("hi")]).await.unwrap_err();
    assert!(err.to_string().contains("503"), "got: {}", err);
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn construction_makes_no_request() {
    let state = mock(StatusCode::OK, OK_BODY);
    let requests = state.requests.clone();
    let base_url = spawn_mock(state).await;

    let _client = OpenAiCompatibleClient::new(settings(base_url, 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(requests.lock().unwrap().is_empty());
}
