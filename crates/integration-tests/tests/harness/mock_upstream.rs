//! Mock upstream speaking every supported dialect
//!
//! Each dialect has its own route; all of them answer with the same
//! configurable reply, delay and failure.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Reply used when a test does not set one
pub const DEFAULT_REPLY: &str = "Hello from the mock upstream";

/// A request the mock received
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub body: serde_json::Value,
    pub at: Instant,
}

pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    reply: Mutex<String>,
    delay: Mutex<Duration>,
    failure: Mutex<Option<(StatusCode, String)>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockState {
    fn record(&self, path: String, headers: &HeaderMap, body: &Bytes) {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);

        self.requests.lock().unwrap().push(Recorded {
            path,
            authorization,
            body,
            at: Instant::now(),
        });
    }

    /// Applies the delay, then returns the configured failure if any
    async fn before_reply(&self) -> Option<Response> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failure.lock().unwrap().clone();
        failure.map(|(status, body)| (status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
    }

    fn reply(&self) -> String {
        self.reply.lock().unwrap().clone()
    }
}

impl MockUpstream {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState {
            reply: Mutex::new(DEFAULT_REPLY.to_owned()),
            delay: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(chat_completions))
            .route("/v1/messages", routing::post(messages))
            .route("/v1beta/models/{action}", routing::post(generate_content))
            .route("/custom", routing::post(custom))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    pub fn openai_endpoint(&self) -> String {
        format!("http://{}/v1/chat/completions", self.addr)
    }

    pub fn messages_endpoint(&self) -> String {
        format!("http://{}/v1/messages", self.addr)
    }

    /// Template with the `{model}` placeholder left for the binding
    pub fn generate_endpoint(&self) -> String {
        format!("http://{}/v1beta/models/{{model}}:generateContent", self.addr)
    }

    pub fn custom_endpoint(&self) -> String {
        format!("http://{}/custom", self.addr)
    }

    pub fn set_reply(&self, reply: &str) {
        *self.state.reply.lock().unwrap() = reply.to_owned();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Answer every request with `status` and a JSON `body`
    pub fn fail_with(&self, status: StatusCode, body: serde_json::Value) {
        *self.state.failure.lock().unwrap() = Some((status, body.to_string()));
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn wants_stream(body: &Bytes) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("stream").and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}

/// Reply split into word-sized pieces for streaming
fn pieces(reply: &str) -> Vec<String> {
    reply.split_inclusive(' ').map(str::to_owned).collect()
}

fn event_stream(events: Vec<String>) -> Response {
    let body: String = events.into_iter().map(|data| format!("data: {data}\n\n")).collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

async fn chat_completions(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("/v1/chat/completions".to_owned(), &headers, &body);
    if let Some(failure) = state.before_reply().await {
        return failure;
    }

    let reply = state.reply();

    if wants_stream(&body) {
        let mut events: Vec<String> = pieces(&reply)
            .into_iter()
            .map(|piece| {
                json!({
                    "id": "chatcmpl-mock",
                    "object": "chat.completion.chunk",
                    "created": 1_700_000_000,
                    "choices": [{"index": 0, "delta": {"content": piece}}]
                })
                .to_string()
            })
            .collect();
        events.push(
            json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000,
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            })
            .to_string(),
        );
        events.push("[DONE]".to_owned());
        return event_stream(events);
    }

    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": reply}, "finish_reason": "stop"},
            {"index": 1, "message": {"role": "assistant", "content": "second choice"}, "finish_reason": "stop"}
        ],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

async fn messages(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("/v1/messages".to_owned(), &headers, &body);
    if let Some(failure) = state.before_reply().await {
        return failure;
    }

    let reply = state.reply();

    if wants_stream(&body) {
        let mut events = vec![
            json!({"type": "message_start", "message": {"id": "msg_mock", "usage": {"input_tokens": 10, "output_tokens": 0}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        ];
        events.extend(pieces(&reply).into_iter().map(|piece| {
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": piece}})
        }));
        events.push(json!({"type": "content_block_stop", "index": 0}));
        events.push(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 5}}));
        events.push(json!({"type": "message_stop"}));
        return event_stream(events.iter().map(ToString::to_string).collect());
    }

    Json(json!({
        "id": "msg_mock",
        "type": "message",
        "role": "assistant",
        "content": [{"type": "text", "text": reply}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 10, "output_tokens": 5}
    }))
    .into_response()
}

async fn generate_content(
    State(state): State<Arc<MockState>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.record(format!("/v1beta/models/{action}"), &headers, &body);
    if let Some(failure) = state.before_reply().await {
        return failure;
    }

    let reply = state.reply();

    if action.ends_with(":streamGenerateContent") {
        let pieces = pieces(&reply);
        let last = pieces.len().saturating_sub(1);
        let events = pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| {
                let mut candidate = json!({"content": {"role": "model", "parts": [{"text": piece}]}});
                if i == last {
                    candidate["finishReason"] = json!("STOP");
                }
                json!({"candidates": [candidate]}).to_string()
            })
            .collect();
        return event_stream(events);
    }

    Json(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": reply}]}, "finishReason": "STOP"}],
        "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
    }))
    .into_response()
}

async fn custom(State(state): State<Arc<MockState>>, headers: HeaderMap, body: Bytes) -> Response {
    state.record("/custom".to_owned(), &headers, &body);
    if let Some(failure) = state.before_reply().await {
        return failure;
    }

    ([(header::CONTENT_TYPE, "text/plain")], state.reply()).into_response()
}
