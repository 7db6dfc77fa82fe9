//! Completion endpoints
//!
//! - `GET /{prompt}`: single-turn request, answered with plain text
//! - `POST /`: canonical request body, answered with plain text
//! - `POST /openai` and `POST /openai/{*rest}`: always private, answered
//!   with the chat-completion envelope
//! - `GET /models`: the model registry

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json, Router, routing};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::{Stream, StreamExt};
use relay_core::RequestContext;
use serde::Deserialize;

use crate::client::{CompletionStream, Dispatched};
use crate::convert::openai::chunk_envelope;
use crate::error::{GatewayError, error_body};
use crate::gateway::{Gateway, GatewayReply};
use crate::sse::DONE;
use crate::types::{AudioOptions, CompletionRequest, CompletionResponse, Message, RequestOptions, Role, new_completion_id, unix_now};

/// How a non-streaming answer is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Envelope {
    /// Raw text, JSON text in JSON mode, or audio bytes
    Text,
    /// Canonical chat-completion object
    ChatCompletion,
}

/// Query options of `GET /{prompt}`
#[derive(Debug, Default, Deserialize)]
struct PromptQuery {
    model: Option<String>,
    seed: Option<u64>,
    temperature: Option<f64>,
    #[serde(default)]
    json: bool,
    system: Option<String>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    private: bool,
    voice: Option<String>,
}

impl PromptQuery {
    fn into_request(self, prompt: String) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.filter(|s| !s.trim().is_empty()) {
            messages.push(Message::text(Role::System, system));
        }
        messages.push(Message::text(Role::User, prompt));

        let audio = self.voice.map(|voice| AudioOptions {
            voice,
            format: "mp3".to_owned(),
        });

        CompletionRequest {
            model: self.model,
            messages,
            private: self.private,
            options: RequestOptions {
                seed: self.seed,
                temperature: self.temperature,
                json: self.json,
                stream: self.stream,
                modalities: audio.as_ref().map(|_| vec!["text".to_owned(), "audio".to_owned()]),
                audio,
                ..RequestOptions::default()
            },
        }
    }
}

/// Routes serving completions and the model list
pub fn completion_router(gateway: Gateway) -> Router {
    Router::new()
        .route("/", routing::post(post_text))
        .route("/models", routing::get(list_models))
        .route("/openai", routing::post(post_openai))
        .route("/openai/{*rest}", routing::post(post_openai))
        .route("/{prompt}", routing::get(get_prompt))
        .with_state(gateway)
}

/// Handle `GET /{prompt}`
async fn get_prompt(
    State(gateway): State<Gateway>,
    context: Option<Extension<RequestContext>>,
    Path(prompt): Path<String>,
    Query(query): Query<PromptQuery>,
) -> Response {
    let request = query.into_request(prompt);
    respond(&gateway, request, context, Envelope::Text).await
}

/// Handle `POST /`
async fn post_text(
    State(gateway): State<Gateway>,
    context: Option<Extension<RequestContext>>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    respond(&gateway, request, context, Envelope::Text).await
}

/// Handle `POST /openai` and everything below it
async fn post_openai(
    State(gateway): State<Gateway>,
    context: Option<Extension<RequestContext>>,
    Json(mut request): Json<CompletionRequest>,
) -> Response {
    request.private = true;
    respond(&gateway, request, context, Envelope::ChatCompletion).await
}

/// Handle `GET /models`
async fn list_models(State(gateway): State<Gateway>) -> Response {
    Json(gateway.registry().summaries()).into_response()
}

async fn respond(
    gateway: &Gateway,
    request: CompletionRequest,
    context: Option<Extension<RequestContext>>,
    envelope: Envelope,
) -> Response {
    let context = context.map(|Extension(context)| context).unwrap_or_default();
    let json = request.options.json_mode();

    match gateway.complete(request, &context).await {
        Ok(GatewayReply {
            model,
            body: Dispatched::Stream(stream),
        }) => event_stream(stream, model).into_response(),
        Ok(GatewayReply {
            body: Dispatched::Completion(completion),
            ..
        }) => match envelope {
            Envelope::ChatCompletion => Json(completion).into_response(),
            Envelope::Text => text_response(&completion, json),
        },
        Err(error) => error.into_response(),
    }
}

fn text_response(completion: &CompletionResponse, json: bool) -> Response {
    if let Some(audio) = completion.audio()
        && let Ok(bytes) = STANDARD.decode(&audio.data)
    {
        return ([(header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"))], bytes).into_response();
    }

    let content_type = if json {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    };

    ([(header::CONTENT_TYPE, HeaderValue::from_static(content_type))], completion.text()).into_response()
}

/// Frame canonical events as `chat.completion.chunk` SSE data
///
/// The stream always ends with exactly one `[DONE]`; a failure is sent as
/// an error object first.
fn event_stream(stream: CompletionStream, model: String) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = new_completion_id();
    let created = unix_now();

    let events = async_stream::stream! {
        let mut stream = stream;

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => match chunk_envelope(&id, &model, created, &event) {
                    Some(chunk) => {
                        let data = serde_json::to_string(&chunk).unwrap_or_default();
                        yield Ok(Event::default().data(data));
                    }
                    None => break,
                },
                Err(error) => {
                    tracing::debug!(%model, kind = error.kind(), "stream ended with an error");
                    yield Ok(Event::default().data(error_event(&error)));
                    break;
                }
            }
        }

        yield Ok(Event::default().data(DONE));
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn error_event(error: &GatewayError) -> String {
    error_body(error).to_string()
}
