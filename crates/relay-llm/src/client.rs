//! Generic upstream client: one canonical request in, one canonical
//! completion or stream out

use std::pin::Pin;

use futures_util::{Stream, StreamExt, stream};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use relay_config::WireDialect;
use relay_telemetry::KeyValue;
use tokio_util::sync::CancellationToken;

use crate::convert::{self, StreamMapper};
use crate::error::GatewayError;
use crate::pipeline::PreparedRequest;
use crate::protocol::messages::API_VERSION;
use crate::registry::{ProviderBinding, ServiceDefinition};
use crate::sse::{self, SseFrame};
use crate::types::{CompletionResponse, FinishReason, StreamDelta, StreamEvent, StreamToolCall};

/// Longest upstream detail passed on to callers
const MAX_DETAIL_CHARS: usize = 512;

/// Canonical events ending in exactly one [`StreamEvent::Done`], unless an
/// error ends the stream first
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Result of a dispatch: a whole completion or a live stream
pub enum Dispatched {
    Completion(CompletionResponse),
    Stream(CompletionStream),
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completion(completion) => f.debug_tuple("Completion").field(completion).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Sends prepared requests to any upstream, whatever its dialect
///
/// Does not retry; fallback is the resilience layer's job.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub const fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Call the upstream bound to `service`
    ///
    /// Streaming requests return as soon as the upstream has answered with
    /// a success status. Cancelling the token aborts the call, or ends an
    /// already returned stream.
    pub async fn dispatch(
        &self,
        request: PreparedRequest,
        service: &ServiceDefinition,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, GatewayError> {
        let binding = &service.binding;
        let url = request
            .target
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("request reached the client without a resolved endpoint"))?;

        let wants_stream = request.options.stream;
        let mapper = (wants_stream && service.capabilities.streaming)
            .then(|| StreamMapper::for_dialect(binding.dialect))
            .flatten();

        let body = convert::encode(binding.dialect, &binding.upstream_model, &request, mapper.is_some())?;
        let url = if mapper.is_some() {
            convert::stream_url(binding.dialect, &url)
        } else {
            url
        };

        let mut headers = request.target.headers;
        if binding.dialect == WireDialect::MessagesApi {
            headers
                .entry(HeaderName::from_static("anthropic-version"))
                .or_insert(HeaderValue::from_static(API_VERSION));
        }

        tracing::debug!(
            model = %service.id,
            provider = %binding.provider,
            dialect = %binding.dialect,
            stream = mapper.is_some(),
            "dispatching upstream request"
        );

        let send = self.http.post(url).headers(headers).json(&body).send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(service)),
            response = send => response.map_err(|e| network_error(e, service))?,
        };

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = tokio::select! {
                () = cancel.cancelled() => return Err(cancelled(service)),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(record(status_error(status, &headers, &body, binding), service));
        }

        if let Some(mapper) = mapper {
            return Ok(Dispatched::Stream(native_stream(
                response,
                mapper,
                service,
                cancel.clone(),
            )));
        }

        let bytes = tokio::select! {
            () = cancel.cancelled() => return Err(cancelled(service)),
            bytes = response.bytes() => bytes.map_err(|e| network_error(e, service))?,
        };

        let mut completion = convert::decode(binding.dialect, &bytes).map_err(|detail| {
            record(
                GatewayError::UpstreamBadResponse {
                    status: Some(status.as_u16()),
                    detail: sanitize_detail(binding, &detail),
                },
                service,
            )
        })?;

        completion.model.clone_from(&service.id);
        completion.choices.truncate(1);

        if wants_stream {
            Ok(Dispatched::Stream(synthetic_stream(completion)))
        } else {
            Ok(Dispatched::Completion(completion))
        }
    }
}

fn native_stream(
    response: reqwest::Response,
    mapper: StreamMapper,
    service: &ServiceDefinition,
    cancel: CancellationToken,
) -> CompletionStream {
    let binding = service.binding.clone();
    let model = service.id.clone();

    Box::pin(async_stream::stream! {
        let frames = sse::convert(response.bytes_stream(), mapper);
        let mut frames = std::pin::pin!(frames);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                next = frames.next() => Some(next),
            };

            let Some(next) = next else {
                tracing::debug!(%model, "upstream stream cancelled");
                return;
            };

            match next {
                None | Some(Ok(SseFrame::Done)) => break,
                Some(Ok(SseFrame::Event(Ok(event)))) => yield Ok(event),
                Some(Ok(SseFrame::Event(Err(detail)))) => {
                    tracing::warn!(%model, provider = %binding.provider, %detail, "upstream reported an error mid-stream");
                    let error = GatewayError::UpstreamBadResponse {
                        status: None,
                        detail: sanitize_detail(&binding, &detail),
                    };
                    count(&error, &model);
                    yield Err(error);
                    return;
                }
                Some(Err(e)) => {
                    let error = if e.is_timeout() {
                        GatewayError::UpstreamTimeout { detail: "upstream stream stalled".to_owned() }
                    } else {
                        GatewayError::UpstreamBadResponse {
                            status: None,
                            detail: sanitize_detail(&binding, &e.without_url().to_string()),
                        }
                    };
                    tracing::warn!(%model, provider = %binding.provider, error = %error, "upstream stream failed");
                    count(&error, &model);
                    yield Err(error);
                    return;
                }
            }
        }

        yield Ok(StreamEvent::Done);
    })
}

/// Replay a complete response as a stream
///
/// Emits the content, any tool calls, the finish reason, usage and `Done`.
pub fn synthetic_stream(completion: CompletionResponse) -> CompletionStream {
    let mut events = Vec::new();
    let choice = completion.choices.into_iter().next();

    if let Some(choice) = choice {
        let message = choice.message;
        let content = message
            .content
            .or_else(|| message.audio.and_then(|audio| audio.transcript))
            .unwrap_or_default();

        events.push(StreamEvent::Delta(StreamDelta {
            role: Some("assistant".to_owned()),
            content: (!content.is_empty()).then_some(content),
            ..StreamDelta::default()
        }));

        for (index, call) in message.tool_calls.into_iter().flatten().enumerate() {
            events.push(StreamEvent::Delta(StreamDelta {
                tool_call: Some(StreamToolCall {
                    index: u32::try_from(index).unwrap_or(u32::MAX),
                    id: Some(call.id),
                    name: Some(call.function.name),
                    arguments: Some(call.function.arguments),
                }),
                ..StreamDelta::default()
            }));
        }

        events.push(StreamEvent::finish(choice.finish_reason.unwrap_or(FinishReason::Stop)));
    }

    if let Some(usage) = completion.usage {
        events.push(StreamEvent::Usage(usage));
    }

    events.push(StreamEvent::Done);

    Box::pin(stream::iter(events.into_iter().map(Ok)))
}

fn cancelled(service: &ServiceDefinition) -> GatewayError {
    tracing::debug!(model = %service.id, "upstream call cancelled");
    GatewayError::UpstreamTimeout {
        detail: "upstream call cancelled".to_owned(),
    }
}

fn network_error(error: reqwest::Error, service: &ServiceDefinition) -> GatewayError {
    tracing::warn!(
        model = %service.id,
        provider = %service.binding.provider,
        error = %error,
        "upstream request failed"
    );

    let error = if error.is_timeout() {
        GatewayError::UpstreamTimeout {
            detail: "upstream did not answer in time".to_owned(),
        }
    } else {
        GatewayError::UpstreamBadResponse {
            status: None,
            detail: sanitize_detail(&service.binding, &error.without_url().to_string()),
        }
    };

    count(&error, &service.id);
    error
}

/// Classify a non-success status
pub fn status_error(status: StatusCode, headers: &HeaderMap, body: &str, binding: &ProviderBinding) -> GatewayError {
    tracing::warn!(provider = %binding.provider, %status, "upstream returned error");

    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("error").map(convert::error_detail).or_else(|| value.get("message").map(convert::error_detail)))
        .unwrap_or_else(|| body.to_owned());
    let detail = sanitize_detail(binding, &detail);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::UpstreamAuth {
            status: status.as_u16(),
            detail,
        },
        StatusCode::TOO_MANY_REQUESTS => GatewayError::UpstreamRateLimited {
            detail,
            retry_after: headers
                .get(http::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok()),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => GatewayError::UpstreamTimeout { detail },
        _ => GatewayError::UpstreamBadResponse {
            status: Some(status.as_u16()),
            detail,
        },
    }
}

/// Redact the provider identity and bound the length
fn sanitize_detail(binding: &ProviderBinding, detail: &str) -> String {
    let redacted = binding.redact(detail.trim());

    match redacted.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}...", &redacted[..cut]),
        None => redacted,
    }
}

fn record(error: GatewayError, service: &ServiceDefinition) -> GatewayError {
    count(&error, &service.id);
    error
}

fn count(error: &GatewayError, model: &str) {
    relay_telemetry::metrics().upstream_errors.add(
        1,
        &[
            KeyValue::new("model", model.to_owned()),
            KeyValue::new("kind", error.kind()),
        ],
    );
}
