//! Per-dialect adapters between canonical types and wire formats
//!
//! Dispatch is an exhaustive match over [`WireDialect`]; adding a dialect
//! means adding an arm to each function here.

pub mod custom;
pub mod generate;
pub mod messages;
pub mod openai;

use relay_config::WireDialect;
use url::Url;

use crate::error::GatewayError;
use crate::pipeline::PreparedRequest;
use crate::sse::EventMapper;
use crate::types::{CompletionResponse, StreamEvent};

/// A mapped stream event, or the upstream's unredacted error detail
pub type StreamItem = Result<StreamEvent, String>;

/// Serialize the upstream request body
pub fn encode(
    dialect: WireDialect,
    model: &str,
    request: &PreparedRequest,
    stream: bool,
) -> Result<serde_json::Value, GatewayError> {
    let body = match dialect {
        WireDialect::OpenaiChat => serde_json::to_value(openai::chat_request(model, request, stream)),
        WireDialect::MessagesApi => serde_json::to_value(messages::messages_request(model, request, stream)),
        WireDialect::GenerateContent => serde_json::to_value(generate::generate_request(request)),
        WireDialect::Custom => serde_json::to_value(openai::chat_request(model, request, false)),
    };

    body.map_err(|e| GatewayError::Internal(anyhow::anyhow!("failed to encode upstream request: {e}")))
}

/// Parse a complete upstream body into one canonical completion
///
/// `Err` carries the upstream's own description of what went wrong.
pub fn decode(dialect: WireDialect, body: &[u8]) -> Result<CompletionResponse, String> {
    let parse_error = |e: serde_json::Error| format!("unreadable response body: {e}");

    match dialect {
        WireDialect::OpenaiChat => openai::from_response(serde_json::from_slice(body).map_err(parse_error)?),
        WireDialect::MessagesApi => messages::from_response(serde_json::from_slice(body).map_err(parse_error)?),
        WireDialect::GenerateContent => generate::from_response(serde_json::from_slice(body).map_err(parse_error)?),
        WireDialect::Custom => custom::from_body(body),
    }
}

/// Stateful event mapper of a streaming dialect
#[derive(Debug)]
pub enum StreamMapper {
    OpenaiChat(openai::ChunkMapper),
    MessagesApi(messages::StreamState),
    GenerateContent(generate::ChunkMapper),
}

impl StreamMapper {
    /// `None` for dialects without native streaming
    pub fn for_dialect(dialect: WireDialect) -> Option<Self> {
        match dialect {
            WireDialect::OpenaiChat => Some(Self::OpenaiChat(openai::ChunkMapper)),
            WireDialect::MessagesApi => Some(Self::MessagesApi(messages::StreamState::new())),
            WireDialect::GenerateContent => Some(Self::GenerateContent(generate::ChunkMapper::default())),
            WireDialect::Custom => None,
        }
    }
}

impl EventMapper for StreamMapper {
    type Output = StreamItem;
    type Error = serde_json::Error;

    fn map(&mut self, data: &str) -> Result<Vec<StreamItem>, serde_json::Error> {
        match self {
            Self::OpenaiChat(mapper) => mapper.map(data),
            Self::MessagesApi(mapper) => mapper.map(data),
            Self::GenerateContent(mapper) => mapper.map(data),
        }
    }
}

/// Endpoint used for a streaming call
///
/// Generate-content upstreams stream from a sibling method and need
/// `alt=sse` for event-stream framing.
pub fn stream_url(dialect: WireDialect, url: &Url) -> Url {
    let mut url = url.clone();

    if dialect == WireDialect::GenerateContent {
        let path = url.path().replace(":generateContent", ":streamGenerateContent");
        url.set_path(&path);
        if !url.query_pairs().any(|(key, _)| key == "alt") {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
    }

    url
}

/// Best human-readable message inside an upstream error payload
pub(crate) fn error_detail(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(message) => message.clone(),
        other => other
            .get("message")
            .or_else(|| other.pointer("/error/message"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| other.to_string(), str::to_owned),
    }
}
