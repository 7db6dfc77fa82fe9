//! Conversion between canonical types and the chat-completions wire format

use super::{StreamItem, error_detail};
use crate::pipeline::PreparedRequest;
use crate::protocol::openai::{
    ChatChunk, ChatRequest, ChatResponse, ChatUsage, ChunkChoice, ChunkDelta, ChunkFunction, ChunkToolCall,
    StreamOptions,
};
use crate::sse::EventMapper;
use crate::types::{
    Choice, ChoiceMessage, CompletionResponse, FinishReason, StreamDelta, StreamEvent, StreamToolCall, Usage,
    new_completion_id, unix_now,
};

// -- Outbound: canonical request -> wire --

/// Build the request body for `model`
pub fn chat_request(model: &str, request: &PreparedRequest, stream: bool) -> ChatRequest {
    let options = &request.options;

    let response_format = options
        .response_format
        .clone()
        .or_else(|| options.json.then(|| serde_json::json!({ "type": "json_object" })));

    ChatRequest {
        model: model.to_owned(),
        messages: request.messages.clone(),
        temperature: options.temperature,
        top_p: options.top_p,
        max_tokens: options.max_tokens,
        presence_penalty: options.presence_penalty,
        frequency_penalty: options.frequency_penalty,
        seed: options.seed,
        stop: options.stop.clone(),
        stream,
        stream_options: stream.then_some(StreamOptions { include_usage: true }),
        tools: options.tools.clone(),
        tool_choice: options.tool_choice.clone(),
        response_format,
        modalities: options.modalities.clone(),
        audio: options.audio.clone(),
        extra: options.extra.clone(),
    }
}

// -- Inbound: wire response -> canonical --

impl From<ChatUsage> for Usage {
    fn from(usage: ChatUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage
                .total_tokens
                .max(usage.prompt_tokens.saturating_add(usage.completion_tokens)),
        }
    }
}

/// Convert a response body, keeping only the first choice
///
/// Returns the upstream's error detail when the body carries an error
/// object or no choices.
pub fn from_response(response: ChatResponse) -> Result<CompletionResponse, String> {
    if let Some(ref error) = response.error {
        return Err(error_detail(error));
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| "response contained no choices".to_owned())?;

    let message = choice.message;
    let content = match (message.content, message.reasoning_content) {
        (Some(content), _) => Some(content),
        (None, _) if message.tool_calls.is_some() || message.audio.is_some() => None,
        (None, reasoning) => Some(reasoning.unwrap_or_default()),
    };

    Ok(CompletionResponse {
        id: response.id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_owned(),
        created: response.created.unwrap_or_else(unix_now),
        model: String::new(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_owned(),
                content,
                tool_calls: message.tool_calls,
                audio: message.audio,
            },
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_upstream),
        }],
        usage: response.usage.map(Usage::from),
    })
}

/// Maps chat-completion chunks to canonical stream events
#[derive(Debug, Default)]
pub struct ChunkMapper;

impl EventMapper for ChunkMapper {
    type Output = StreamItem;
    type Error = serde_json::Error;

    fn map(&mut self, data: &str) -> Result<Vec<StreamItem>, serde_json::Error> {
        let chunk: ChatChunk = serde_json::from_str(data)?;

        if let Some(ref error) = chunk.error {
            return Ok(vec![Err(error_detail(error))]);
        }

        let mut events = Vec::new();

        if let Some(choice) = chunk.choices.into_iter().find(|c| c.index == 0) {
            let delta = choice.delta;

            if delta.role.is_some() || delta.content.as_deref().is_some_and(|c| !c.is_empty()) {
                events.push(Ok(StreamEvent::Delta(StreamDelta {
                    role: delta.role,
                    content: delta.content.filter(|c| !c.is_empty()),
                    ..StreamDelta::default()
                })));
            }

            for call in delta.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or_default();
                events.push(Ok(StreamEvent::Delta(StreamDelta {
                    tool_call: Some(StreamToolCall {
                        index: call.index,
                        id: call.id,
                        name: function.name,
                        arguments: function.arguments,
                    }),
                    ..StreamDelta::default()
                })));
            }

            if let Some(reason) = choice.finish_reason.as_deref() {
                events.push(Ok(StreamEvent::finish(FinishReason::from_upstream(reason))));
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(Ok(StreamEvent::Usage(usage.into())));
        }

        Ok(events)
    }
}

// -- Outbound: canonical stream event -> caller-facing chunk --

/// Wrap a canonical event in a `chat.completion.chunk` envelope
///
/// `None` for the terminal event, which callers encode as `[DONE]`.
pub fn chunk_envelope(id: &str, model: &str, created: u64, event: &StreamEvent) -> Option<ChatChunk> {
    let mut chunk = ChatChunk {
        id: id.to_owned(),
        object: "chat.completion.chunk".to_owned(),
        created,
        model: model.to_owned(),
        ..ChatChunk::default()
    };

    match *event {
        StreamEvent::Delta(ref delta) => {
            chunk.choices = vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: delta.role.clone(),
                    content: delta.content.clone(),
                    tool_calls: delta.tool_call.as_ref().map(|call| {
                        vec![ChunkToolCall {
                            index: call.index,
                            id: call.id.clone(),
                            tool_type: call.id.as_ref().map(|_| "function".to_owned()),
                            function: Some(ChunkFunction {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            }),
                        }]
                    }),
                },
                finish_reason: delta.finish_reason.map(finish_reason_str).map(str::to_owned),
            }];
        }
        StreamEvent::Usage(usage) => {
            chunk.usage = Some(ChatUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }
        StreamEvent::Done => return None,
    }

    Some(chunk)
}

const fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}
