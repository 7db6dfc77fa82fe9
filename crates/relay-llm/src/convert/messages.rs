//! Conversion between canonical types and the messages wire format

use std::collections::HashMap;

use super::{StreamItem, error_detail};
use crate::pipeline::PreparedRequest;
use crate::protocol::messages::{
    BlockDelta, ContentBlock, ImageSource, MessagesMessage, MessagesRequest, MessagesResponse, MessagesTool,
    ResponseBlock, StreamBlock, StreamEventPayload,
};
use crate::sse::EventMapper;
use crate::types::{
    Choice, ChoiceMessage, CompletionResponse, Content, ContentPart, FinishReason, FunctionCall, Message, Role,
    StreamDelta, StreamEvent, StreamToolCall, ToolCall, Usage, new_completion_id, unix_now,
};

/// The dialect rejects requests without `max_tokens`
const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Outbound: canonical request -> wire --

pub fn messages_request(model: &str, request: &PreparedRequest, stream: bool) -> MessagesRequest {
    let options = &request.options;

    let system = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text_content)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();

    let mut messages: Vec<MessagesMessage> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        let converted = to_wire_message(message);
        if converted.content.is_empty() {
            continue;
        }

        // consecutive turns of one role must be merged
        match messages.last_mut() {
            Some(last) if last.role == converted.role => last.content.extend(converted.content),
            _ => messages.push(converted),
        }
    }

    let tools = options.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| MessagesTool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            })
            .collect()
    });

    MessagesRequest {
        model: model.to_owned(),
        max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages,
        temperature: options.temperature.map(|t| t.min(1.0)),
        top_p: options.top_p,
        stop_sequences: options.stop.clone(),
        stream,
        tools,
        tool_choice: options.tool_choice.as_ref().and_then(tool_choice),
    }
}

fn to_wire_message(message: &Message) -> MessagesMessage {
    match message.role {
        Role::Tool => MessagesMessage {
            role: "user",
            content: vec![ContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                content: message.text_content(),
            }],
        },
        Role::Assistant => {
            let mut content = content_blocks(message.content.as_ref());
            for call in message.tool_calls.iter().flatten() {
                content.push(ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| serde_json::json!({})),
                });
            }
            MessagesMessage {
                role: "assistant",
                content,
            }
        }
        Role::User | Role::System => MessagesMessage {
            role: "user",
            content: content_blocks(message.content.as_ref()),
        },
    }
}

fn content_blocks(content: Option<&Content>) -> Vec<ContentBlock> {
    match content {
        None => Vec::new(),
        Some(Content::Text(text)) if text.is_empty() => Vec::new(),
        Some(Content::Text(text)) => vec![ContentBlock::Text { text: text.clone() }],
        Some(Content::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
                ContentPart::ImageUrl { image_url } => Some(ContentBlock::Image {
                    source: match image_url.as_data_uri() {
                        Some((mime, data)) => ImageSource::Base64 {
                            media_type: mime.to_owned(),
                            data: data.to_owned(),
                        },
                        None => ImageSource::Url {
                            url: image_url.url.clone(),
                        },
                    },
                }),
            })
            .collect(),
    }
}

/// Chat-completions `tool_choice` to the dialect's shape; `none` drops it
fn tool_choice(choice: &serde_json::Value) -> Option<serde_json::Value> {
    match choice {
        serde_json::Value::String(mode) => match mode.as_str() {
            "required" => Some(serde_json::json!({ "type": "any" })),
            "none" => None,
            _ => Some(serde_json::json!({ "type": "auto" })),
        },
        other => other
            .pointer("/function/name")
            .and_then(serde_json::Value::as_str)
            .map(|name| serde_json::json!({ "type": "tool", "name": name })),
    }
}

// -- Inbound: wire response -> canonical --

pub fn from_response(response: MessagesResponse) -> Result<CompletionResponse, String> {
    if let Some(ref error) = response.error {
        return Err(error_detail(error));
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ResponseBlock::Text { text: part } => text.push_str(&part),
            ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                tool_type: "function".to_owned(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            ResponseBlock::Other => {}
        }
    }

    let message = ChoiceMessage {
        content: if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        },
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..ChoiceMessage::text("")
    };

    Ok(CompletionResponse {
        id: response.id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_owned(),
        created: unix_now(),
        model: String::new(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: response.stop_reason.as_deref().map(FinishReason::from_upstream),
        }],
        usage: response.usage.map(|u| Usage::new(u.input_tokens, u.output_tokens)),
    })
}

/// Stateful mapper for the dialect's typed stream events
///
/// Tool-use blocks are numbered in arrival order so their argument
/// fragments land on the right canonical tool call.
#[derive(Debug, Default)]
pub struct StreamState {
    tool_calls: HashMap<u32, u32>,
    input_tokens: u32,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&mut self, event: StreamEventPayload) -> Vec<StreamItem> {
        match event {
            StreamEventPayload::MessageStart { message } => {
                self.input_tokens = message.usage.map_or(0, |u| u.input_tokens);
                vec![Ok(StreamEvent::Delta(StreamDelta {
                    role: Some("assistant".to_owned()),
                    ..StreamDelta::default()
                }))]
            }
            StreamEventPayload::ContentBlockStart { index, content_block } => match content_block {
                StreamBlock::Text { text } if !text.is_empty() => vec![Ok(StreamEvent::content(text))],
                StreamBlock::ToolUse { id, name } => {
                    let call = u32::try_from(self.tool_calls.len()).unwrap_or(u32::MAX);
                    self.tool_calls.insert(index, call);
                    vec![Ok(StreamEvent::Delta(StreamDelta {
                        tool_call: Some(StreamToolCall {
                            index: call,
                            id: Some(id),
                            name: Some(name),
                            arguments: None,
                        }),
                        ..StreamDelta::default()
                    }))]
                }
                StreamBlock::Text { .. } | StreamBlock::Other => Vec::new(),
            },
            StreamEventPayload::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => vec![Ok(StreamEvent::content(text))],
                BlockDelta::InputJsonDelta { partial_json } => self
                    .tool_calls
                    .get(&index)
                    .map(|&call| {
                        Ok(StreamEvent::Delta(StreamDelta {
                            tool_call: Some(StreamToolCall {
                                index: call,
                                arguments: Some(partial_json),
                                ..StreamToolCall::default()
                            }),
                            ..StreamDelta::default()
                        }))
                    })
                    .into_iter()
                    .collect(),
                BlockDelta::Other => Vec::new(),
            },
            StreamEventPayload::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(reason) = delta.stop_reason.as_deref() {
                    events.push(Ok(StreamEvent::finish(FinishReason::from_upstream(reason))));
                }
                if let Some(usage) = usage {
                    events.push(Ok(StreamEvent::Usage(Usage::new(self.input_tokens, usage.output_tokens))));
                }
                events
            }
            StreamEventPayload::Error { error } => vec![Err(error_detail(&error))],
            StreamEventPayload::ContentBlockStop { .. } | StreamEventPayload::MessageStop | StreamEventPayload::Ping => {
                Vec::new()
            }
        }
    }
}

impl EventMapper for StreamState {
    type Output = StreamItem;
    type Error = serde_json::Error;

    fn map(&mut self, data: &str) -> Result<Vec<StreamItem>, serde_json::Error> {
        let event: StreamEventPayload = serde_json::from_str(data)?;
        Ok(self.convert(event))
    }
}
