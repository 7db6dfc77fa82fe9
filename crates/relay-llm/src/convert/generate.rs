//! Conversion between canonical types and the generate-content wire format

use std::collections::HashMap;

use super::{StreamItem, error_detail};
use crate::pipeline::PreparedRequest;
use crate::protocol::generate::{
    Blob, FileData, FunctionCallPart, FunctionDeclaration, FunctionResponsePart, GenerateContent, GenerateRequest,
    GenerateResponse, GenerateTool, GenerationConfig, Part,
};
use crate::sse::EventMapper;
use crate::types::{
    Choice, ChoiceMessage, CompletionResponse, Content, ContentPart, FinishReason, FunctionCall, Message, Role,
    StreamDelta, StreamEvent, StreamToolCall, ToolCall, Usage, new_completion_id, unix_now,
};

// -- Outbound: canonical request -> wire --

/// Build the request body; the model is part of the endpoint URL
pub fn generate_request(request: &PreparedRequest) -> GenerateRequest {
    let options = &request.options;

    // tool results only carry the call id, the dialect wants the function name
    let call_names: HashMap<&str, &str> = request
        .messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().flatten())
        .map(|call| (call.id.as_str(), call.function.name.as_str()))
        .collect();

    let system: Vec<Part> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text_content)
        .filter(|text| !text.is_empty())
        .map(Part::text)
        .collect();

    let mut contents: Vec<GenerateContent> = Vec::new();
    for message in request.messages.iter().filter(|m| m.role != Role::System) {
        let content = to_wire_content(message, &call_names);
        if content.parts.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last.role == content.role => last.parts.extend(content.parts),
            _ => contents.push(content),
        }
    }

    let generation_config = GenerationConfig {
        temperature: options.temperature,
        top_p: options.top_p,
        max_output_tokens: options.max_tokens,
        presence_penalty: options.presence_penalty,
        frequency_penalty: options.frequency_penalty,
        seed: options.seed,
        stop_sequences: options.stop.clone(),
        response_mime_type: options.json_mode().then(|| "application/json".to_owned()),
    };

    let tools = options.tools.as_ref().filter(|tools| !tools.is_empty()).map(|tools| {
        vec![GenerateTool {
            function_declarations: tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.function.name.clone(),
                    description: tool.function.description.clone(),
                    parameters: tool.function.parameters.clone(),
                })
                .collect(),
        }]
    });

    GenerateRequest {
        contents,
        system_instruction: (!system.is_empty()).then(|| GenerateContent {
            role: None,
            parts: system,
        }),
        generation_config: Some(generation_config),
        tools,
    }
}

fn to_wire_content(message: &Message, call_names: &HashMap<&str, &str>) -> GenerateContent {
    match message.role {
        Role::Tool => {
            let id = message.tool_call_id.as_deref().unwrap_or_default();
            GenerateContent {
                role: Some("user".to_owned()),
                parts: vec![Part {
                    function_response: Some(FunctionResponsePart {
                        name: call_names.get(id).copied().unwrap_or(id).to_owned(),
                        response: serde_json::json!({ "content": message.text_content() }),
                    }),
                    ..Part::default()
                }],
            }
        }
        Role::Assistant => {
            let mut parts = parts(message.content.as_ref());
            for call in message.tool_calls.iter().flatten() {
                parts.push(Part {
                    function_call: Some(FunctionCallPart {
                        name: call.function.name.clone(),
                        args: serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| serde_json::json!({})),
                    }),
                    ..Part::default()
                });
            }
            GenerateContent {
                role: Some("model".to_owned()),
                parts,
            }
        }
        Role::User | Role::System => GenerateContent {
            role: Some("user".to_owned()),
            parts: parts(message.content.as_ref()),
        },
    }
}

fn parts(content: Option<&Content>) -> Vec<Part> {
    match content {
        None => Vec::new(),
        Some(Content::Text(text)) if text.is_empty() => Vec::new(),
        Some(Content::Text(text)) => vec![Part::text(text.clone())],
        Some(Content::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => Some(match image_url.as_data_uri() {
                    Some((mime, data)) => Part {
                        inline_data: Some(Blob {
                            mime_type: mime.to_owned(),
                            data: data.to_owned(),
                        }),
                        ..Part::default()
                    },
                    None => Part {
                        file_data: Some(FileData {
                            mime_type: None,
                            file_uri: image_url.url.clone(),
                        }),
                        ..Part::default()
                    },
                }),
            })
            .collect(),
    }
}

// -- Inbound: wire response -> canonical --

/// Answer text and tool calls of the first candidate, skipping reasoning parts
fn candidate_output(response: &GenerateResponse, call_offset: usize) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut calls = Vec::new();

    let Some(candidate) = response.candidates.first() else {
        return (text, calls);
    };

    for part in &candidate.content.parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(ref chunk) = part.text {
            text.push_str(chunk);
        }
        if let Some(ref call) = part.function_call {
            calls.push(ToolCall {
                id: format!("call_{}", call_offset + calls.len()),
                tool_type: "function".to_owned(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.args.to_string(),
                },
            });
        }
    }

    (text, calls)
}

fn finish_reason(reason: &str, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls && reason == "STOP" {
        FinishReason::ToolCalls
    } else {
        FinishReason::from_upstream(reason)
    }
}

pub fn from_response(response: GenerateResponse) -> Result<CompletionResponse, String> {
    if let Some(ref error) = response.error {
        return Err(error_detail(error));
    }

    if response.candidates.is_empty() {
        return Err("response contained no candidates".to_owned());
    }

    let (text, tool_calls) = candidate_output(&response, 0);
    let reason = response
        .candidates
        .first()
        .and_then(|c| c.finish_reason.as_deref())
        .map(|r| finish_reason(r, !tool_calls.is_empty()));

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
        id: response.response_id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_owned(),
        created: unix_now(),
        model: String::new(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: reason,
        }],
        usage: response
            .usage_metadata
            .map(|u| Usage::new(u.prompt_token_count, u.candidates_token_count)),
    })
}

/// Every stream event is a partial response
#[derive(Debug, Default)]
pub struct ChunkMapper {
    tool_calls: usize,
    started: bool,
}

impl EventMapper for ChunkMapper {
    type Output = StreamItem;
    type Error = serde_json::Error;

    fn map(&mut self, data: &str) -> Result<Vec<StreamItem>, serde_json::Error> {
        let response: GenerateResponse = serde_json::from_str(data)?;

        if let Some(ref error) = response.error {
            return Ok(vec![Err(error_detail(error))]);
        }

        let mut events = Vec::new();
        let (text, calls) = candidate_output(&response, self.tool_calls);

        if !text.is_empty() {
            events.push(Ok(StreamEvent::Delta(StreamDelta {
                role: (!self.started).then(|| "assistant".to_owned()),
                content: Some(text),
                ..StreamDelta::default()
            })));
            self.started = true;
        }

        for call in &calls {
            events.push(Ok(StreamEvent::Delta(StreamDelta {
                tool_call: Some(StreamToolCall {
                    index: u32::try_from(self.tool_calls).unwrap_or(u32::MAX),
                    id: Some(call.id.clone()),
                    name: Some(call.function.name.clone()),
                    arguments: Some(call.function.arguments.clone()),
                }),
                ..StreamDelta::default()
            })));
            self.tool_calls += 1;
        }

        if let Some(reason) = response.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            events.push(Ok(StreamEvent::finish(finish_reason(reason, self.tool_calls > 0))));
        }

        if let Some(usage) = response.usage_metadata {
            events.push(Ok(StreamEvent::Usage(Usage::new(
                usage.prompt_token_count,
                usage.candidates_token_count,
            ))));
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::RequestOptions;

    #[test]
    fn roles_and_system_instruction() {
        let request = PreparedRequest::new(
            vec![
                Message::text(Role::System, "Be brief."),
                Message::text(Role::User, "hi"),
                Message::text(Role::Assistant, "hello"),
                Message::text(Role::User, "bye"),
            ],
            RequestOptions {
                max_tokens: Some(64),
                json: true,
                ..RequestOptions::default()
            },
        );

        let body = serde_json::to_value(generate_request(&request)).unwrap();

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][2]["parts"][0]["text"], "bye");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn tool_result_uses_function_name() {
        let request = PreparedRequest::new(
            vec![
                Message {
                    tool_calls: Some(vec![ToolCall {
                        id: "call_0".into(),
                        tool_type: "function".into(),
                        function: FunctionCall {
                            name: "lookup".into(),
                            arguments: r#"{"q":"x"}"#.into(),
                        },
                    }]),
                    ..Message::text(Role::Assistant, "")
                },
                Message {
                    tool_call_id: Some("call_0".into()),
                    ..Message::text(Role::Tool, "42")
                },
            ],
            RequestOptions::default(),
        );

        let body = serde_json::to_value(generate_request(&request)).unwrap();

        assert_eq!(body["contents"][0]["parts"][0]["functionCall"]["args"]["q"], "x");
        assert_eq!(body["contents"][1]["parts"][0]["functionResponse"]["name"], "lookup");
    }

    #[test]
    fn candidate_becomes_choice() {
        let response: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "thinking...", "thought": true}, {"text": "Hi!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 2, "candidatesTokenCount": 1, "totalTokenCount": 3}
        }))
        .unwrap();

        let completion = from_response(response).unwrap();

        assert_eq!(completion.text(), "Hi!");
        assert_eq!(completion.choices[0].finish_reason, Some(FinishReason::Stop));
        assert_eq!(completion.usage, Some(Usage::new(2, 1)));
    }

    #[test]
    fn empty_candidates_are_an_error() {
        let response: GenerateResponse = serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(from_response(response).is_err());
    }

    #[test]
    fn stream_chunks_carry_text_then_finish() {
        let mut mapper = ChunkMapper::default();

        let first = mapper
            .map(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"}]}}]}"#)
            .unwrap();
        let second = mapper
            .map(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"lo"}]},"finishReason":"MAX_TOKENS"}]}"#)
            .unwrap();

        assert!(matches!(first[0], Ok(StreamEvent::Delta(ref d)) if d.role.is_some() && d.content.as_deref() == Some("Hel")));
        assert_eq!(second[0], Ok(StreamEvent::content("lo")));
        assert_eq!(second[1], Ok(StreamEvent::finish(FinishReason::Length)));
    }
}
