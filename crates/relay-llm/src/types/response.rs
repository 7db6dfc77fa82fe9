use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use super::message::ToolCall;

/// Reason the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map a provider-specific stop reason
    pub fn from_upstream(reason: &str) -> Self {
        match reason {
            "length" | "max_tokens" | "MAX_TOKENS" => Self::Length,
            "tool_calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "content_filter" | "SAFETY" | "RECITATION" | "refusal" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// A single completion choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: Option<FinishReason>,
}

/// Assistant message within a choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOutput>,
}

impl ChoiceMessage {
    /// Plain text message from the assistant
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_owned(),
            content: Some(content.into()),
            tool_calls: None,
            audio: None,
        }
    }
}

/// Spoken output attached to a choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Base64-encoded audio bytes
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

/// The canonical completion every dialect is translated into
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    /// Always `chat.completion`
    pub object: String,
    /// Unix timestamp in seconds
    pub created: u64,
    /// Canonical model id
    pub model: String,
    /// Exactly one choice once it leaves the upstream client
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl CompletionResponse {
    /// A single-choice text completion
    pub fn synthetic(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: new_completion_id(),
            object: "chat.completion".to_owned(),
            created: unix_now(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage::text(text),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: None,
        }
    }

    /// Text of the first choice, falling back to the audio transcript
    pub fn text(&self) -> String {
        self.choices
            .first()
            .and_then(|choice| {
                choice
                    .message
                    .content
                    .clone()
                    .or_else(|| choice.message.audio.as_ref().and_then(|a| a.transcript.clone()))
            })
            .unwrap_or_default()
    }

    /// Audio of the first choice, if any
    pub fn audio(&self) -> Option<&AudioOutput> {
        self.choices.first().and_then(|c| c.message.audio.as_ref())
    }
}

/// Fresh `chatcmpl-` identifier
pub fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Seconds since the Unix epoch
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
