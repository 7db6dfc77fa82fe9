use serde::{Deserialize, Serialize};

use super::message::ToolCall;
use super::response::{FinishReason, Usage};

/// One unit of a streamed completion
///
/// A stream is an ordered sequence of deltas and usage reports closed by
/// exactly one `Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    Delta(StreamDelta),
    Usage(Usage),
    Done,
}

impl StreamEvent {
    /// Content-only delta
    pub fn content(text: impl Into<String>) -> Self {
        Self::Delta(StreamDelta {
            content: Some(text.into()),
            ..StreamDelta::default()
        })
    }

    /// Final delta carrying only the finish reason
    pub fn finish(reason: FinishReason) -> Self {
        Self::Delta(StreamDelta {
            finish_reason: Some(reason),
            ..StreamDelta::default()
        })
    }
}

/// Incremental update of the single choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool call fragment; `index` orders fragments of several calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<StreamToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Partial tool call data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamToolCall {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fragment of the JSON-encoded arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl StreamToolCall {
    /// Complete call from a fragment that carries everything at once
    pub fn into_tool_call(self) -> Option<ToolCall> {
        Some(ToolCall {
            id: self.id?,
            tool_type: super::message::default_tool_type(),
            function: super::message::FunctionCall {
                name: self.name?,
                arguments: self.arguments.unwrap_or_default(),
            },
        })
    }
}
