use serde::{Deserialize, Serialize};

use super::tool::ToolDefinition;

/// Generation parameters of a request
///
/// Keys the gateway does not model are kept in `extra` and forwarded to
/// dialects that accept arbitrary fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "max_completion_tokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    /// `{"type": "json_object"}` requests JSON output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    /// Shorthand for a JSON `response_format`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub json: bool,
    /// Output modalities, e.g. `["text", "audio"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioOptions>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RequestOptions {
    /// Whether the caller asked for JSON output
    pub fn json_mode(&self) -> bool {
        self.json
            || self
                .response_format
                .as_ref()
                .and_then(|format| format.get("type"))
                .and_then(serde_json::Value::as_str)
                .is_some_and(|kind| kind == "json_object" || kind == "json_schema")
    }

    /// Whether the caller asked for spoken output
    pub fn wants_audio(&self) -> bool {
        self.audio.is_some() || self.modalities.as_ref().is_some_and(|m| m.iter().any(|m| m == "audio"))
    }

    /// Whether the output is reproducible enough to cache
    pub fn is_deterministic(&self) -> bool {
        self.seed.is_some() || self.temperature.is_none_or(|t| t == 0.0)
    }
}

/// Spoken-output parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOptions {
    pub voice: String,
    #[serde(default = "default_audio_format")]
    pub format: String,
}

fn default_audio_format() -> String {
    "mp3".to_owned()
}
