//! Custom endpoints: chat-completions request body, loosely shaped response
//!
//! The response may be plain text, a chat-completions body, a JSON string,
//! or an object with one of the usual text fields.

use serde::Deserialize;
use serde_json::Value;

use super::error_detail;
use crate::protocol::openai::ChatResponse;
use crate::types::CompletionResponse;

/// Object keys tried, in order, for the answer text
const TEXT_FIELDS: [&str; 5] = ["text", "response", "content", "output", "result"];

pub fn from_body(body: &[u8]) -> Result<CompletionResponse, String> {
    let raw = String::from_utf8_lossy(body);
    let raw = raw.trim();

    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return if raw.is_empty() {
            Err("empty response body".to_owned())
        } else {
            Ok(CompletionResponse::synthetic("", raw))
        };
    };

    match value {
        Value::String(text) => Ok(CompletionResponse::synthetic("", text)),
        Value::Object(ref map) => {
            if let Some(error) = map.get("error").filter(|e| !e.is_null()) {
                return Err(error_detail(error));
            }

            if map.contains_key("choices") {
                let response = ChatResponse::deserialize(&value).map_err(|e| e.to_string())?;
                return super::openai::from_response(response);
            }

            TEXT_FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str))
                .map(|text| CompletionResponse::synthetic("", text))
                .ok_or_else(|| "response has no recognizable text field".to_owned())
        }
        Value::Null => Err("empty response body".to_owned()),
        other => Ok(CompletionResponse::synthetic("", other.to_string())),
    }
}
