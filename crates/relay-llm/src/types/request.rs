use serde::{Deserialize, Serialize};

use super::message::Message;
use super::options::RequestOptions;

/// Inbound completion request in the gateway's canonical shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Canonical id or alias; the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Hide the response from the public feed
    #[serde(default)]
    pub private: bool,
    #[serde(flatten)]
    pub options: RequestOptions,
}

impl CompletionRequest {
    /// Text of the last user message, used as the feed prompt
    pub fn prompt(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == super::Role::User)
            .map(Message::text_content)
            .unwrap_or_default()
    }
}
