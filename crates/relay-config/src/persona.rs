use serde::Deserialize;

/// System prompt text injected by the persona step
///
/// The text itself is opaque configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersonaConfig {
    /// Inserted when a conversation carries no system message
    #[serde(default = "default_prompt")]
    pub default: String,
    /// Appended to an existing system message when JSON output is requested
    #[serde(default = "default_json_directive")]
    pub json_directive: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default: default_prompt(),
            json_directive: default_json_directive(),
        }
    }
}

fn default_prompt() -> String {
    "You are a helpful assistant.".to_owned()
}

fn default_json_directive() -> String {
    "Respond only with valid JSON.".to_owned()
}
