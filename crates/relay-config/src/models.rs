//! Model definitions and their upstream bindings

use std::collections::BTreeMap;
use std::time::Duration;

use relay_core::Tier;
use serde::Deserialize;

/// A single model definition, keyed by its canonical id in `[models]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Alternative names that resolve to this model
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Human-readable description for `/models`
    #[serde(default)]
    pub description: Option<String>,
    /// Minimum caller tier
    #[serde(default)]
    pub tier: Tier,
    /// Feature flags that gate pipeline behavior
    #[serde(default)]
    pub capabilities: CapabilitiesConfig,
    /// Overrides the default persona for this model
    #[serde(default)]
    pub persona: Option<String>,
    /// How requests reach the upstream
    pub binding: BindingConfig,
    /// Timeout, fallback and soft-failure policy
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

/// Capability flags of a model
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct CapabilitiesConfig {
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub tools: bool,
    #[serde(default)]
    pub reasoning: bool,
    #[serde(default = "default_true")]
    pub streaming: bool,
    /// Whether the upstream accepts the `system` role
    #[serde(default = "default_true")]
    pub system_role: bool,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            vision: false,
            audio: false,
            tools: false,
            reasoning: false,
            streaming: true,
            system_role: true,
        }
    }
}

/// Wire dialect spoken by an upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireDialect {
    /// Chat-completions schema (`messages`, `choices`, `data: [DONE]`)
    OpenaiChat,
    /// Messages schema with a top-level `system` and typed stream events
    MessagesApi,
    /// `contents`/`candidates` schema with `generationConfig`
    GenerateContent,
    /// Plain JSON endpoint returning text or a chat-completions body
    Custom,
}

impl WireDialect {
    /// Whether the dialect needs remote images embedded as data URIs
    pub const fn inlines_assets(self) -> bool {
        matches!(self, Self::MessagesApi | Self::GenerateContent)
    }

    /// Whether the dialect streams natively
    pub const fn streams(self) -> bool {
        !matches!(self, Self::Custom)
    }
}

impl std::fmt::Display for WireDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OpenaiChat => "openai-chat",
            Self::MessagesApi => "messages-api",
            Self::GenerateContent => "generate-content",
            Self::Custom => "custom",
        })
    }
}

/// Upstream binding of a model
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingConfig {
    /// Real provider name; redacted from every client-facing error
    pub provider: String,
    pub dialect: WireDialect,
    /// Endpoint URL, may contain `{model}`, `{deployment}` and `{region}`
    pub endpoint: String,
    /// Model name sent upstream; defaults to the canonical id
    #[serde(default)]
    pub upstream_model: Option<String>,
    #[serde(default)]
    pub deployment: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub auth: AuthStrategyConfig,
    /// Static headers sent with every upstream request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Parameters merged under caller-supplied values
    #[serde(default)]
    pub defaults: ParameterDefaults,
    /// Embed remote images before dispatch; defaults by dialect
    #[serde(default)]
    pub inline_assets: Option<bool>,
}

impl BindingConfig {
    /// Effective inline-asset setting
    pub fn inline_assets(&self) -> bool {
        self.inline_assets.unwrap_or_else(|| self.dialect.inlines_assets())
    }
}

/// How credentials are attached to upstream requests
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum AuthStrategyConfig {
    /// No credentials
    #[default]
    None,
    /// `Authorization: Bearer <credential>`
    Bearer { credential: String },
    /// Credential in a named header
    Header { name: String, credential: String },
    /// Credential in a query parameter
    Query { param: String, credential: String },
}

impl AuthStrategyConfig {
    /// Name of the `[credentials]` entry this strategy uses
    pub fn credential(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Bearer { credential } | Self::Header { credential, .. } | Self::Query { credential, .. } => {
                Some(credential)
            }
        }
    }
}

/// Per-model default generation parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterDefaults {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub voice: Option<String>,
}

/// Timeout, fallback and soft-failure policy of a model
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResilienceConfig {
    /// Upper bound on the time to a first response
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub timeout: Option<Duration>,
    /// Model id tried when this one fails or times out
    #[serde(default)]
    pub fallback: Option<String>,
    /// Replace every failure with a substitute completion
    #[serde(default)]
    pub soft_failure: bool,
    /// Text of the substitute completion
    #[serde(default)]
    pub soft_failure_message: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}
