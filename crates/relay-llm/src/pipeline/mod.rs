//! Ordered request transforms applied before dispatch
//!
//! Each step takes ownership of a [`PreparedRequest`] and returns a new one,
//! so a failing step never leaves a half-transformed request behind.

mod assets;
mod auth;
mod fold;
mod params;
mod persona;
mod sanitize;

use async_trait::async_trait;
use http::HeaderMap;
use url::Url;

use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{Message, RequestOptions};

pub use assets::InlineAssets;
pub use auth::ResolveTarget;
pub use fold::FoldSystemMessages;
pub use params::NormalizeParameters;
pub use persona::{ConfiguredPersona, InjectPersona, PersonaProvider};
pub use sanitize::SanitizeMessages;

/// Where and how the request is sent; filled in by the auth step
#[derive(Debug, Clone, Default)]
pub struct DispatchTarget {
    pub url: Option<Url>,
    pub headers: HeaderMap,
}

/// A conversation on its way to an upstream
#[derive(Debug, Clone, Default)]
pub struct PreparedRequest {
    pub messages: Vec<Message>,
    pub options: RequestOptions,
    pub target: DispatchTarget,
}

impl PreparedRequest {
    pub fn new(messages: Vec<Message>, options: RequestOptions) -> Self {
        Self {
            messages,
            options,
            target: DispatchTarget::default(),
        }
    }
}

/// A single pipeline step
#[async_trait]
pub trait Transform: Send + Sync {
    /// Step name used in logs
    fn name(&self) -> &'static str;

    async fn apply(&self, request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError>;
}

/// Fixed sequence of transforms
pub struct Pipeline {
    steps: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }

    /// The six standard steps in their required order
    pub fn standard(persona: std::sync::Arc<dyn PersonaProvider>, http: reqwest::Client) -> Self {
        Self::new(vec![
            Box::new(InjectPersona::new(persona)),
            Box::new(FoldSystemMessages),
            Box::new(InlineAssets::new(http)),
            Box::new(SanitizeMessages),
            Box::new(NormalizeParameters),
            Box::new(ResolveTarget),
        ])
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        for step in &self.steps {
            request = step.apply(request, service).await.inspect_err(|e| {
                tracing::debug!(step = step.name(), model = %service.id, error = %e, "transform step failed");
            })?;
        }

        Ok(request)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.step_names()).finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use relay_config::WireDialect;

    use crate::registry::{ProviderBinding, ServiceDefinition};

    pub fn service(dialect: WireDialect) -> ServiceDefinition {
        ServiceDefinition::new(
            "openai-fast",
            ProviderBinding::new("openai", dialect, "https://api.openai.com/v1/chat/completions", "gpt-5-nano"),
        )
    }
}
