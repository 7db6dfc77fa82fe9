//! Model registry: canonical ids, aliases and upstream bindings

use std::collections::HashMap;
use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use indexmap::IndexMap;
use regex::Regex;
use relay_config::{
    AuthStrategyConfig, CapabilitiesConfig, Config, ModelConfig, ParameterDefaults, ResilienceConfig, WireDialect,
};
use relay_core::Tier;
use secrecy::SecretString;
use serde::Serialize;

use crate::error::GatewayError;

/// Feature flags of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    pub vision: bool,
    pub audio: bool,
    pub tools: bool,
    pub reasoning: bool,
    pub streaming: bool,
    /// Whether the upstream accepts a `system` role
    pub system_role: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::from(&CapabilitiesConfig::default())
    }
}

impl From<&CapabilitiesConfig> for Capabilities {
    fn from(config: &CapabilitiesConfig) -> Self {
        Self {
            vision: config.vision,
            audio: config.audio,
            tools: config.tools,
            reasoning: config.reasoning,
            streaming: config.streaming,
            system_role: config.system_role,
        }
    }
}

/// Credentials attached to every upstream request
#[derive(Debug, Clone, Default)]
pub enum AuthStrategy {
    #[default]
    None,
    Bearer(SecretString),
    Header { name: HeaderName, value: SecretString },
    Query { param: String, value: SecretString },
}

/// How a model reaches its upstream
#[derive(Debug, Clone)]
pub struct ProviderBinding {
    /// Real provider name, never shown to callers
    pub provider: String,
    pub dialect: WireDialect,
    pub endpoint: String,
    /// Model name sent upstream
    pub upstream_model: String,
    pub deployment: Option<String>,
    pub region: Option<String>,
    pub auth: AuthStrategy,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub defaults: ParameterDefaults,
    pub inline_assets: bool,
    redaction: Option<Regex>,
}

impl ProviderBinding {
    /// Binding with no credentials, headers or defaults
    pub fn new(provider: impl Into<String>, dialect: WireDialect, endpoint: impl Into<String>, upstream_model: impl Into<String>) -> Self {
        let mut binding = Self {
            provider: provider.into(),
            dialect,
            endpoint: endpoint.into(),
            upstream_model: upstream_model.into(),
            deployment: None,
            region: None,
            auth: AuthStrategy::None,
            headers: Vec::new(),
            defaults: ParameterDefaults::default(),
            inline_assets: dialect.inlines_assets(),
            redaction: None,
        };
        binding.redaction = binding.build_redaction();
        binding
    }

    /// Replace every mention of the provider's name or host with `upstream`
    pub fn redact(&self, text: &str) -> String {
        match self.redaction {
            Some(ref pattern) => pattern.replace_all(text, "upstream").into_owned(),
            None => text.to_owned(),
        }
    }

    fn build_redaction(&self) -> Option<Regex> {
        let mut needles = vec![self.provider.clone()];

        if let Some(host) = url::Url::parse(&self.endpoint.replace(['{', '}'], ""))
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
        {
            needles.push(host);
        }

        let alternatives: Vec<String> = needles
            .iter()
            .filter(|needle| needle.len() > 1)
            .map(|needle| regex::escape(needle))
            .collect();

        if alternatives.is_empty() {
            return None;
        }

        Regex::new(&format!("(?i)(?:{})", alternatives.join("|"))).ok()
    }
}

/// One servable model, immutable after startup
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub id: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    /// Minimum caller tier
    pub tier: Tier,
    pub capabilities: Capabilities,
    /// Overrides the default persona
    pub persona: Option<String>,
    pub binding: ProviderBinding,
    pub resilience: ResilienceConfig,
}

impl ServiceDefinition {
    /// Definition with default capabilities and no aliases
    pub fn new(id: impl Into<String>, binding: ProviderBinding) -> Self {
        Self {
            id: id.into(),
            aliases: Vec::new(),
            description: None,
            tier: Tier::Anonymous,
            capabilities: Capabilities::default(),
            persona: None,
            binding,
            resilience: ResilienceConfig::default(),
        }
    }

    fn from_config(id: &str, model: &ModelConfig, credentials: &IndexMap<String, SecretString>) -> Result<Self, GatewayError> {
        let config = &model.binding;

        let credential = |name: &str| {
            credentials
                .get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("model '{id}' references unknown credential '{name}'"))
        };

        let auth = match config.auth {
            AuthStrategyConfig::None => AuthStrategy::None,
            AuthStrategyConfig::Bearer { credential: ref name } => AuthStrategy::Bearer(credential(name)?),
            AuthStrategyConfig::Header {
                ref name,
                credential: ref secret,
            } => AuthStrategy::Header {
                name: HeaderName::try_from(name.as_str())
                    .map_err(|e| anyhow::anyhow!("model '{id}' has an invalid auth header name: {e}"))?,
                value: credential(secret)?,
            },
            AuthStrategyConfig::Query {
                ref param,
                credential: ref secret,
            } => AuthStrategy::Query {
                param: param.clone(),
                value: credential(secret)?,
            },
        };

        let headers = config
            .headers
            .iter()
            .map(|(name, value)| {
                let name = HeaderName::try_from(name.as_str())
                    .map_err(|e| anyhow::anyhow!("model '{id}' has an invalid header name '{name}': {e}"))?;
                let value = HeaderValue::try_from(value.as_str())
                    .map_err(|e| anyhow::anyhow!("model '{id}' has an invalid value for header '{name}': {e}"))?;
                Ok((name, value))
            })
            .collect::<Result<Vec<_>, anyhow::Error>>()?;

        let mut binding = ProviderBinding::new(
            config.provider.clone(),
            config.dialect,
            config.endpoint.clone(),
            config.upstream_model.clone().unwrap_or_else(|| id.to_owned()),
        );
        binding.deployment.clone_from(&config.deployment);
        binding.region.clone_from(&config.region);
        binding.auth = auth;
        binding.headers = headers;
        binding.defaults = config.defaults.clone();
        binding.inline_assets = config.inline_assets();

        Ok(Self {
            id: id.to_owned(),
            aliases: model.aliases.clone(),
            description: model.description.clone(),
            tier: model.tier,
            capabilities: Capabilities::from(&model.capabilities),
            persona: model.persona.clone(),
            binding,
            resilience: model.resilience.clone(),
        })
    }
}

/// Public view of a model for `/models`
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub aliases: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tier: Tier,
    pub capabilities: Capabilities,
}

/// Name-to-definition lookup, read-only after construction
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    services: IndexMap<String, Arc<ServiceDefinition>>,
    aliases: HashMap<String, String>,
    default_model: Option<String>,
}

impl ModelRegistry {
    /// Build a registry, rejecting duplicate ids and overlapping aliases
    pub fn new(definitions: Vec<ServiceDefinition>, default_model: Option<String>) -> Result<Self, GatewayError> {
        let mut services = IndexMap::new();
        for definition in definitions {
            let id = definition.id.clone();
            if services.insert(id.clone(), Arc::new(definition)).is_some() {
                return Err(anyhow::anyhow!("model id '{id}' is defined twice").into());
            }
        }

        let mut aliases = HashMap::new();
        for (id, service) in &services {
            for alias in &service.aliases {
                if services.contains_key(alias) {
                    return Err(anyhow::anyhow!("alias '{alias}' of '{id}' collides with a model id").into());
                }
                if let Some(owner) = aliases.insert(alias.clone(), id.clone())
                    && owner != *id
                {
                    return Err(anyhow::anyhow!("alias '{alias}' is declared by both '{owner}' and '{id}'").into());
                }
            }
        }

        let registry = Self {
            services,
            aliases,
            default_model: None,
        };

        let default_model = default_model
            .map(|name| registry.resolve(&name).map(|service| service.id.clone()))
            .transpose()?;

        Ok(Self {
            default_model,
            ..registry
        })
    }

    /// Build the registry from loaded configuration
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let definitions = config
            .models
            .iter()
            .map(|(id, model)| ServiceDefinition::from_config(id, model, &config.credentials))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(definitions, config.default_model.clone())
    }

    /// Resolve a canonical id or alias
    ///
    /// Exact id match wins, then the alias table. A miss is always an
    /// error; there is no implicit default.
    pub fn resolve(&self, name: &str) -> Result<Arc<ServiceDefinition>, GatewayError> {
        if let Some(service) = self.services.get(name) {
            return Ok(Arc::clone(service));
        }

        self.aliases
            .get(name)
            .and_then(|id| self.services.get(id))
            .map(Arc::clone)
            .ok_or_else(|| GatewayError::ModelNotFound { model: name.to_owned() })
    }

    /// Resolve the requested name, or the configured default when none was given
    pub fn resolve_requested(&self, requested: Option<&str>) -> Result<Arc<ServiceDefinition>, GatewayError> {
        match requested.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => self.resolve(name),
            None => {
                let default = self.default_model.as_deref().ok_or_else(|| {
                    GatewayError::Validation("no model requested and no default model configured".to_owned())
                })?;
                self.resolve(default)
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ServiceDefinition>> {
        self.services.values()
    }

    pub fn summaries(&self) -> Vec<ModelSummary> {
        self.iter()
            .map(|service| ModelSummary {
                id: service.id.clone(),
                aliases: service.aliases.clone(),
                description: service.description.clone(),
                tier: service.tier,
                capabilities: service.capabilities,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, aliases: &[&str]) -> ServiceDefinition {
        ServiceDefinition {
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
            ..ServiceDefinition::new(
                id,
                ProviderBinding::new("openai", WireDialect::OpenaiChat, "https://api.openai.com/v1/chat/completions", id),
            )
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::new(
            vec![
                definition("openai-fast", &["gpt-5-nano-alias", "openai"]),
                definition("claude", &["claude-alias"]),
            ],
            Some("openai".to_owned()),
        )
        .unwrap()
    }

    #[test]
    fn every_alias_resolves_to_its_definition() {
        let registry = registry();

        for service in registry.iter() {
            for alias in &service.aliases {
                assert_eq!(registry.resolve(alias).unwrap().id, service.id);
            }
            assert_eq!(registry.resolve(&service.id).unwrap().id, service.id);
        }
    }

    #[test]
    fn unknown_name_is_model_not_found() {
        let err = registry().resolve("gpt-4-turbo").unwrap_err();
        assert!(matches!(err, GatewayError::ModelNotFound { ref model } if model == "gpt-4-turbo"));
    }

    #[test]
    fn default_applies_only_when_nothing_was_requested() {
        let registry = registry();
        assert_eq!(registry.resolve_requested(None).unwrap().id, "openai-fast");
        assert_eq!(registry.resolve_requested(Some("  ")).unwrap().id, "openai-fast");
        assert!(registry.resolve_requested(Some("missing")).is_err());
    }

    #[test]
    fn overlapping_aliases_are_rejected() {
        let result = ModelRegistry::new(vec![definition("a", &["shared"]), definition("b", &["shared"])], None);
        assert!(result.is_err());

        let result = ModelRegistry::new(vec![definition("a", &["b"]), definition("b", &[])], None);
        assert!(result.is_err());
    }

    #[test]
    fn redacts_provider_name_and_host() {
        let binding = ProviderBinding::new(
            "OpenAI",
            WireDialect::OpenaiChat,
            "https://api.openai.com/v1/chat/completions",
            "gpt-5-nano",
        );

        let redacted = binding.redact("openai: quota exceeded, see https://api.openai.com/docs");
        assert!(!redacted.to_lowercase().contains("openai"), "{redacted}");
        insta::assert_snapshot!(redacted, @"upstream: quota exceeded, see https://upstream/docs");
    }
}
