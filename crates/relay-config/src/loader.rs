use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::Config;

/// Placeholders an endpoint template may contain
const ENDPOINT_PLACEHOLDERS: &[&str] = &["model", "deployment", "region"];

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_has_models()?;
        self.validate_aliases()?;
        self.validate_default_model()?;
        self.validate_bindings()?;
        self.validate_resilience()?;
        self.validate_blocklist()?;
        self.validate_referrers()?;

        let health = &self.server.health_path;
        if !health.is_empty() && !health.starts_with('/') {
            anyhow::bail!("server.health_path must start with '/'");
        }

        if self.feed.buffer == 0 {
            anyhow::bail!("feed.buffer must be greater than 0");
        }

        Ok(())
    }

    /// Whether `name` is a canonical id or an alias of some model
    fn knows_model(&self, name: &str) -> bool {
        self.models.contains_key(name) || self.models.values().any(|m| m.aliases.iter().any(|a| a == name))
    }

    fn validate_has_models(&self) -> anyhow::Result<()> {
        if self.models.is_empty() {
            anyhow::bail!("at least one model must be configured");
        }

        if let Some(id) = self.models.keys().find(|id| id.trim().is_empty()) {
            anyhow::bail!("model id '{id}' must not be blank");
        }

        Ok(())
    }

    /// Aliases must be pairwise disjoint and never shadow a canonical id
    fn validate_aliases(&self) -> anyhow::Result<()> {
        let mut owners: HashMap<&str, &str> = HashMap::new();

        for (id, model) in &self.models {
            for alias in &model.aliases {
                if alias.trim().is_empty() {
                    anyhow::bail!("model '{id}' has a blank alias");
                }

                if self.models.contains_key(alias) {
                    anyhow::bail!("alias '{alias}' of model '{id}' collides with a model id");
                }

                if let Some(owner) = owners.insert(alias, id)
                    && owner != id
                {
                    anyhow::bail!("alias '{alias}' is declared by both '{owner}' and '{id}'");
                }
            }
        }

        Ok(())
    }

    fn validate_default_model(&self) -> anyhow::Result<()> {
        if let Some(ref default) = self.default_model
            && !self.knows_model(default)
        {
            anyhow::bail!("default_model '{default}' does not name a configured model");
        }

        Ok(())
    }

    fn validate_bindings(&self) -> anyhow::Result<()> {
        for (id, model) in &self.models {
            let binding = &model.binding;

            if let Some(credential) = binding.auth.credential()
                && !self.credentials.contains_key(credential)
            {
                anyhow::bail!("model '{id}' references unknown credential '{credential}'");
            }

            for caps in placeholder().captures_iter(&binding.endpoint) {
                let name = &caps[1];
                let present = match name {
                    "model" => true,
                    "deployment" => binding.deployment.is_some(),
                    "region" => binding.region.is_some(),
                    _ => anyhow::bail!(
                        "model '{id}' endpoint uses unknown placeholder '{{{name}}}', expected one of {ENDPOINT_PLACEHOLDERS:?}"
                    ),
                };

                if !present {
                    anyhow::bail!("model '{id}' endpoint uses '{{{name}}}' but the binding does not set '{name}'");
                }
            }

            let probe = placeholder().replace_all(&binding.endpoint, "x");
            let url = url::Url::parse(&probe).map_err(|e| anyhow::anyhow!("model '{id}' has an invalid endpoint: {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("model '{id}' endpoint must use http or https");
            }
        }

        Ok(())
    }

    fn validate_resilience(&self) -> anyhow::Result<()> {
        for (id, model) in &self.models {
            let Some(ref fallback) = model.resilience.fallback else {
                continue;
            };

            if fallback == id {
                anyhow::bail!("model '{id}' cannot fall back to itself");
            }

            if !self.models.contains_key(fallback) {
                anyhow::bail!("model '{id}' falls back to unknown model '{fallback}'");
            }
        }

        Ok(())
    }

    fn validate_blocklist(&self) -> anyhow::Result<()> {
        for pattern in &self.server.blocklist.patterns {
            Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid blocklist pattern '{pattern}': {e}"))?;
        }

        Ok(())
    }

    fn validate_referrers(&self) -> anyhow::Result<()> {
        for referrer in &self.auth.allowed_referrers {
            let url = url::Url::parse(referrer).map_err(|e| anyhow::anyhow!("invalid allowed referrer '{referrer}': {e}"))?;
            if !url.origin().is_tuple() {
                anyhow::bail!("allowed referrer '{referrer}' has no scheme and host");
            }
        }

        Ok(())
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("must be valid regex"))
}
