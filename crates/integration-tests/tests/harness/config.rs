//! Programmatic configuration builder for integration tests

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use relay_config::{
    AdmissionConfig, AuthStrategyConfig, AuthToken, BindingConfig, CacheConfig, ClientIpConfig, Config,
    ModelConfig, ResilienceConfig, ServerConfig, WireDialect,
};
use relay_core::Tier;
use secrecy::SecretString;

/// Credential name every test binding authenticates with
pub const CREDENTIAL: &str = "upstream";

/// Secret sent upstream as the bearer token
pub const UPSTREAM_KEY: &str = "sk-upstream-test";

/// Builder for constructing test configurations
///
/// Admission and caching start disabled so unrelated tests do not wait on
/// each other; one proxy hop is trusted so tests can pick their client
/// address with `X-Forwarded-For`.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config {
            server: ServerConfig {
                listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                client_ip: ClientIpConfig { trusted_hops: 1 },
                ..ServerConfig::default()
            },
            admission: AdmissionConfig {
                enabled: false,
                ..AdmissionConfig::default()
            },
            cache: CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            ..Config::default()
        };

        config
            .credentials
            .insert(CREDENTIAL.to_owned(), SecretString::from(UPSTREAM_KEY));

        Self { config }
    }

    /// Add a model bound to `endpoint`
    pub fn model(mut self, model: ModelBuilder) -> Self {
        let (id, config) = model.build();
        self.config.models.insert(id, config);
        self
    }

    pub fn default_model(mut self, id: &str) -> Self {
        self.config.default_model = Some(id.to_owned());
        self
    }

    pub fn admission_interval(mut self, interval: Duration) -> Self {
        self.config.admission = AdmissionConfig {
            enabled: true,
            interval,
        };
        self
    }

    pub fn cache(mut self) -> Self {
        self.config.cache.enabled = true;
        self
    }

    pub fn feed_password(mut self, password: &str) -> Self {
        self.config.feed.password = Some(SecretString::from(password));
        self
    }

    pub fn token(mut self, token: &str, tier: Tier) -> Self {
        self.config.auth.tokens.push(AuthToken {
            token: SecretString::from(token),
            tier,
        });
        self
    }

    pub fn blocked_ip(mut self, ip: IpAddr) -> Self {
        self.config.server.blocklist.ips.push(ip);
        self
    }

    pub fn banned_pattern(mut self, pattern: &str) -> Self {
        self.config.server.blocklist.patterns.push(pattern.to_owned());
        self
    }

    pub fn persona(mut self, prompt: &str) -> Self {
        prompt.clone_into(&mut self.config.persona.default);
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Config {
        self.config.validate().expect("test configuration is valid");
        self.config
    }
}

/// One `[models.<id>]` entry
pub struct ModelBuilder {
    id: String,
    config: ModelConfig,
}

impl ModelBuilder {
    pub fn new(id: &str, dialect: WireDialect, endpoint: String) -> Self {
        Self {
            id: id.to_owned(),
            config: ModelConfig {
                aliases: Vec::new(),
                description: None,
                tier: Tier::Anonymous,
                capabilities: Default::default(),
                persona: None,
                binding: BindingConfig {
                    provider: "acme".to_owned(),
                    dialect,
                    endpoint,
                    upstream_model: Some(format!("{id}-upstream")),
                    deployment: None,
                    region: None,
                    auth: AuthStrategyConfig::Bearer {
                        credential: CREDENTIAL.to_owned(),
                    },
                    headers: Default::default(),
                    defaults: Default::default(),
                    inline_assets: None,
                },
                resilience: ResilienceConfig::default(),
            },
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.config.aliases.push(alias.to_owned());
        self
    }

    pub fn provider(mut self, provider: &str) -> Self {
        provider.clone_into(&mut self.config.binding.provider);
        self
    }

    pub fn upstream_model(mut self, name: &str) -> Self {
        self.config.binding.upstream_model = Some(name.to_owned());
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.config.tier = tier;
        self
    }

    pub fn no_streaming(mut self) -> Self {
        self.config.capabilities.streaming = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.resilience.timeout = Some(timeout);
        self
    }

    pub fn fallback(mut self, id: &str) -> Self {
        self.config.resilience.fallback = Some(id.to_owned());
        self
    }

    pub fn soft_failure(mut self, message: &str) -> Self {
        self.config.resilience.soft_failure = true;
        self.config.resilience.soft_failure_message = Some(message.to_owned());
        self
    }

    fn build(self) -> (String, ModelConfig) {
        (self.id, self.config)
    }
}
