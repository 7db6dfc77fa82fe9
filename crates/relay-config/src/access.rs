//! Caller classification, admission throttling and feed access

use std::time::Duration;

use relay_core::Tier;
use secrecy::SecretString;
use serde::Deserialize;

/// Caller classification rules
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Bearer tokens and the tier each one grants
    #[serde(default)]
    pub tokens: Vec<AuthToken>,
    /// Origins (scheme, host and port) whose `Referer` or `Origin` makes a caller `seed`
    #[serde(default)]
    pub allowed_referrers: Vec<String>,
}

/// A single accepted bearer token
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthToken {
    pub token: SecretString,
    #[serde(default = "default_token_tier")]
    pub tier: Tier,
}

#[allow(clippy::missing_const_for_fn)]
fn default_token_tier() -> Tier {
    Tier::Seed
}

/// Per-IP admission queue
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdmissionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum spacing between two admitted jobs from the same client
    #[serde(default = "default_interval", with = "crate::duration")]
    pub interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval: default_interval(),
        }
    }
}

/// Completion feed
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    /// Shared secret for `/feed/private`; the private feed is closed when unset
    #[serde(default)]
    pub password: Option<SecretString>,
    /// Per-subscriber buffer size before entries are dropped
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            password: None,
            buffer: default_buffer(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_enabled() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_interval() -> Duration {
    Duration::from_secs(15)
}

#[allow(clippy::missing_const_for_fn)]
fn default_buffer() -> usize {
    64
}
