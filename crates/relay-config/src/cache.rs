use std::time::Duration;

use serde::Deserialize;

/// In-memory completion cache
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Time-to-live of a cached completion
    #[serde(default = "default_ttl", with = "crate::duration")]
    pub ttl: Duration,
    /// Maximum number of cached completions
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl: default_ttl(),
            capacity: default_capacity(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_enabled() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

#[allow(clippy::missing_const_for_fn)]
fn default_capacity() -> u64 {
    10_000
}
