#![allow(clippy::must_use_candidate)]

pub mod access;
pub mod cache;
mod duration;
mod env;
mod loader;
pub mod models;
pub mod persona;
pub mod server;
pub mod telemetry;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;

pub use access::*;
pub use cache::*;
pub use models::*;
pub use persona::*;
pub use server::*;
pub use telemetry::*;

/// Top-level relay configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Model used when a request names none
    #[serde(default)]
    pub default_model: Option<String>,
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Named upstream credentials referenced by model bindings
    #[serde(default)]
    pub credentials: IndexMap<String, SecretString>,
    /// Caller classification
    #[serde(default)]
    pub auth: AuthConfig,
    /// Per-IP admission queue
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Completion feed
    #[serde(default)]
    pub feed: FeedConfig,
    /// In-memory response cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Default system prompts
    #[serde(default)]
    pub persona: PersonaConfig,
    /// Model definitions keyed by canonical id
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
