use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

/// `[server]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    /// Route answering `ok` for liveness probes; empty disables it
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub client_ip: ClientIpConfig,
    #[serde(default)]
    pub blocklist: BlocklistConfig,
}

/// Configuration for extracting client IP addresses
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientIpConfig {
    /// Number of trusted proxy hops in `X-Forwarded-For`
    ///
    /// Zero means the header is ignored and the socket peer is used
    #[serde(default)]
    pub trusted_hops: usize,
}

/// Requests vetoed before they reach the pipeline
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlocklistConfig {
    /// Client addresses that are refused outright
    #[serde(default)]
    pub ips: Vec<IpAddr>,
    /// Regex patterns matched against prompt text
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            health_path: default_health_path(),
            client_ip: ClientIpConfig::default(),
            blocklist: BlocklistConfig::default(),
        }
    }
}

fn default_health_path() -> String {
    "/health".to_owned()
}
