use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Relay text-generation gateway
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Text-generation gateway with a live completion feed")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.toml", env = "RELAY_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "RELAY_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter directives
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_filter: String,
}
