//! Log output and OTLP export

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// `[telemetry]` table
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Reported as `service.name`
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub log_format: LogFormat,
    /// Extra resource attributes attached to every exported span and metric
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Traces and metrics stay local when unset
    #[serde(default)]
    pub otlp: Option<OtlpConfig>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_format: LogFormat::default(),
            attributes: BTreeMap::new(),
            otlp: None,
        }
    }
}

/// Format of log lines written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Collector that receives traces and metrics
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub transport: OtlpTransport,
    /// Push period of the metric reader
    #[serde(default = "default_metrics_interval", with = "crate::duration")]
    pub metrics_interval: Duration,
    /// Fraction of root traces kept, between 0 and 1
    #[serde(default = "default_trace_ratio")]
    pub trace_ratio: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpTransport {
    #[default]
    Grpc,
    /// HTTP with protobuf payloads
    Http,
}

fn default_service_name() -> String {
    "relay".to_owned()
}

#[allow(clippy::missing_const_for_fn)]
fn default_metrics_interval() -> Duration {
    Duration::from_secs(30)
}

#[allow(clippy::missing_const_for_fn)]
fn default_trace_ratio() -> f64 {
    1.0
}
