//! Logging, tracing and metrics for Relay
//!
//! Logs always go to stdout through `tracing-subscriber`. Traces and
//! metrics leave the process only when an OTLP collector is configured.

pub mod metrics;
mod otlp;

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use relay_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use metrics::{Metrics, metrics};
pub use opentelemetry::KeyValue;

/// Holds the OTLP providers; shuts them down when dropped
///
/// Keep it alive for the lifetime of the process.
#[must_use = "dropping the guard stops trace and metric export"]
pub struct TelemetryGuard {
    providers: Option<otlp::Providers>,
}

impl TelemetryGuard {
    /// Push buffered spans and metrics to the collector now
    ///
    /// # Errors
    ///
    /// Returns an error if a provider fails to flush
    pub fn flush(&self) -> anyhow::Result<()> {
        self.providers.as_ref().map_or(Ok(()), otlp::Providers::flush)
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(providers) = self.providers.take() {
            providers.shutdown();
        }
    }
}

/// Install the global subscriber
///
/// `log_filter` uses `EnvFilter` syntax; an invalid filter falls back to
/// `info`.
///
/// # Errors
///
/// Returns an error if the OTLP exporters cannot be built
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.is_some_and(|c| c.log_format == LogFormat::Json);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer().with_target(true)))
        .with(json.then(|| fmt::layer().json().flatten_event(true).with_current_span(false)));

    let Some((config, otlp)) = config.and_then(|c| c.otlp.as_ref().map(|otlp| (c, otlp))) else {
        subscriber.init();
        return Ok(TelemetryGuard { providers: None });
    };

    let providers = otlp::Providers::build(config, otlp)?;
    global::set_meter_provider(providers.meter.clone());
    global::set_tracer_provider(providers.tracer.clone());

    let tracer = providers.tracer.tracer("relay");
    subscriber.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();

    tracing::info!(endpoint = %otlp.endpoint, "exporting traces and metrics over OTLP");

    Ok(TelemetryGuard {
        providers: Some(providers),
    })
}
