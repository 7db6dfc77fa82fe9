//! OTLP trace and metric providers

use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::resource as semconv;
use relay_config::{OtlpConfig, OtlpTransport, TelemetryConfig};

/// Providers exporting to one collector
pub(crate) struct Providers {
    pub(crate) meter: SdkMeterProvider,
    pub(crate) tracer: SdkTracerProvider,
}

impl Providers {
    pub(crate) fn build(config: &TelemetryConfig, otlp: &OtlpConfig) -> anyhow::Result<Self> {
        let resource = resource(config);

        let reader = PeriodicReader::builder(metric_exporter(otlp)?)
            .with_interval(otlp.metrics_interval)
            .build();
        let meter = SdkMeterProvider::builder()
            .with_resource(resource.clone())
            .with_reader(reader)
            .build();

        let tracer = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_sampler(sampler(otlp.trace_ratio))
            .with_batch_exporter(span_exporter(otlp)?)
            .build();

        Ok(Self { meter, tracer })
    }

    pub(crate) fn flush(&self) -> anyhow::Result<()> {
        self.meter.force_flush().context("failed to flush metrics")?;
        self.tracer.force_flush().context("failed to flush spans")?;
        Ok(())
    }

    pub(crate) fn shutdown(self) {
        // The subscriber may already be gone here
        if let Err(e) = self.meter.shutdown() {
            eprintln!("meter provider shutdown failed: {e}");
        }
        if let Err(e) = self.tracer.shutdown() {
            eprintln!("tracer provider shutdown failed: {e}");
        }
    }
}

fn resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new(semconv::SERVICE_NAME, config.service_name.clone()),
        KeyValue::new(semconv::SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];
    attributes.extend(
        config
            .attributes
            .iter()
            .map(|(key, value)| KeyValue::new(key.clone(), value.clone())),
    );

    Resource::builder().with_attributes(attributes).build()
}

/// Keep a fixed share of new traces, follow the caller's decision otherwise
fn sampler(ratio: f64) -> Sampler {
    Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio.clamp(0.0, 1.0))))
}

fn metric_exporter(otlp: &OtlpConfig) -> anyhow::Result<MetricExporter> {
    let endpoint = otlp.endpoint.as_str();
    let exporter = match otlp.transport {
        OtlpTransport::Grpc => MetricExporter::builder().with_tonic().with_endpoint(endpoint).build(),
        OtlpTransport::Http => MetricExporter::builder().with_http().with_endpoint(endpoint).build(),
    };

    exporter.with_context(|| format!("failed to build metric exporter for {endpoint}"))
}

fn span_exporter(otlp: &OtlpConfig) -> anyhow::Result<SpanExporter> {
    let endpoint = otlp.endpoint.as_str();
    let exporter = match otlp.transport {
        OtlpTransport::Grpc => SpanExporter::builder().with_tonic().with_endpoint(endpoint).build(),
        OtlpTransport::Http => SpanExporter::builder().with_http().with_endpoint(endpoint).build(),
    };

    exporter.with_context(|| format!("failed to build span exporter for {endpoint}"))
}
