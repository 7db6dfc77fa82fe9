//! Metric names and the process-wide instrument set

use std::sync::OnceLock;
use std::time::Instant;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};

pub const REQUEST_COUNT: &str = "relay.request.count";
pub const REQUEST_DURATION: &str = "relay.request.duration";
pub const UPSTREAM_ERROR_COUNT: &str = "relay.upstream.error.count";
pub const FEED_DROPPED: &str = "relay.feed.dropped";
pub const ADMISSION_WAIT: &str = "relay.admission.wait";

/// Record the time elapsed since `start` on a histogram, in seconds
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}

/// Instruments shared by every component
///
/// Built from the global meter provider on first use, so instruments are
/// no-ops until [`crate::init`] installs an exporter.
pub struct Metrics {
    pub request_count: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub upstream_errors: Counter<u64>,
    pub feed_dropped: Counter<u64>,
    pub admission_wait: Histogram<f64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("relay");

        Self {
            request_count: meter
                .u64_counter(REQUEST_COUNT)
                .with_description("Completed gateway requests")
                .build(),
            request_duration: meter
                .f64_histogram(REQUEST_DURATION)
                .with_description("End-to-end request duration")
                .with_unit("s")
                .build(),
            upstream_errors: meter
                .u64_counter(UPSTREAM_ERROR_COUNT)
                .with_description("Failed upstream calls by error kind")
                .build(),
            feed_dropped: meter
                .u64_counter(FEED_DROPPED)
                .with_description("Feed entries dropped for slow subscribers")
                .build(),
            admission_wait: meter
                .f64_histogram(ADMISSION_WAIT)
                .with_description("Time spent waiting in the per-client admission queue")
                .with_unit("s")
                .build(),
        }
    }
}

/// The shared instrument set
pub fn metrics() -> &'static Metrics {
    static METRICS: OnceLock<Metrics> = OnceLock::new();
    METRICS.get_or_init(Metrics::new)
}
