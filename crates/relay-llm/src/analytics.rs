//! Fire-and-forget request analytics

use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_core::Tier;
use relay_telemetry::KeyValue;
use serde::Serialize;
use tokio::sync::mpsc;

/// Events buffered before new ones are dropped
const CHANNEL_CAPACITY: usize = 10_000;

/// One finished gateway request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    /// Canonical model id
    pub model: String,
    /// `"ok"` or the error kind
    pub outcome: String,
    pub cached: bool,
    pub streamed: bool,
    pub private: bool,
    pub tier: Tier,
    #[serde(with = "millis")]
    pub duration: Duration,
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Receiver of analytics events
///
/// Recording must never block or fail the request that produced the event.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: AnalyticsEvent);
}

/// Default sink: logs events from a background task and counts requests
#[derive(Clone)]
pub struct TracingAnalytics {
    tx: mpsc::Sender<AnalyticsEvent>,
}

impl TracingAnalytics {
    /// Spawn the background task; must be called inside a tokio runtime
    pub fn spawn() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(report_loop(rx));
        Self { tx }
    }
}

impl AnalyticsSink for TracingAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        if self.tx.try_send(event).is_err() {
            tracing::trace!("analytics channel full, event dropped");
        }
    }
}

async fn report_loop(mut rx: mpsc::Receiver<AnalyticsEvent>) {
    let metrics = relay_telemetry::metrics();

    while let Some(event) = rx.recv().await {
        let attributes = [
            KeyValue::new("model", event.model.clone()),
            KeyValue::new("outcome", event.outcome.clone()),
            KeyValue::new("cached", event.cached),
        ];
        metrics.request_count.add(1, &attributes);
        metrics.request_duration.record(event.duration.as_secs_f64(), &attributes);

        tracing::info!(
            target: "relay::analytics",
            model = %event.model,
            outcome = %event.outcome,
            cached = event.cached,
            streamed = event.streamed,
            private = event.private,
            tier = %event.tier,
            duration_ms = event.duration.as_millis(),
            "request completed"
        );
    }
}

/// Sink that keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryAnalytics {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl MemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }
}

impl AnalyticsSink for MemoryAnalytics {
    fn record(&self, event: AnalyticsEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
