//! Text-generation gateway core for Relay
//!
//! Resolves model names through a registry, prepares requests with a fixed
//! transform pipeline, talks to upstreams in their own wire dialect and
//! normalizes what comes back, streaming or not, into one canonical
//! chat-completion shape.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod analytics;
pub mod cache;
pub mod client;
pub mod convert;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod resilience;
#[cfg(feature = "http")]
pub mod router;
pub mod sse;
pub mod types;

pub use analytics::{AnalyticsEvent, AnalyticsSink, MemoryAnalytics, TracingAnalytics};
pub use cache::ResponseCache;
pub use client::{CompletionStream, Dispatched, UpstreamClient};
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayBuilder, GatewayReply, RequestGuard};
pub use pipeline::{Pipeline, PreparedRequest, Transform};
pub use registry::{ModelRegistry, ServiceDefinition};
pub use resilience::{CompletionHandler, CompletionInput};
#[cfg(feature = "http")]
pub use router::completion_router;
pub use types::{CompletionRequest, CompletionResponse, StreamEvent};
