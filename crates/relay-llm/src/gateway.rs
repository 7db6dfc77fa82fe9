//! Request orchestration: resolution, cache, admission, resilient dispatch
//! and publication to the feed

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use relay_admission::{AdmissionPermit, AdmissionQueue, FeedBroadcaster, FeedEntry};
use relay_config::Config;
use relay_core::RequestContext;
use secrecy::SecretString;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::analytics::{AnalyticsEvent, AnalyticsSink};
use crate::cache::{ResponseCache, compute_cache_key};
use crate::client::{CompletionStream, Dispatched, UpstreamClient};
use crate::error::GatewayError;
use crate::pipeline::{ConfiguredPersona, Pipeline};
use crate::registry::{ModelRegistry, ServiceDefinition};
use crate::resilience::{CompletionHandler, CompletionInput, build_handler};
use crate::types::{CompletionRequest, CompletionResponse, StreamEvent};

/// Default number of events a feed subscriber may fall behind
const DEFAULT_FEED_BUFFER: usize = 64;

/// Veto applied before a request is resolved or dispatched
pub trait RequestGuard: Send + Sync {
    fn check(&self, request: &CompletionRequest, context: &RequestContext) -> Result<(), GatewayError>;
}

/// Outcome of a gateway call
#[derive(Debug)]
pub struct GatewayReply {
    /// Canonical id of the model that was resolved
    pub model: String,
    pub body: Dispatched,
}

/// Shared gateway state, cheap to clone
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

struct Inner {
    registry: ModelRegistry,
    handlers: HashMap<String, Arc<dyn CompletionHandler>>,
    cache: ResponseCache,
    admission: AdmissionQueue,
    feed: FeedBroadcaster,
    feed_password: Option<SecretString>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    guards: Vec<Arc<dyn RequestGuard>>,
}

/// Assembles a [`Gateway`]; every registered model needs a handler
pub struct GatewayBuilder {
    registry: ModelRegistry,
    handlers: HashMap<String, Arc<dyn CompletionHandler>>,
    cache: ResponseCache,
    admission: AdmissionQueue,
    feed: FeedBroadcaster,
    feed_password: Option<SecretString>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    guards: Vec<Arc<dyn RequestGuard>>,
}

impl GatewayBuilder {
    /// No cache, no admission spacing, no analytics
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
            cache: ResponseCache::disabled(),
            admission: AdmissionQueue::new(&relay_config::AdmissionConfig {
                enabled: false,
                ..relay_config::AdmissionConfig::default()
            }),
            feed: FeedBroadcaster::new(DEFAULT_FEED_BUFFER),
            feed_password: None,
            analytics: None,
            guards: Vec::new(),
        }
    }

    /// Builder with every component wired from configuration
    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Result<Self, GatewayError> {
        let registry = ModelRegistry::from_config(config)?;
        let persona = Arc::new(ConfiguredPersona::new(&config.persona));
        let pipeline = Arc::new(Pipeline::standard(persona, http.clone()));
        let client = UpstreamClient::new(http);

        tracing::info!(models = registry.len(), "model registry loaded");

        Ok(Self::new(registry)
            .upstream(&pipeline, &client)?
            .cache(ResponseCache::new(&config.cache))
            .admission(AdmissionQueue::new(&config.admission))
            .feed(FeedBroadcaster::new(config.feed.buffer), config.feed.password.clone())
            .analytics(analytics))
    }

    /// Build the resilient handler chain of every registered model
    pub fn upstream(mut self, pipeline: &Arc<Pipeline>, client: &UpstreamClient) -> Result<Self, GatewayError> {
        for service in self.registry.iter() {
            let handler = build_handler(service, &self.registry, pipeline, client)?;
            self.handlers.insert(service.id.clone(), handler);
        }
        Ok(self)
    }

    /// Serve `model` with a specific handler
    #[must_use]
    pub fn handler(mut self, model: impl Into<String>, handler: Arc<dyn CompletionHandler>) -> Self {
        self.handlers.insert(model.into(), handler);
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn admission(mut self, admission: AdmissionQueue) -> Self {
        self.admission = admission;
        self
    }

    #[must_use]
    pub fn feed(mut self, feed: FeedBroadcaster, password: Option<SecretString>) -> Self {
        self.feed = feed;
        self.feed_password = password;
        self
    }

    #[must_use]
    pub fn analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    /// Add a veto, checked in insertion order
    #[must_use]
    pub fn guard(mut self, guard: Arc<dyn RequestGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        if let Some(missing) = self.registry.iter().find(|s| !self.handlers.contains_key(&s.id)) {
            return Err(anyhow::anyhow!("model '{}' has no handler", missing.id).into());
        }

        Ok(Gateway {
            inner: Arc::new(Inner {
                registry: self.registry,
                handlers: self.handlers,
                cache: self.cache,
                admission: self.admission,
                feed: self.feed,
                feed_password: self.feed_password,
                analytics: self.analytics,
                guards: self.guards,
            }),
        })
    }
}

impl Gateway {
    pub fn builder(registry: ModelRegistry) -> GatewayBuilder {
        GatewayBuilder::new(registry)
    }

    /// Wire every component from configuration
    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Result<Self, GatewayError> {
        GatewayBuilder::from_config(config, http, analytics)?.build()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    pub fn feed(&self) -> &FeedBroadcaster {
        &self.inner.feed
    }

    pub fn feed_password(&self) -> Option<SecretString> {
        self.inner.feed_password.clone()
    }

    /// Run one completion request end to end
    ///
    /// Dropping the returned future, or the stream inside the reply,
    /// cancels the upstream work.
    pub async fn complete(
        &self,
        request: CompletionRequest,
        context: &RequestContext,
    ) -> Result<GatewayReply, GatewayError> {
        let started = Instant::now();
        let requested = request.model.clone().unwrap_or_default();
        let mut report = Report {
            model: requested,
            streamed: request.options.stream,
            private: request.private,
            context: context.clone(),
            started,
        };

        let result = self.run(request, &mut report).await;

        if let Err(ref error) = result {
            tracing::debug!(model = %report.model, kind = error.kind(), "completion failed");
            self.record(&report, error.kind(), false);
        }

        result
    }

    async fn run(&self, request: CompletionRequest, report: &mut Report) -> Result<GatewayReply, GatewayError> {
        if request.messages.is_empty() {
            return Err(GatewayError::Validation("conversation has no messages".to_owned()));
        }

        for guard in &self.inner.guards {
            guard.check(&request, &report.context)?;
        }

        let service = self.inner.registry.resolve_requested(request.model.as_deref())?;
        report.model.clone_from(&service.id);

        let caller = report.context.authentication.tier;
        if !caller.permits(service.tier) {
            return Err(GatewayError::Blocked(format!(
                "model '{}' requires the {} tier",
                service.id, service.tier
            )));
        }

        let prompt = request.prompt();
        let cache_key = cache_key(&service, &request);

        if let Some(ref key) = cache_key
            && let Some(hit) = self.inner.cache.get(key)
        {
            let mut completion = CompletionResponse::clone(&hit);
            completion.model.clone_from(&service.id);
            self.record(report, "ok", true);

            return Ok(GatewayReply {
                model: service.id.clone(),
                body: Dispatched::Completion(completion),
            });
        }

        let handler = self
            .inner
            .handlers
            .get(&service.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("model '{}' has no handler", service.id))?;

        let context = &report.context;
        let permit = self
            .inner
            .admission
            .admit(context.client_ip, context.authentication.authenticated)
            .await;

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let input = CompletionInput {
            messages: request.messages,
            options: request.options,
        };

        let body = handler.handle(&input, cancel).await?;

        let body = match body {
            Dispatched::Completion(mut completion) => {
                // A fallback answers under the model the caller resolved
                completion.model.clone_from(&service.id);
                if let Some(key) = cache_key {
                    self.inner.cache.put(key, completion.clone());
                }
                self.publish(report, prompt, completion.text());
                self.record(report, "ok", false);
                drop(permit);
                Dispatched::Completion(completion)
            }
            Dispatched::Stream(stream) => Dispatched::Stream(self.observe(
                stream,
                report.clone(),
                prompt,
                StreamHold {
                    _permit: permit,
                    _guard: guard,
                },
            )),
        };

        Ok(GatewayReply {
            model: service.id.clone(),
            body,
        })
    }

    /// Publish and record a stream once it has been fully consumed
    fn observe(&self, stream: CompletionStream, report: Report, prompt: String, hold: StreamHold) -> CompletionStream {
        let gateway = self.clone();

        Box::pin(async_stream::stream! {
            let _hold = hold;
            let mut stream = stream;
            let mut text = String::new();
            let mut failure = None;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(StreamEvent::Delta(ref delta)) => {
                        if let Some(ref content) = delta.content {
                            text.push_str(content);
                        }
                    }
                    Err(ref error) => failure = Some(error.kind()),
                    Ok(_) => {}
                }
                yield item;
            }

            match failure {
                Some(kind) => gateway.record(&report, kind, false),
                None => {
                    gateway.publish(&report, prompt, text);
                    gateway.record(&report, "ok", false);
                }
            }
        })
    }

    fn publish(&self, report: &Report, prompt: String, response: String) {
        let entry = FeedEntry {
            private: report.private,
            origin_ip: report.context.client_ip.map(|ip| ip.to_string()),
            ..FeedEntry::new(report.model.clone(), prompt, response)
        };
        self.inner.feed.publish(&entry);
    }

    fn record(&self, report: &Report, outcome: &str, cached: bool) {
        if let Some(ref sink) = self.inner.analytics {
            sink.record(AnalyticsEvent {
                model: report.model.clone(),
                outcome: outcome.to_owned(),
                cached,
                streamed: report.streamed,
                private: report.private,
                tier: report.context.authentication.tier,
                duration: report.started.elapsed(),
            });
        }
    }
}

/// What a request needs to be reported once it finishes
#[derive(Clone)]
struct Report {
    model: String,
    streamed: bool,
    private: bool,
    context: RequestContext,
    started: Instant,
}

/// Held by a live stream: the client's admission lane and the token that
/// cancels the upstream call when the stream is dropped
struct StreamHold {
    _permit: AdmissionPermit,
    _guard: DropGuard,
}

/// Soft-failure substitutes must never be replayed from the cache
fn cache_key(service: &ServiceDefinition, request: &CompletionRequest) -> Option<String> {
    if service.resilience.soft_failure {
        return None;
    }
    compute_cache_key(&service.id, &request.messages, &request.options)
}
