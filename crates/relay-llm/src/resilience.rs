//! Handlers and the wrappers that make them resilient
//!
//! Every model gets a [`CompletionHandler`] chain built from its resilience
//! policy: the base [`ServiceHandler`], optionally wrapped in
//! [`TimeoutFallback`], optionally wrapped in [`SoftFailure`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::{CompletionStream, Dispatched, UpstreamClient, synthetic_stream};
use crate::error::GatewayError;
use crate::pipeline::{Pipeline, PreparedRequest};
use crate::registry::{ModelRegistry, ServiceDefinition};
use crate::types::{CompletionResponse, FinishReason, Message, RequestOptions, StreamEvent};

/// Substitute text used when a soft-failure model has none configured
pub const DEFAULT_SOFT_FAILURE_MESSAGE: &str =
    "This model is temporarily unavailable. Please try again in a moment or pick another model.";

/// Conversation and options as received, before any transform
#[derive(Debug, Clone, Default)]
pub struct CompletionInput {
    pub messages: Vec<Message>,
    pub options: RequestOptions,
}

/// Produces a completion for one request
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Handle a request; cancelling `cancel` aborts the work
    async fn handle(&self, input: &CompletionInput, cancel: CancellationToken) -> Result<Dispatched, GatewayError>;
}

/// Pipeline plus upstream call for a single model
pub struct ServiceHandler {
    service: Arc<ServiceDefinition>,
    pipeline: Arc<Pipeline>,
    client: UpstreamClient,
}

impl ServiceHandler {
    pub const fn new(service: Arc<ServiceDefinition>, pipeline: Arc<Pipeline>, client: UpstreamClient) -> Self {
        Self {
            service,
            pipeline,
            client,
        }
    }
}

#[async_trait]
impl CompletionHandler for ServiceHandler {
    async fn handle(&self, input: &CompletionInput, cancel: CancellationToken) -> Result<Dispatched, GatewayError> {
        let request = PreparedRequest::new(input.messages.clone(), input.options.clone());
        let prepared = self.pipeline.run(request, &self.service).await?;
        self.client.dispatch(prepared, &self.service, &cancel).await
    }
}

/// Bound the time to a first response and try a fallback on failure
///
/// When the timer fires, the primary's token is cancelled so the losing
/// call is aborted rather than left running. Only upstream failures fall
/// back; request errors would fail the same way on any model.
pub struct TimeoutFallback {
    primary: Arc<dyn CompletionHandler>,
    fallback: Option<Arc<dyn CompletionHandler>>,
    timeout: Option<Duration>,
    model: String,
}

impl TimeoutFallback {
    pub fn new(
        model: impl Into<String>,
        primary: Arc<dyn CompletionHandler>,
        fallback: Option<Arc<dyn CompletionHandler>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            primary,
            fallback,
            timeout,
            model: model.into(),
        }
    }
}

#[async_trait]
impl CompletionHandler for TimeoutFallback {
    async fn handle(&self, input: &CompletionInput, cancel: CancellationToken) -> Result<Dispatched, GatewayError> {
        let attempt = cancel.child_token();

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.primary.handle(input, attempt.clone())).await {
                Ok(result) => result,
                Err(_) => {
                    attempt.cancel();
                    tracing::warn!(model = %self.model, timeout_ms = limit.as_millis(), "upstream timed out");
                    Err(GatewayError::UpstreamTimeout {
                        detail: format!("no response within {}ms", limit.as_millis()),
                    })
                }
            },
            None => self.primary.handle(input, attempt).await,
        };

        match (result, &self.fallback) {
            (Err(error), Some(fallback)) if error.is_upstream() && !cancel.is_cancelled() => {
                tracing::warn!(model = %self.model, error = %error, "primary failed, using fallback");
                fallback.handle(input, cancel).await
            }
            (result, _) => result,
        }
    }
}

/// Never fail: replace any error with a substitute completion
pub struct SoftFailure {
    inner: Arc<dyn CompletionHandler>,
    model: String,
    message: String,
}

impl SoftFailure {
    pub fn new(inner: Arc<dyn CompletionHandler>, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            inner,
            model: model.into(),
            message: message.into(),
        }
    }

    fn substitute(&self) -> CompletionResponse {
        CompletionResponse::synthetic(self.model.clone(), self.message.clone())
    }
}

#[async_trait]
impl CompletionHandler for SoftFailure {
    async fn handle(&self, input: &CompletionInput, cancel: CancellationToken) -> Result<Dispatched, GatewayError> {
        match self.inner.handle(input, cancel).await {
            Ok(Dispatched::Stream(stream)) => Ok(Dispatched::Stream(soften(stream, self.model.clone(), self.message.clone()))),
            Ok(completion) => Ok(completion),
            Err(error) => {
                tracing::warn!(model = %self.model, error = %error, "substituting soft-failure completion");
                if input.options.stream {
                    Ok(Dispatched::Stream(synthetic_stream(self.substitute())))
                } else {
                    Ok(Dispatched::Completion(self.substitute()))
                }
            }
        }
    }
}

/// Turn a mid-stream error into the substitute text and a clean ending
fn soften(stream: CompletionStream, model: String, message: String) -> CompletionStream {
    Box::pin(async_stream::stream! {
        let mut stream = stream;

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => yield Ok(event),
                Err(error) => {
                    tracing::warn!(%model, error = %error, "substituting soft-failure text mid-stream");
                    yield Ok(StreamEvent::content(message));
                    yield Ok(StreamEvent::finish(FinishReason::Stop));
                    yield Ok(StreamEvent::Done);
                    return;
                }
            }
        }
    })
}

/// Build the handler chain for a model from its resilience policy
///
/// A fallback is called through its own base handler, so fallbacks never
/// chain further.
pub fn build_handler(
    service: &Arc<ServiceDefinition>,
    registry: &ModelRegistry,
    pipeline: &Arc<Pipeline>,
    client: &UpstreamClient,
) -> Result<Arc<dyn CompletionHandler>, GatewayError> {
    let policy = &service.resilience;
    let base = |service: Arc<ServiceDefinition>| -> Arc<dyn CompletionHandler> {
        Arc::new(ServiceHandler::new(service, Arc::clone(pipeline), client.clone()))
    };

    let mut handler = base(Arc::clone(service));

    if policy.timeout.is_some() || policy.fallback.is_some() {
        let fallback = policy
            .fallback
            .as_deref()
            .map(|id| registry.resolve(id).map(base))
            .transpose()?;

        handler = Arc::new(TimeoutFallback::new(service.id.clone(), handler, fallback, policy.timeout));
    }

    if policy.soft_failure {
        let message = policy
            .soft_failure_message
            .clone()
            .unwrap_or_else(|| DEFAULT_SOFT_FAILURE_MESSAGE.to_owned());
        handler = Arc::new(SoftFailure::new(handler, service.id.clone(), message));
    }

    Ok(handler)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures_util::stream;

    use super::*;

    /// Answers with fixed text after a delay, noting whether it was cancelled
    struct Scripted {
        text: &'static str,
        delay: Duration,
        calls: AtomicUsize,
        cancelled: Arc<AtomicBool>,
    }

    impl Scripted {
        fn new(text: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                text,
                delay,
                calls: AtomicUsize::new(0),
                cancelled: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    #[async_trait]
    impl CompletionHandler for Scripted {
        async fn handle(&self, _: &CompletionInput, cancel: CancellationToken) -> Result<Dispatched, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let cancelled = Arc::clone(&self.cancelled);
            let watcher = cancel.clone();
            tokio::spawn(async move {
                watcher.cancelled().await;
                cancelled.store(true, Ordering::SeqCst);
            });

            tokio::time::sleep(self.delay).await;
            Ok(Dispatched::Completion(CompletionResponse::synthetic("scripted", self.text)))
        }
    }

    struct Failing(fn() -> GatewayError);

    #[async_trait]
    impl CompletionHandler for Failing {
        async fn handle(&self, _: &CompletionInput, _: CancellationToken) -> Result<Dispatched, GatewayError> {
            Err((self.0)())
        }
    }

    fn bad_response() -> GatewayError {
        GatewayError::UpstreamBadResponse {
            status: Some(500),
            detail: "upstream exploded".into(),
        }
    }

    fn text(result: Result<Dispatched, GatewayError>) -> String {
        match result {
            Ok(Dispatched::Completion(completion)) => completion.text(),
            other => panic!("expected a completion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_yields_fallback_result_and_is_cancelled() {
        let primary = Scripted::new("primary", Duration::from_secs(60));
        let fallback = Scripted::new("fallback", Duration::from_millis(10));
        let wrapped = TimeoutFallback::new(
            "openai-fast",
            primary.clone(),
            Some(fallback.clone()),
            Some(Duration::from_secs(5)),
        );

        let result = wrapped
            .handle(&CompletionInput::default(), CancellationToken::new())
            .await;

        assert_eq!(text(result), "fallback");
        tokio::task::yield_now().await;
        assert!(primary.cancelled.load(Ordering::SeqCst));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_fallback_the_failure_propagates() {
        let wrapped = TimeoutFallback::new("m", Arc::new(Failing(bad_response)), None, Some(Duration::from_secs(5)));

        let error = wrapped
            .handle(&CompletionInput::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, GatewayError::UpstreamBadResponse { status: Some(500), .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn request_errors_do_not_fall_back() {
        let fallback = Scripted::new("fallback", Duration::ZERO);
        let wrapped = TimeoutFallback::new(
            "m",
            Arc::new(Failing(|| GatewayError::Validation("bad".into()))),
            Some(fallback.clone()),
            None,
        );

        let error = wrapped
            .handle(&CompletionInput::default(), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), "ValidationError");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_primary_wins() {
        let fallback = Scripted::new("fallback", Duration::ZERO);
        let wrapped = TimeoutFallback::new(
            "m",
            Scripted::new("primary", Duration::from_secs(1)),
            Some(fallback.clone()),
            Some(Duration::from_secs(5)),
        );

        let result = wrapped
            .handle(&CompletionInput::default(), CancellationToken::new())
            .await;

        assert_eq!(text(result), "primary");
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn soft_failure_substitutes_a_completion() {
        let wrapped = SoftFailure::new(Arc::new(Failing(bad_response)), "community-model", "Please donate.");

        let Ok(Dispatched::Completion(completion)) = wrapped
            .handle(&CompletionInput::default(), CancellationToken::new())
            .await
        else {
            panic!("expected a substitute completion");
        };

        assert_eq!(completion.model, "community-model");
        assert_eq!(completion.choices.len(), 1);
        assert_eq!(completion.text(), "Please donate.");
    }

    struct BrokenStream;

    #[async_trait]
    impl CompletionHandler for BrokenStream {
        async fn handle(&self, _: &CompletionInput, _: CancellationToken) -> Result<Dispatched, GatewayError> {
            Ok(Dispatched::Stream(Box::pin(stream::iter(vec![
                Ok(StreamEvent::content("partial ")),
                Err(bad_response()),
                Ok(StreamEvent::content("never seen")),
            ]))))
        }
    }

    #[tokio::test]
    async fn soft_failure_repairs_a_broken_stream() {
        let wrapped = SoftFailure::new(Arc::new(BrokenStream), "community-model", "Please donate.");
        let input = CompletionInput {
            options: RequestOptions {
                stream: true,
                ..RequestOptions::default()
            },
            ..CompletionInput::default()
        };

        let Ok(Dispatched::Stream(stream)) = wrapped.handle(&input, CancellationToken::new()).await else {
            panic!("expected a stream");
        };
        let events: Vec<StreamEvent> = stream.map(Result::unwrap).collect().await;

        assert_eq!(
            events,
            vec![
                StreamEvent::content("partial "),
                StreamEvent::content("Please donate."),
                StreamEvent::finish(FinishReason::Stop),
                StreamEvent::Done,
            ]
        );
    }
}
