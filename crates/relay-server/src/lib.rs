//! HTTP server assembly for Relay

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod blocklist;
mod classify;
mod client_ip;
mod request_context;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{Router, routing};
use relay_config::Config;
use relay_llm::{AnalyticsSink, Gateway, GatewayBuilder, TracingAnalytics};
use tower_http::trace::TraceLayer;

pub use blocklist::Blocklist;
pub use classify::Classifier;
pub use client_ip::ClientAddr;

/// Upstream connections that take longer than this are abandoned
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    gateway: Gateway,
}

impl Server {
    /// Build the server with the default analytics sink
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the model registry, the blocklist or the HTTP
    /// client cannot be built
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_analytics(config, Arc::new(TracingAnalytics::spawn()))
    }

    /// Build the server, reporting finished requests to `analytics`
    ///
    /// # Errors
    ///
    /// Returns an error if the model registry, the blocklist or the HTTP
    /// client cannot be built
    pub fn with_analytics(config: &Config, analytics: Arc<dyn AnalyticsSink>) -> anyhow::Result<Self> {
        let listen_address = config
            .server
            .listen_address
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build upstream HTTP client")?;

        let blocklist = Blocklist::new(&config.server.blocklist)?;
        let classifier = Classifier::new(&config.auth);

        let gateway = GatewayBuilder::from_config(config, http, analytics)?
            .guard(Arc::new(blocklist.clone()))
            .build()?;

        let mut app = Router::new();

        // Health check
        if !config.server.health_path.is_empty() {
            app = app.route(&config.server.health_path, routing::get(|| async { "ok" }));
        }

        // Feed and completion routes
        app = app.merge(relay_admission::feed_router(
            gateway.feed().clone(),
            gateway.feed_password(),
        ));
        app = app.merge(relay_llm::completion_router(gateway.clone()));

        // Middleware, innermost first

        app = app.layer(axum::middleware::from_fn(request_context::request_context_middleware));

        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let blocklist = blocklist.clone();
            async move { blocklist::blocklist_middleware(blocklist, req, next).await }
        }));

        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let classifier = classifier.clone();
            async move { classify::classify_middleware(classifier, req, next).await }
        }));

        let client_ip = config.server.client_ip.clone();
        app = app.layer(axum::middleware::from_fn(move |req, next| {
            let config = client_ip.clone();
            async move { client_ip::client_ip_middleware(config, req, next).await }
        }));

        app = app.layer(TraceLayer::new_for_http());

        Ok(Self {
            router: app,
            listen_address,
            gateway,
        })
    }

    /// Get the configured listen address
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Override the configured listen address
    #[must_use]
    pub fn with_listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = listen_address;
        self
    }

    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_address))?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails
    pub async fn serve_on(
        self,
        listener: tokio::net::TcpListener,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
