//! Test server wrapper that starts Relay on a random port

use std::net::SocketAddr;
use std::sync::Arc;

use relay_config::Config;
use relay_llm::MemoryAnalytics;
use relay_server::Server;
use tokio_util::sync::CancellationToken;

/// A running test server instance
pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
    analytics: MemoryAnalytics,
}

impl TestServer {
    /// Start a test server with the given configuration
    ///
    /// Binds to port 0 for automatic port assignment
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        let analytics = MemoryAnalytics::new();
        let server = Server::with_analytics(&config, Arc::new(analytics.clone()))?;
        let shutdown = CancellationToken::new();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let token = shutdown.clone();
        tokio::spawn(async move {
            server.serve_on(listener, token).await.ok();
        });

        Ok(Self {
            addr,
            shutdown,
            client: reqwest::Client::new(),
            analytics,
        })
    }

    /// Absolute URL of a path on the running server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Events recorded by the analytics sink so far
    pub fn analytics(&self) -> &MemoryAnalytics {
        &self.analytics
    }

    /// `POST /openai` with a JSON body
    pub async fn openai(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/openai"))
            .json(&body)
            .send()
            .await
            .expect("request reaches the server")
    }

    /// `GET /{prompt}` as the given forwarded client
    pub async fn prompt_from(&self, prompt: &str, client_ip: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/{prompt}")))
            .header("x-forwarded-for", client_ip)
            .send()
            .await
            .expect("request reaches the server")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
