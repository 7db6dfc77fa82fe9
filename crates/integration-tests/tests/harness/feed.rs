//! Subscriber for the server's event-stream endpoints

use std::pin::Pin;
use std::time::Duration;

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Reads `data:` payloads from an open event stream
pub struct EventReader {
    stream: ByteStream,
    buffer: String,
}

impl EventReader {
    /// Open `url`; the subscription is live once this returns
    pub async fn connect(client: &reqwest::Client, url: &str) -> anyhow::Result<Self> {
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(Self::from_response(response))
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    /// Next `data:` payload, or `None` when the stream ends or stays quiet
    /// for `wait`
    pub async fn next_data(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.read_data()).await.ok().flatten()
    }

    /// Next payload parsed as JSON
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        let data = self.next_data(Duration::from_secs(5)).await?;
        serde_json::from_str(&data).ok()
    }

    /// Every remaining payload until the stream closes
    pub async fn collect(mut self) -> Vec<String> {
        let mut all = Vec::new();
        while let Some(data) = self.next_data(Duration::from_secs(5)).await {
            all.push(data);
        }
        all
    }

    async fn read_data(&mut self) -> Option<String> {
        loop {
            while let Some(end) = self.buffer.find('\n') {
                let line: String = self.buffer.drain(..=end).collect();
                if let Some(data) = line.trim_end().strip_prefix("data:") {
                    return Some(data.trim_start().to_owned());
                }
            }

            let chunk = self.stream.next().await?.ok()?;
            self.buffer.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}
