use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;

use super::{PreparedRequest, Transform};
use crate::error::GatewayError;
use crate::registry::ServiceDefinition;
use crate::types::{Content, ContentPart};

/// Largest remote image that is embedded
const MAX_ASSET_BYTES: usize = 10 * 1024 * 1024;

/// Replace remote image URLs with embedded `data:` URIs
///
/// Only runs for bindings whose upstream cannot dereference URLs.
pub struct InlineAssets {
    http: reqwest::Client,
    max_bytes: usize,
}

impl InlineAssets {
    pub const fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_bytes: MAX_ASSET_BYTES,
        }
    }

    /// Override the largest image that is embedded
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn fetch(&self, url: &str) -> Result<String, GatewayError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| GatewayError::Validation(format!("could not fetch image '{url}': {e}")))?;

        let too_large = || GatewayError::Validation(format!("image '{url}' exceeds {} bytes", self.max_bytes));

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let mime = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|mime| mime.starts_with("image/"))
            .unwrap_or("image/png")
            .to_owned();

        // Bodies without a length are bounded while reading
        let mut bytes = Vec::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| GatewayError::Validation(format!("could not read image '{url}': {e}")))?;

            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }

            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(%url, %mime, size = bytes.len(), "inlined remote image");

        Ok(format!("data:{mime};base64,{}", STANDARD.encode(&bytes)))
    }
}

#[async_trait]
impl Transform for InlineAssets {
    fn name(&self) -> &'static str {
        "inline-assets"
    }

    async fn apply(&self, mut request: PreparedRequest, service: &ServiceDefinition) -> Result<PreparedRequest, GatewayError> {
        if !service.binding.inline_assets || !service.capabilities.vision {
            return Ok(request);
        }

        for message in &mut request.messages {
            let Some(Content::Parts(ref mut parts)) = message.content else {
                continue;
            };

            for part in parts {
                if let ContentPart::ImageUrl { ref mut image_url } = *part
                    && (image_url.url.starts_with("http://") || image_url.url.starts_with("https://"))
                {
                    image_url.url = self.fetch(&image_url.url).await?;
                }
            }
        }

        Ok(request)
    }
}
