use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use regex::RegexSet;
use relay_config::BlocklistConfig;
use relay_core::RequestContext;
use relay_llm::{CompletionRequest, GatewayError, RequestGuard};

use crate::client_ip::ClientAddr;

/// Blocked client addresses and banned prompt patterns
#[derive(Clone)]
pub struct Blocklist {
    inner: Arc<Inner>,
}

struct Inner {
    ips: HashSet<IpAddr>,
    patterns: RegexSet,
}

impl Blocklist {
    pub fn new(config: &BlocklistConfig) -> anyhow::Result<Self> {
        let patterns = RegexSet::new(&config.patterns).context("invalid blocklist pattern")?;

        Ok(Self {
            inner: Arc::new(Inner {
                ips: config.ips.iter().copied().collect(),
                patterns,
            }),
        })
    }

    pub fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        self.inner.ips.contains(&ip)
    }

    pub fn is_banned_text(&self, text: &str) -> bool {
        self.inner.patterns.is_match(text)
    }
}

impl RequestGuard for Blocklist {
    fn check(&self, request: &CompletionRequest, context: &RequestContext) -> Result<(), GatewayError> {
        if let Some(ip) = context.client_ip
            && self.is_blocked_ip(ip)
        {
            return Err(GatewayError::Blocked("client address is blocked".to_owned()));
        }

        if self.inner.patterns.is_empty() {
            return Ok(());
        }

        if request.messages.iter().any(|m| self.is_banned_text(&m.text_content())) {
            tracing::warn!(client = ?context.client_ip, "request rejected for banned content");
            return Err(GatewayError::Blocked("request contains banned content".to_owned()));
        }

        Ok(())
    }
}

/// Middleware that refuses blocklisted addresses on every route
pub async fn blocklist_middleware(blocklist: Blocklist, request: Request, next: Next) -> Response {
    if let Some(ClientAddr(ip)) = request.extensions().get::<ClientAddr>().copied()
        && blocklist.is_blocked_ip(ip)
    {
        tracing::info!(%ip, "blocked client address");
        return GatewayError::Blocked("client address is blocked".to_owned()).into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use relay_llm::types::{Message, Role};

    use super::*;

    fn blocklist() -> Blocklist {
        Blocklist::new(&BlocklistConfig {
            ips: vec!["203.0.113.7".parse().unwrap()],
            patterns: vec!["(?i)forbidden phrase".to_owned()],
        })
        .unwrap()
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::text(Role::System, "be nice"), Message::text(Role::User, text)],
            ..CompletionRequest::default()
        }
    }

    #[test]
    fn banned_content_is_vetoed() {
        let error = blocklist()
            .check(&request("say the FORBIDDEN phrase"), &RequestContext::empty())
            .unwrap_err();
        assert_eq!(error.kind(), "Blocked");

        assert!(blocklist().check(&request("hello"), &RequestContext::empty()).is_ok());
    }

    #[test]
    fn blocked_addresses_are_vetoed() {
        let context = RequestContext::anonymous("203.0.113.7".parse().unwrap());
        assert!(blocklist().check(&request("hello"), &context).is_err());

        let context = RequestContext::anonymous("203.0.113.8".parse().unwrap());
        assert!(blocklist().check(&request("hello"), &context).is_ok());
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let result = Blocklist::new(&BlocklistConfig {
            ips: Vec::new(),
            patterns: vec!["(unclosed".to_owned()],
        });
        assert!(result.is_err());
    }
}
