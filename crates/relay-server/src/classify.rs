use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderMap;
use relay_config::AuthConfig;
use relay_core::{Authentication, Tier};
use secrecy::{ExposeSecret, SecretString};
use url::{Origin, Url};

/// Classifies callers by bearer token or allow-listed referrer
#[derive(Clone)]
pub struct Classifier {
    inner: Arc<Inner>,
}

struct Inner {
    tokens: Vec<(SecretString, Tier)>,
    referrers: Vec<Origin>,
}

impl Classifier {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                tokens: config
                    .tokens
                    .iter()
                    .map(|token| (token.token.clone(), token.tier))
                    .collect(),
                referrers: config
                    .allowed_referrers
                    .iter()
                    .filter_map(|allowed| match Url::parse(allowed) {
                        Ok(url) => Some(url.origin()).filter(Origin::is_tuple),
                        Err(e) => {
                            tracing::warn!(referrer = %allowed, error = %e, "ignoring unparseable allowed referrer");
                            None
                        }
                    })
                    .collect(),
            }),
        }
    }

    /// Token from `Authorization: Bearer` or `?token=`, then referrer
    ///
    /// An unknown token is not an error; the caller is simply anonymous.
    pub fn classify(&self, headers: &HeaderMap, query: Option<&str>) -> Authentication {
        let token = bearer(headers).or_else(|| query.and_then(query_token));

        if let Some(token) = token
            && let Some((_, tier)) = self
                .inner
                .tokens
                .iter()
                .find(|(known, _)| known.expose_secret() == token)
        {
            return Authentication::with_tier(*tier);
        }

        let referrer = [http::header::REFERER, http::header::ORIGIN]
            .iter()
            .filter_map(|name| headers.get(name).and_then(|v| v.to_str().ok()))
            .filter_map(|value| Url::parse(value).ok())
            .find(|url| self.inner.referrers.contains(&url.origin()));

        if referrer.is_some() {
            return Authentication::with_tier(Tier::Seed);
        }

        Authentication::default()
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
}

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
}

/// Middleware that stores the caller's [`Authentication`] in extensions
pub async fn classify_middleware(classifier: Classifier, mut request: Request, next: Next) -> Response {
    let authentication = classifier.classify(request.headers(), request.uri().query());

    if authentication.authenticated {
        tracing::debug!(tier = %authentication.tier, "caller classified");
    }

    request.extensions_mut().insert(authentication);
    next.run(request).await
}
