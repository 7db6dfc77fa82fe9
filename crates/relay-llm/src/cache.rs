//! In-memory exact-match response cache
//!
//! Non-streaming completions are keyed by a SHA-256 hash of the canonical
//! request (model id, conversation, options). Only deterministic requests
//! are stored.

use std::sync::Arc;

use mini_moka::sync::Cache;
use relay_config::CacheConfig;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::types::{CompletionResponse, Message, RequestOptions};

/// Process-lifetime completion cache
#[derive(Clone)]
pub struct ResponseCache {
    entries: Option<Cache<String, Arc<CompletionResponse>>>,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = config.enabled.then(|| {
            Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(config.ttl)
                .build()
        });

        Self { entries }
    }

    /// A cache that never stores anything
    pub const fn disabled() -> Self {
        Self { entries: None }
    }

    pub fn get(&self, key: &str) -> Option<Arc<CompletionResponse>> {
        let hit = self.entries.as_ref()?.get(&key.to_owned());
        tracing::debug!(cache_key = key, hit = hit.is_some(), "response cache lookup");
        hit
    }

    pub fn put(&self, key: String, response: CompletionResponse) {
        if let Some(ref entries) = self.entries {
            entries.insert(key, Arc::new(response));
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }
}

#[derive(Serialize)]
struct CacheKey<'a> {
    model: &'a str,
    messages: &'a [Message],
    options: &'a RequestOptions,
}

/// Cache key of a request, or `None` when it must not be cached
pub fn compute_cache_key(model: &str, messages: &[Message], options: &RequestOptions) -> Option<String> {
    if !is_cacheable(options) {
        return None;
    }

    let json = serde_json::to_string(&CacheKey {
        model,
        messages,
        options,
    })
    .ok()?;

    Some(format!("{:x}", Sha256::digest(json.as_bytes())))
}

/// Only deterministic, non-streaming requests are cached
pub fn is_cacheable(options: &RequestOptions) -> bool {
    !options.stream && options.is_deterministic()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::Role;

    fn conversation() -> Vec<Message> {
        vec![Message::text(Role::User, "hi")]
    }

    #[test]
    fn key_is_stable_and_model_specific() {
        let options = RequestOptions::default();

        let first = compute_cache_key("openai-fast", &conversation(), &options).unwrap();
        let second = compute_cache_key("openai-fast", &conversation(), &options).unwrap();
        let other = compute_cache_key("claude", &conversation(), &options).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn sampling_and_streaming_requests_are_not_cached() {
        let warm = RequestOptions {
            temperature: Some(0.8),
            ..RequestOptions::default()
        };
        assert!(compute_cache_key("m", &conversation(), &warm).is_none());

        let seeded = RequestOptions { seed: Some(7), ..warm };
        assert!(compute_cache_key("m", &conversation(), &seeded).is_some());

        let streaming = RequestOptions {
            stream: true,
            ..RequestOptions::default()
        };
        assert!(!is_cacheable(&streaming));
        assert!(compute_cache_key("m", &conversation(), &streaming).is_none());
    }

    #[test]
    fn stores_and_returns_completions() {
        let cache = ResponseCache::new(&CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(60),
            capacity: 10,
        });
        let key = compute_cache_key("m", &conversation(), &RequestOptions::default()).unwrap();

        assert!(cache.get(&key).is_none());
        cache.put(key.clone(), CompletionResponse::synthetic("m", "cached"));
        assert_eq!(cache.get(&key).unwrap().text(), "cached");

        let disabled = ResponseCache::disabled();
        disabled.put(key.clone(), CompletionResponse::synthetic("m", "cached"));
        assert!(disabled.get(&key).is_none());
    }
}
