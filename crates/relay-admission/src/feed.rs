use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use futures_util::Stream;
use relay_telemetry::KeyValue;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One completed response as seen by feed subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    /// Canonical model id
    pub model: String,
    /// Last user message of the conversation
    pub prompt: String,
    pub response: String,
    pub private: bool,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    /// Client address; only delivered to authenticated subscribers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_ip: Option<String>,
}

impl FeedEntry {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, response: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        Self {
            model: model.into(),
            prompt: prompt.into(),
            response: response.into(),
            private: false,
            timestamp,
            origin_ip: None,
        }
    }
}

/// Item delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedEvent {
    /// `n` entries were dropped because the subscriber fell behind
    Gap { dropped: u64 },
    #[serde(untagged)]
    Entry(FeedEntry),
}

/// Which map a subscriber lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Non-private entries without origin addresses
    Public,
    /// Every entry, with origin addresses
    Authenticated,
}

struct Subscriber {
    sender: mpsc::Sender<FeedEvent>,
    /// Entries lost since the last successful delivery
    dropped: AtomicU64,
}

enum Delivery {
    Sent,
    Dropped,
    Closed,
}

impl Subscriber {
    fn deliver(&self, event: FeedEvent) -> Delivery {
        let pending = self.dropped.load(Ordering::Relaxed);

        if pending > 0 {
            match self.sender.try_send(FeedEvent::Gap { dropped: pending }) {
                Ok(()) => {
                    self.dropped.fetch_sub(pending, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return Delivery::Dropped;
                }
                Err(TrySendError::Closed(_)) => return Delivery::Closed,
            }
        }

        match self.sender.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Fan-out of completed responses to long-lived subscribers
///
/// Each subscriber has a bounded buffer. Publishing never waits: a full
/// buffer loses the entry and the subscriber later receives a
/// [`FeedEvent::Gap`] carrying the number of entries it missed.
#[derive(Clone)]
pub struct FeedBroadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    public: DashMap<u64, Subscriber>,
    authenticated: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Inner {
    const fn map(&self, audience: Audience) -> &DashMap<u64, Subscriber> {
        match audience {
            Audience::Public => &self.public,
            Audience::Authenticated => &self.authenticated,
        }
    }
}

impl FeedBroadcaster {
    /// Create a broadcaster whose subscribers buffer up to `buffer` events
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                public: DashMap::new(),
                authenticated: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Register a subscriber; it is removed when the subscription drops
    pub fn subscribe(&self, audience: Audience) -> FeedSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.buffer);

        self.inner.map(audience).insert(
            id,
            Subscriber {
                sender,
                dropped: AtomicU64::new(0),
            },
        );

        tracing::debug!(id, ?audience, "feed subscriber connected");

        FeedSubscription {
            id,
            audience,
            receiver,
            broadcaster: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver a completed response to every eligible subscriber
    ///
    /// Private entries only reach authenticated subscribers. The origin
    /// address is stripped from what public subscribers see.
    pub fn publish(&self, entry: &FeedEntry) {
        if !entry.private {
            let public = FeedEntry {
                origin_ip: None,
                ..entry.clone()
            };
            self.fan_out(Audience::Public, &FeedEvent::Entry(public));
        }

        self.fan_out(Audience::Authenticated, &FeedEvent::Entry(entry.clone()));
    }

    fn fan_out(&self, audience: Audience, event: &FeedEvent) {
        let map = self.inner.map(audience);
        let mut closed = Vec::new();
        let mut dropped = 0_u64;

        for subscriber in map.iter() {
            match subscriber.deliver(event.clone()) {
                Delivery::Sent => {}
                Delivery::Dropped => {
                    dropped += 1;
                    tracing::warn!(
                        id = *subscriber.key(),
                        ?audience,
                        pending = subscriber.dropped.load(Ordering::Relaxed),
                        "feed subscriber is lagging, entry dropped"
                    );
                }
                Delivery::Closed => closed.push(*subscriber.key()),
            }
        }

        for id in closed {
            map.remove(&id);
        }

        if dropped > 0 {
            let audience = match audience {
                Audience::Public => "public",
                Audience::Authenticated => "authenticated",
            };
            relay_telemetry::metrics()
                .feed_dropped
                .add(dropped, &[KeyValue::new("audience", audience)]);
        }
    }

    /// Number of connected subscribers of an audience
    pub fn subscriber_count(&self, audience: Audience) -> usize {
        self.inner.map(audience).len()
    }
}

/// A connected subscriber's receiving end
pub struct FeedSubscription {
    id: u64,
    audience: Audience,
    receiver: mpsc::Receiver<FeedEvent>,
    broadcaster: Weak<Inner>,
}

impl FeedSubscription {
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.receiver.recv().await
    }
}

impl Stream for FeedSubscription {
    type Item = FeedEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broadcaster.upgrade() {
            inner.map(self.audience).remove(&self.id);
            tracing::debug!(id = self.id, audience = ?self.audience, "feed subscriber disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(response: &str, private: bool) -> FeedEntry {
        FeedEntry {
            private,
            origin_ip: Some("203.0.113.7".to_owned()),
            ..FeedEntry::new("openai-fast", "hi", response)
        }
    }

    fn drain(subscription: &mut FeedSubscription) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = subscription.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn private_entries_reach_only_authenticated_subscribers() {
        let feed = FeedBroadcaster::new(8);
        let mut public = feed.subscribe(Audience::Public);
        let mut authenticated = feed.subscribe(Audience::Authenticated);

        feed.publish(&entry("secret", true));
        feed.publish(&entry("hello", false));

        let public_events = drain(&mut public);
        assert_eq!(public_events.len(), 1);
        let FeedEvent::Entry(ref seen) = public_events[0] else {
            panic!("expected an entry");
        };
        assert_eq!(seen.response, "hello");
        assert_eq!(seen.origin_ip, None);

        let authenticated_events = drain(&mut authenticated);
        assert_eq!(authenticated_events.len(), 2);
        for event in authenticated_events {
            let FeedEvent::Entry(seen) = event else {
                panic!("expected an entry");
            };
            assert_eq!(seen.origin_ip.as_deref(), Some("203.0.113.7"));
        }
    }

    #[test]
    fn delivery_order_matches_publish_order() {
        let feed = FeedBroadcaster::new(8);
        let mut public = feed.subscribe(Audience::Public);

        for n in 0..5 {
            feed.publish(&entry(&n.to_string(), false));
        }

        let responses: Vec<_> = drain(&mut public)
            .into_iter()
            .filter_map(|event| match event {
                FeedEvent::Entry(entry) => Some(entry.response),
                FeedEvent::Gap { .. } => None,
            })
            .collect();
        assert_eq!(responses, ["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn slow_subscriber_gets_gap_marker_without_blocking_others() {
        let feed = FeedBroadcaster::new(2);
        let mut slow = feed.subscribe(Audience::Public);
        let mut fast = feed.subscribe(Audience::Public);

        feed.publish(&entry("a", false));
        feed.publish(&entry("b", false));
        drain(&mut fast);
        feed.publish(&entry("c", false));
        feed.publish(&entry("d", false));
        assert_eq!(drain(&mut fast).len(), 2);

        assert_eq!(drain(&mut slow).len(), 2);
        feed.publish(&entry("e", false));

        let events = drain(&mut slow);
        assert_eq!(events[0], FeedEvent::Gap { dropped: 2 });
        assert!(matches!(events[1], FeedEvent::Entry(ref e) if e.response == "e"));
    }

    #[test]
    fn dropped_subscription_is_removed() {
        let feed = FeedBroadcaster::new(4);
        let first = feed.subscribe(Audience::Public);
        let second = feed.subscribe(Audience::Authenticated);
        assert!(second.id() > first.id());
        assert_eq!(feed.subscriber_count(Audience::Public), 1);

        drop(first);
        drop(second);
        assert_eq!(feed.subscriber_count(Audience::Public), 0);
        assert_eq!(feed.subscriber_count(Audience::Authenticated), 0);
    }

    #[test]
    fn events_serialize_to_wire_shape() {
        let gap = serde_json::to_string(&FeedEvent::Gap { dropped: 3 }).unwrap();
        assert_eq!(gap, r#"{"gap":{"dropped":3}}"#);

        let mut public = entry("hello", false);
        public.origin_ip = None;
        let value = serde_json::to_value(FeedEvent::Entry(public)).unwrap();
        assert_eq!(value["response"], "hello");
        assert!(value.get("origin_ip").is_none());
    }
}
