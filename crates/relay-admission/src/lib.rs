//! Per-client admission queue and completion feed

#![allow(clippy::must_use_candidate)]

mod error;
mod feed;
mod queue;
#[cfg(feature = "http")]
mod router;

pub use error::FeedError;
pub use feed::{Audience, FeedBroadcaster, FeedEntry, FeedEvent, FeedSubscription};
pub use queue::{AdmissionPermit, AdmissionQueue, ip_key};
#[cfg(feature = "http")]
pub use router::feed_router;
