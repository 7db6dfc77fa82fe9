//! Feed endpoints: `GET /feed` and `GET /feed/private`

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing};
use futures_util::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::FeedError;
use crate::feed::{Audience, FeedBroadcaster, FeedSubscription};

#[derive(Clone)]
struct FeedState {
    broadcaster: FeedBroadcaster,
    password: Option<Arc<SecretString>>,
}

#[derive(Debug, Deserialize)]
struct PrivateFeedQuery {
    password: Option<String>,
}

/// Routes serving the public and the password-protected feed
pub fn feed_router(broadcaster: FeedBroadcaster, password: Option<SecretString>) -> Router {
    Router::new()
        .route("/feed", routing::get(public_feed))
        .route("/feed/private", routing::get(private_feed))
        .with_state(FeedState {
            broadcaster,
            password: password.map(Arc::new),
        })
}

async fn public_feed(State(state): State<FeedState>) -> Response {
    event_stream(state.broadcaster.subscribe(Audience::Public)).into_response()
}

async fn private_feed(State(state): State<FeedState>, Query(query): Query<PrivateFeedQuery>) -> Response {
    let authorized = match (state.password.as_deref(), query.password.as_deref()) {
        (Some(expected), Some(given)) => expected.expose_secret() == given,
        _ => false,
    };

    if !authorized {
        tracing::debug!("rejected private feed subscription");
        return FeedError::Unauthorized.into_response();
    }

    event_stream(state.broadcaster.subscribe(Audience::Authenticated)).into_response()
}

fn event_stream(subscription: FeedSubscription) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = subscription.map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
