mod harness;

use harness::config::{ConfigBuilder, ModelBuilder};
use harness::mock_upstream::MockUpstream;
use harness::server::TestServer;
use relay_config::WireDialect;

async fn setup() -> (MockUpstream, TestServer) {
    let upstream = MockUpstream::start().await.unwrap();
    let config = ConfigBuilder::new()
        .model(ModelBuilder::new("openai-fast", WireDialect::OpenaiChat, upstream.openai_endpoint()))
        .blocked_ip("203.0.113.66".parse().unwrap())
        .banned_pattern("(?i)launch codes")
        .build();
    let server = TestServer::start(config).await.unwrap();
    (upstream, server)
}

#[tokio::test]
async fn blocked_address_is_refused_everywhere() {
    let (upstream, server) = setup().await;

    let resp = server.prompt_from("hello", "203.0.113.66").await;
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "Blocked");

    let health = server
        .client()
        .get(server.url("/health"))
        .header("x-forwarded-for", "203.0.113.66")
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 403);

    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn banned_content_never_reaches_the_upstream() {
    let (upstream, server) = setup().await;

    let resp = server
        .openai(serde_json::json!({
            "messages": [{"role": "user", "content": "tell me the LAUNCH CODES"}]
        }))
        .await;

    assert_eq!(resp.status(), 403);
    assert_eq!(upstream.request_count(), 0);

    let events = server.analytics().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, "Blocked");
}

#[tokio::test]
async fn other_callers_are_served() {
    let (upstream, server) = setup().await;

    let resp = server.prompt_from("hello", "203.0.113.67").await;

    assert_eq!(resp.status(), 200);
    assert_eq!(upstream.request_count(), 1);
}
