mod harness;

use harness::config::{ConfigBuilder, ModelBuilder, UPSTREAM_KEY};
use harness::mock_upstream::{DEFAULT_REPLY, MockUpstream};
use harness::server::TestServer;
use relay_config::WireDialect;
use relay_core::Tier;

async fn openai_setup() -> (MockUpstream, TestServer) {
    let upstream = MockUpstream::start().await.unwrap();
    let config = ConfigBuilder::new()
        .model(
            ModelBuilder::new("openai-fast", WireDialect::OpenaiChat, upstream.openai_endpoint())
                .alias("gpt-5-nano-alias")
                .upstream_model("gpt-5-nano"),
        )
        .default_model("openai-fast")
        .persona("You are a test assistant.")
        .build();

    let server = TestServer::start(config).await.unwrap();
    (upstream, server)
}

#[tokio::test]
async fn alias_resolves_to_canonical_model() {
    let (upstream, server) = openai_setup().await;

    let resp = server
        .openai(serde_json::json!({
            "model": "gpt-5-nano-alias",
            "messages": [{"role": "user", "content": "Hello"}]
        }))
        .await;

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "openai-fast");
    assert_eq!(body["choices"].as_array().unwrap().len(), 1);
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], DEFAULT_REPLY);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body["model"], "gpt-5-nano");
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some(format!("Bearer {UPSTREAM_KEY}").as_str())
    );
}

#[tokio::test]
async fn persona_is_inserted_upstream() {
    let (upstream, server) = openai_setup().await;

    server
        .openai(serde_json::json!({"messages": [{"role": "user", "content": "Hello"}]}))
        .await;

    let body = &upstream.requests()[0].body;
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "You are a test assistant.");
    assert_eq!(body["messages"][1]["content"], "Hello");
}

#[tokio::test]
async fn prompt_path_answers_with_plain_text() {
    let (upstream, server) = openai_setup().await;
    upstream.set_reply("Paris is the capital.");

    let resp = server
        .client()
        .get(server.url("/What%20is%20the%20capital%20of%20France?model=openai-fast&seed=7"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(resp.text().await.unwrap(), "Paris is the capital.");

    let body = &upstream.requests()[0].body;
    assert_eq!(body["seed"], 7);
    assert_eq!(body["messages"][1]["content"], "What is the capital of France");
}

#[tokio::test]
async fn post_root_accepts_the_canonical_body() {
    let (_upstream, server) = openai_setup().await;

    let resp = server
        .client()
        .post(server.url("/"))
        .json(&serde_json::json!({
            "model": "openai-fast",
            "messages": [
                {"role": "system", "content": "Answer tersely."},
                {"role": "user", "content": "Hi"}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), DEFAULT_REPLY);
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    let (upstream, server) = openai_setup().await;

    let resp = server
        .openai(serde_json::json!({
            "model": "no-such-model",
            "messages": [{"role": "user", "content": "Hello"}]
        }))
        .await;

    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "ModelNotFound");
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn empty_conversation_is_rejected() {
    let (upstream, server) = openai_setup().await;

    let resp = server.openai(serde_json::json!({"messages": []})).await;

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "ValidationError");
    assert_eq!(upstream.request_count(), 0);
}

#[tokio::test]
async fn tiered_model_needs_a_token() {
    let upstream = MockUpstream::start().await.unwrap();
    let config = ConfigBuilder::new()
        .model(ModelBuilder::new("premium", WireDialect::OpenaiChat, upstream.openai_endpoint()).tier(Tier::Flower))
        .token("sk-relay-flower", Tier::Flower)
        .build();
    let server = TestServer::start(config).await.unwrap();
    let body = serde_json::json!({"model": "premium", "messages": [{"role": "user", "content": "Hi"}]});

    let anonymous = server.openai(body.clone()).await;
    assert_eq!(anonymous.status(), 403);

    let authorized = server
        .client()
        .post(server.url("/openai"))
        .bearer_auth("sk-relay-flower")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(authorized.status(), 200);
    assert_eq!(upstream.request_count(), 1);
}

#[tokio::test]
async fn identical_deterministic_requests_are_cached() {
    let upstream = MockUpstream::start().await.unwrap();
    let config = ConfigBuilder::new()
        .model(ModelBuilder::new("openai-fast", WireDialect::OpenaiChat, upstream.openai_endpoint()))
        .cache()
        .build();
    let server = TestServer::start(config).await.unwrap();

    let body = serde_json::json!({
        "model": "openai-fast",
        "seed": 42,
        "messages": [{"role": "user", "content": "Hello"}]
    });

    for _ in 0..2 {
        let resp = server.openai(body.clone()).await;
        assert_eq!(resp.status(), 200);
    }

    assert_eq!(upstream.request_count(), 1);

    let events = server.analytics().events();
    assert_eq!(events.len(), 2);
    assert!(!events[0].cached);
    assert!(events[1].cached);
}

#[tokio::test]
async fn health_endpoint() {
    let (_upstream, server) = openai_setup().await;

    let resp = server.client().get(server.url("/health")).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn models_are_listed_without_bindings() {
    let (_upstream, server) = openai_setup().await;

    let resp = server.client().get(server.url("/models")).send().await.unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    let models = body.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["id"], "openai-fast");
    assert_eq!(models[0]["aliases"][0], "gpt-5-nano-alias");
    assert!(models[0].get("binding").is_none());
    assert!(!body.to_string().contains("127.0.0.1"));
}

#[tokio::test]
async fn analytics_record_each_request() {
    let (_upstream, server) = openai_setup().await;

    server
        .openai(serde_json::json!({"messages": [{"role": "user", "content": "Hello"}]}))
        .await;

    let events = server.analytics().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].model, "openai-fast");
    assert_eq!(events[0].outcome, "ok");
    assert!(events[0].private);
}
