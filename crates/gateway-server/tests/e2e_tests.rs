//! End-to-end tests for the LLM Chat Gateway.
//!
//! The gateway is built from a YAML config whose providers point at a
//! wiremock upstream, then driven through the HTTP router or a session
//! transport:
//! - buffered completions, caching and reasoning normalization
//! - admission control and capability checks
//! - circuit breaking for buffered and streamed calls
//! - streamed completions over a session

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use gateway_config::{parse_config, ConfigFormat, GatewayConfig};
use gateway_server::session::transport::{self, TransportFrame, TransportReceiver};
use gateway_server::{create_router, AppState, SessionMetadata};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer, extra: &str) -> GatewayConfig {
    let yaml = format!(
        r#"
providers:
  - name: deepseek
    base_url: {uri}/v1
models:
  - provider: deepseek
    model: deepseek-reasoner
    reasoning: true
    max_context: 64000
    prompt_price: 1.0
    completion_price: 2.0
resilience:
  retry:
    max_retries: 0
{extra}
"#,
        uri = server.uri()
    );
    parse_config(&yaml, ConfigFormat::Yaml, Path::new("e2e.yaml")).expect("config parses")
}

fn state(config: GatewayConfig) -> AppState {
    let (state, _events) = AppState::builder().config(config).build().expect("state");
    state
}

fn completion_body() -> Value {
    json!({
        "id": "chatcmpl-1",
        "created": 1_700_000_000,
        "model": "deepseek-reasoner",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "42",
                "reasoning_content": "Six times seven."
            },
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 6, "total_tokens": 16}
    })
}

fn chat(body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/chat/completions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn question(user: Option<&str>) -> Value {
    let mut body = json!({
        "model": "deepseek/deepseek-reasoner",
        "messages": [{"role": "user", "content": "What is six times seven?"}],
        "reasoning": {"enabled": true}
    });
    if let Some(user) = user {
        body["user"] = json!(user);
    }
    body
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn test_buffered_completion_is_normalized_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "deepseek-reasoner"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_router(state(config(&server, "")));

    let response = app.clone().oneshot(chat(&question(None))).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let first = json_body(response).await;
    assert_eq!(first["content"]["text"], "42");
    assert_eq!(first["content"]["finishReason"], "stop");
    assert_eq!(first["reasoning"]["enabled"], true);
    assert_eq!(first["reasoning"]["tokens"][0]["content"], "Six times seven.");
    assert_eq!(first["usage"]["totalTokens"], 16);
    assert!(first["usage"]["cost"].as_f64().is_some());
    assert_eq!(first["metadata"]["provider"], "deepseek");
    assert_eq!(first["metadata"]["cached"], false);

    let response = app.oneshot(chat(&question(None))).await.expect("response");
    let second = json_body(response).await;
    assert_eq!(second["metadata"]["cached"], true);
    assert_eq!(second["content"]["text"], "42");
}

#[tokio::test]
async fn test_user_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let extra = r#"  rate_limits:
    user:
      max: 1
      window: 1m
  cache:
    enabled: false"#;
    let app = create_router(state(config(&server, extra)));

    let response = app.clone().oneshot(chat(&question(Some("u1")))).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(chat(&question(Some("u1")))).await.expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "rate_limited");
}

#[tokio::test]
async fn test_capability_mismatch_never_reaches_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(0)
        .mount(&server)
        .await;

    let app = create_router(state(config(&server, "")));
    let mut body = question(None);
    body["tools"] = json!([{
        "type": "function",
        "function": {"name": "calculator", "parameters": {"type": "object"}}
    }]);

    let response = app.oneshot(chat(&body)).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "capability_mismatch");
}

#[tokio::test]
async fn test_circuit_opens_after_upstream_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let extra = r#"  circuit_breaker:
    failure_threshold: 2
    reset_timeout: 1m"#;
    let app = create_router(state(config(&server, extra)));

    for _ in 0..2 {
        let response = app.clone().oneshot(chat(&question(None))).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    let response = app.clone().oneshot(chat(&question(None))).await.expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "service_unavailable");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/providers")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let providers = json_body(response).await;
    assert_eq!(providers[0]["name"], "deepseek");
    assert_eq!(providers[0]["circuit"]["state"], "OPEN");
}

async fn next_frame(rx: &mut TransportReceiver) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("frame in time")
        .expect("transport open");
    match frame {
        TransportFrame::Text(text) => serde_json::from_str(&text).expect("json frame"),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_streamed_completion_over_session() {
    let server = MockServer::start().await;
    let sse = [
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","reasoning_content":"Multiply."}}]}"#,
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"4"}}]}"#,
        r#"data: {"id":"c1","choices":[{"index":0,"delta":{"content":"2"},"finish_reason":"stop"}]}"#,
        r#"data: {"id":"c1","choices":[],"usage":{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14}}"#,
        "data: [DONE]",
    ]
    .join("\n\n")
        + "\n\n";
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse.into_bytes(), "text/event-stream"))
        .mount(&server)
        .await;

    let (state, events) = AppState::builder()
        .config(config(&server, ""))
        .build()
        .expect("state");
    let shutdown = CancellationToken::new();
    let _tasks = state.spawn_background(events, &shutdown);

    let (tx, mut rx) = transport::channel();
    let session_id = state
        .sessions
        .create_session(tx, SessionMetadata::new(Some("u1".to_string()), None));
    assert_eq!(next_frame(&mut rx).await["type"], "connected");

    let mut request = question(None);
    request["stream"] = json!(true);
    state.sessions.handle_message(
        &session_id,
        &json!({"type": "ai_request", "requestId": "r1", "data": request}).to_string(),
    );
    assert_eq!(next_frame(&mut rx).await["type"], "request_acknowledged");

    let mut chunks = Vec::new();
    let complete = loop {
        let frame = next_frame(&mut rx).await;
        match frame["type"].as_str() {
            Some("stream_chunk") => chunks.push(frame["chunk"].clone()),
            Some("stream_complete") => break frame,
            other => panic!("unexpected message {other:?}: {frame}"),
        }
    };

    assert_eq!(chunks[0]["type"], "reasoning");
    assert_eq!(chunks[0]["data"][0]["content"], "Multiply.");
    assert_eq!(chunks[1], json!({"type": "content", "data": "4"}));
    assert_eq!(chunks[2], json!({"type": "content", "data": "2"}));

    let completion = &complete["completion"];
    assert_eq!(complete["requestId"], "r1");
    assert_eq!(completion["content"]["text"], "42");
    assert_eq!(completion["content"]["finishReason"], "stop");
    assert_eq!(completion["reasoning"]["tokens"][0]["content"], "Multiply.");
    assert_eq!(completion["usage"]["totalTokens"], 14);
    assert_eq!(completion["metadata"]["responseId"], "c1");

    state.sessions.close_session(&session_id, "done");
    assert_eq!(next_frame(&mut rx).await["type"], "session_closed");
    shutdown.cancel();
}

#[tokio::test]
async fn test_streamed_upstream_failures_open_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let extra = r#"  circuit_breaker:
    failure_threshold: 2
    reset_timeout: 1m"#;
    let (state, events) = AppState::builder()
        .config(config(&server, extra))
        .build()
        .expect("state");
    let shutdown = CancellationToken::new();
    let _tasks = state.spawn_background(events, &shutdown);

    let (tx, mut rx) = transport::channel();
    let session_id = state
        .sessions
        .create_session(tx, SessionMetadata::new(Some("u1".to_string()), None));
    assert_eq!(next_frame(&mut rx).await["type"], "connected");

    let mut request = question(None);
    request["stream"] = json!(true);
    let send = |request_id: &str| {
        state.sessions.handle_message(
            &session_id,
            &json!({"type": "ai_request", "requestId": request_id, "data": request}).to_string(),
        );
    };

    for (request_id, kind) in [
        ("r1", "provider_error"),
        ("r2", "provider_error"),
        ("r3", "service_unavailable"),
    ] {
        send(request_id);
        assert_eq!(next_frame(&mut rx).await["type"], "request_acknowledged");
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "error", "{frame}");
        assert_eq!(frame["requestId"], request_id);
        assert_eq!(frame["error"]["kind"], kind);
    }

    let breaker = state.breakers.get_or_create("deepseek");
    assert_eq!(breaker.stats().state, gateway_resilience::CircuitState::Open);

    state.sessions.close_session(&session_id, "done");
    shutdown.cancel();
}
