//! Integration tests for the HTTP gateway against the in-process backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use tower::ServiceExt;

use deepseek_gateway::backend::mock::{Call, CallKind, MockBackend, Reply};
use deepseek_gateway::config::Config;
use deepseek_gateway::server::routes::{build_router, AppState};

fn app_with(backend: Arc<MockBackend>, config: Config) -> Router {
    let state = AppState::new(backend, Arc::new(config)).unwrap();
    build_router(Arc::new(state))
}

fn app(backend: Arc<MockBackend>) -> Router {
    app_with(backend, Config::default())
}

fn hello_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::echo().with_reply("hello", Reply::fragments(["Hi", " there"])))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Decode the JSON string carried by each SSE `data:` line.
fn sse_data(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| serde_json::from_str(d.trim_start()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_completion_returns_backend_text() {
    let backend = hello_backend();
    let response = app(backend.clone()).oneshot(get("/api/v2/hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(body_string(response).await, "Hi there");
    assert_eq!(
        backend.calls(),
        vec![Call {
            kind: CallKind::Complete,
            prompt: "hello".into()
        }]
    );
}

#[tokio::test]
async fn test_prompt_is_percent_decoded() {
    let backend = Arc::new(MockBackend::echo());
    let response = app(backend.clone())
        .oneshot(get("/api/v2/what%20is%20rust%3F"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "what is rust?");
    assert_eq!(backend.calls()[0].prompt, "what is rust?");
}

#[tokio::test]
async fn test_empty_prompt_passes_through() {
    let backend = Arc::new(MockBackend::echo());
    let router = app(backend.clone());

    let response = router.clone().oneshot(get("/api/v2/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "");

    let response = router.oneshot(get("/api/v2/stream/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "");

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.prompt.is_empty()));
}

#[tokio::test]
async fn test_repeated_prompt_calls_backend_each_time() {
    let backend = hello_backend();
    let router = app(backend.clone());

    for _ in 0..2 {
        let response = router.clone().oneshot(get("/api/v2/hello")).await.unwrap();
        assert_eq!(body_string(response).await, "Hi there");
    }

    assert_eq!(backend.calls().len(), 2);
}

#[tokio::test]
async fn test_stream_concatenates_to_full_text() {
    let backend = hello_backend();
    let response = app(backend.clone())
        .oneshot(get("/api/v2/stream/hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_string(response).await, "Hi there");
    assert_eq!(
        backend.calls(),
        vec![Call {
            kind: CallKind::Stream,
            prompt: "hello".into()
        }]
    );
}

#[tokio::test]
async fn test_stream_preserves_fragment_order() {
    let fragments: Vec<String> = (0..50).map(|i| format!("{i},")).collect();
    let backend = Arc::new(
        MockBackend::echo()
            .with_reply("count", Reply::Fragments(fragments.clone()))
            .with_buffer(1),
    );

    let response = app(backend).oneshot(get("/api/v2/stream/count")).await.unwrap();
    assert_eq!(body_string(response).await, fragments.concat());
}

#[tokio::test]
async fn test_stream_as_server_sent_events() {
    let backend = hello_backend();
    let request = Request::builder()
        .uri("/api/v2/stream/hello")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();

    let response = app(backend).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let data = sse_data(&body_string(response).await);
    assert_eq!(data, vec!["Hi", " there"]);
}

#[tokio::test]
async fn test_sse_fragments_are_lossless() {
    let backend = Arc::new(
        MockBackend::echo().with_reply("hello", Reply::fragments(["a\rb", "\r\n", "c\n"])),
    );
    let request = Request::builder()
        .uri("/api/v2/stream/hello")
        .header(header::ACCEPT, "text/event-stream")
        .body(Body::empty())
        .unwrap();

    let response = app(backend).oneshot(request).await.unwrap();
    let data = sse_data(&body_string(response).await);
    assert_eq!(data.concat(), "a\rb\r\nc\n");
}

#[tokio::test]
async fn test_backend_failure_is_structured_error() {
    let backend = Arc::new(
        MockBackend::echo().with_reply("hello", Reply::Fail("connection refused".into())),
    );
    let router = app(backend);

    for uri in ["/api/v2/hello", "/api/v2/stream/hello"] {
        let response = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{uri}");

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["error"]["type"], "backend_unavailable");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }
}

#[tokio::test]
async fn test_mid_stream_failure_aborts_body() {
    let backend = Arc::new(MockBackend::echo().with_reply(
        "hello",
        Reply::FailMidStream {
            fragments: vec!["Hi".into()],
            error: "model crashed".into(),
        },
    ));

    let response = app(backend).oneshot(get("/api/v2/stream/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    assert_eq!(body.next().await.unwrap().unwrap(), "Hi");
    assert!(body.next().await.unwrap().is_err());
}

#[tokio::test]
async fn test_completion_timeout() {
    let backend = Arc::new(MockBackend::echo().with_reply("hello", Reply::Hang(vec![])));
    let mut config = Config::default();
    config.server.request_timeout_secs = 1;

    let response = app_with(backend, config)
        .oneshot(get("/api/v2/hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["error"]["type"], "timeout");
}

#[tokio::test]
async fn test_stream_idle_timeout_aborts_body() {
    let backend = Arc::new(MockBackend::echo().with_reply("hello", Reply::Hang(vec!["Hi".into()])));
    let mut config = Config::default();
    config.server.stream_idle_timeout_secs = 1;

    let response = app_with(backend.clone(), config)
        .oneshot(get("/api/v2/stream/hello"))
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    assert_eq!(body.next().await.unwrap().unwrap(), "Hi");
    assert!(body.next().await.unwrap().is_err());
    drop(body);

    // The relay gave up, so the backend producer must have been released.
    tokio::time::timeout(Duration::from_secs(1), backend.wait_cancelled())
        .await
        .expect("backend stream was not released");
}

#[tokio::test]
async fn test_client_disconnect_cancels_backend() {
    let backend = Arc::new(
        MockBackend::echo().with_reply("hello", Reply::Hang(vec!["Hi".into(), " there".into()])),
    );
    let router = app(backend.clone());

    let response = router
        .clone()
        .oneshot(get("/api/v2/stream/hello"))
        .await
        .unwrap();
    let mut body = response.into_body().into_data_stream();
    assert_eq!(body.next().await.unwrap().unwrap(), "Hi");

    // Client goes away mid-stream.
    drop(body);

    tokio::time::timeout(Duration::from_secs(1), backend.wait_cancelled())
        .await
        .expect("backend stream was not cancelled");
    assert_eq!(backend.cancellations(), 1);

    let metrics = body_string(router.oneshot(get("/metrics")).await.unwrap()).await;
    assert!(metrics.contains("gateway_client_disconnects_total 1"));
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let request = Request::builder()
        .uri("/api/v2/hello")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();

    let response = app(hello_backend()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_health_and_metrics() {
    let router = app(hello_backend());

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "mock");
    assert_eq!(json["model"], "echo");

    router.clone().oneshot(get("/api/v2/hello")).await.unwrap();
    let response = router.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_string(response).await;
    assert!(text.contains("gateway_requests_total"));
    assert!(text.contains("gateway_request_duration_seconds"));
}
