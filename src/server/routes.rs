//! Chat gateway HTTP API.
//!
//! - GET /api/v2/{chat}
//! - GET /api/v2/stream/{chat}
//! - GET /health
//! - GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::SharedBackend;
use crate::config::Config;
use crate::server::error::GatewayError;
use crate::server::metrics::Metrics;
use crate::server::streaming::{fragments_to_body, fragments_to_sse, StreamGuard};

/// Application state shared across handlers.
pub struct AppState {
    pub backend: SharedBackend,
    pub config: Arc<Config>,
    pub metrics: Metrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(backend: SharedBackend, config: Arc<Config>) -> prometheus::Result<Self> {
        Ok(Self {
            backend,
            config,
            metrics: Metrics::new()?,
            start_time: Instant::now(),
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // An empty path segment is the empty prompt.
        .route("/api/v2/", get(get_empty_completion))
        .route("/api/v2/{chat}", get(get_completion))
        .route("/api/v2/stream/", get(stream_empty_completion))
        .route("/api/v2/stream/{chat}", get(stream_completion))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub model: String,
    pub uptime_secs: u64,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn get_completion(
    State(state): State<Arc<AppState>>,
    Path(chat): Path<String>,
) -> Result<String, GatewayError> {
    complete(&state, chat).await
}

async fn get_empty_completion(State(state): State<Arc<AppState>>) -> Result<String, GatewayError> {
    complete(&state, String::new()).await
}

async fn stream_completion(
    State(state): State<Arc<AppState>>,
    Path(chat): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    stream(&state, chat, &headers).await
}

async fn stream_empty_completion(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    stream(&state, String::new(), &headers).await
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.backend.name().to_string(),
        model: state.backend.model().to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(text) => ([(CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => {
            warn!("Failed to render metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ─── Gateway Operations ────────────────────────────────────────────────────

/// Forward `prompt` to the backend and return the whole completion.
async fn complete(state: &AppState, prompt: String) -> Result<String, GatewayError> {
    let request_id = Uuid::new_v4().to_string();
    let timeout = state.config.server.request_timeout();

    info!(
        request_id = request_id,
        backend = state.backend.name(),
        prompt_chars = prompt.chars().count(),
        "Completion request"
    );

    let timer = state
        .metrics
        .request_duration
        .with_label_values(&["complete"])
        .start_timer();

    // On timeout the backend future is dropped along with its connection.
    let result = match tokio::time::timeout(timeout, state.backend.complete(&prompt)).await {
        Ok(result) => result.map_err(GatewayError::from),
        Err(_) => Err(GatewayError::Timeout(timeout.as_secs())),
    };
    timer.observe_duration();

    match result {
        Ok(text) => {
            info!(request_id = request_id, chars = text.chars().count(), "Completion done");
            state.metrics.record("complete", "ok");
            Ok(text)
        }
        Err(e) => {
            warn!(request_id = request_id, "Completion failed: {e}");
            state.metrics.record("complete", e.kind());
            Err(e)
        }
    }
}

/// Open a backend stream for `prompt` and relay it as the response body.
async fn stream(
    state: &AppState,
    prompt: String,
    headers: &HeaderMap,
) -> Result<Response, GatewayError> {
    let request_id = Uuid::new_v4().to_string();
    let sse = wants_event_stream(headers);
    let timeout = state.config.server.request_timeout();

    info!(
        request_id = request_id,
        backend = state.backend.name(),
        prompt_chars = prompt.chars().count(),
        sse,
        "Stream request"
    );

    let opened = match tokio::time::timeout(timeout, state.backend.stream(&prompt)).await {
        Ok(result) => result.map_err(GatewayError::from),
        Err(_) => Err(GatewayError::Timeout(timeout.as_secs())),
    };
    let rx = opened.inspect_err(|e| {
        warn!(request_id = request_id, "Failed to open stream: {e}");
        state.metrics.record("stream", e.kind());
    })?;

    let guard = StreamGuard::new(request_id, state.metrics.clone());
    let idle = state.config.server.stream_idle_timeout();

    if sse {
        Ok(Sse::new(fragments_to_sse(rx, idle, guard))
            .keep_alive(KeepAlive::default())
            .into_response())
    } else {
        let body = Body::from_stream(fragments_to_body(rx, idle, guard));
        Ok(([(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
    }
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}
