//! Streaming responses for token-by-token completions.
//!
//! Converts a channel of [`ChatEvent`]s into either a raw chunked
//! `text/plain` body or an SSE stream. Dropping the returned stream (the
//! client went away) drops the backend receiver, which cancels generation.

use std::time::{Duration, Instant};

use axum::response::sse::Event;
use bytes::Bytes;
use futures::stream::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::backend::ChatEvent;
use crate::server::metrics::Metrics;

/// Why a stream stopped before the backend reported completion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamInterrupted {
    #[error("backend failed mid-stream: {0}")]
    Backend(String),

    #[error("no fragment from backend for {0} seconds")]
    IdleTimeout(u64),

    #[error("backend closed the stream without finishing")]
    Closed,
}

/// Per-stream bookkeeping that notices a client disconnect on drop.
pub struct StreamGuard {
    request_id: String,
    metrics: Metrics,
    started: Instant,
    fragments: usize,
    finished: bool,
}

impl StreamGuard {
    pub fn new(request_id: String, metrics: Metrics) -> Self {
        Self {
            request_id,
            metrics,
            started: Instant::now(),
            fragments: 0,
            finished: false,
        }
    }

    fn fragment(&mut self) {
        self.fragments += 1;
        self.metrics.fragments.inc();
    }

    fn finish(&mut self, outcome: &str) {
        self.finished = true;
        self.metrics.record("stream", outcome);
        self.metrics
            .request_duration
            .with_label_values(&["stream"])
            .observe(self.started.elapsed().as_secs_f64());
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if !self.finished {
            info!(
                request_id = self.request_id,
                fragments = self.fragments,
                "Client disconnected mid-stream, cancelling backend"
            );
            self.metrics.client_disconnects.inc();
            self.finish("client_disconnect");
        }
    }
}

/// Relay fragments from `rx` in arrival order.
///
/// Ends cleanly on `Done`. Any other ending yields one
/// [`StreamInterrupted`] and stops.
pub fn relay_fragments(
    mut rx: mpsc::Receiver<ChatEvent>,
    idle_timeout: Duration,
    mut guard: StreamGuard,
) -> impl Stream<Item = Result<String, StreamInterrupted>> {
    async_stream::stream! {
        loop {
            let interrupted = match tokio::time::timeout(idle_timeout, rx.recv()).await {
                Ok(Some(ChatEvent::Fragment(text))) => {
                    guard.fragment();
                    yield Ok(text);
                    continue;
                }
                Ok(Some(ChatEvent::Done { .. })) => {
                    info!(
                        request_id = guard.request_id,
                        fragments = guard.fragments,
                        elapsed_ms = guard.started.elapsed().as_millis() as u64,
                        "Stream complete"
                    );
                    guard.finish("ok");
                    break;
                }
                Ok(Some(ChatEvent::Error(message))) => StreamInterrupted::Backend(message),
                Ok(None) => StreamInterrupted::Closed,
                Err(_) => StreamInterrupted::IdleTimeout(idle_timeout.as_secs()),
            };

            warn!(
                request_id = guard.request_id,
                fragments = guard.fragments,
                "Stream interrupted: {interrupted}"
            );
            guard.finish("interrupted");
            yield Err(interrupted);
            break;
        }
    }
}

/// Raw body chunks. An interruption surfaces as a body error, which aborts
/// the chunked response without its terminating chunk.
pub fn fragments_to_body(
    rx: mpsc::Receiver<ChatEvent>,
    idle_timeout: Duration,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Bytes, StreamInterrupted>> {
    relay_fragments(rx, idle_timeout, guard).map(|item| item.map(Bytes::from))
}

/// One SSE event per fragment, its `data:` a JSON string so that any
/// character (including `\r`, which SSE cannot carry raw) survives. An
/// interruption becomes a final `event: error` with a JSON string reason.
pub fn fragments_to_sse(
    rx: mpsc::Receiver<ChatEvent>,
    idle_timeout: Duration,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    relay_fragments(rx, idle_timeout, guard).map(|item| match item {
        Ok(text) => Event::default().json_data(text),
        Err(e) => Event::default().event("error").json_data(e.to_string()),
    })
}
