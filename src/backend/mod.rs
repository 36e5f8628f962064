//! Chat backends: connections to a language-model inference service.
//!
//! - [`ollama`]: Ollama `/api/chat` client
//! - [`mock`]: in-process echo/scripted backend
//! - [`ndjson`]: newline-delimited JSON framing for streamed replies

pub mod mock;
pub mod ndjson;
pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::BackendConfig;
use mock::MockBackend;
use ollama::OllamaBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed backend reply: {0}")]
    Protocol(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Backend request timed out")]
    Timeout,

    #[error("Invalid backend configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_decode() {
            BackendError::Protocol(e.to_string())
        } else {
            BackendError::Unavailable(e.to_string())
        }
    }
}

/// One item of a streamed completion.
///
/// A stream carries zero or more `Fragment`s followed by exactly one
/// terminal event (`Done` or `Error`), after which the channel closes.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A piece of generated text.
    Fragment(String),
    /// Generation finished normally.
    Done { fragments: usize },
    /// Generation failed after the stream was opened.
    Error(String),
}

/// A configured connection to a chat model.
///
/// Streams are cancelled by dropping the returned receiver: the producer
/// stops at its next send (or sooner, if it is waiting on the model) and
/// releases its upstream connection.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Short backend name, e.g. "ollama".
    fn name(&self) -> &str;

    /// Model the backend talks to.
    fn model(&self) -> &str;

    /// Send `prompt` and wait for the full completion.
    async fn complete(&self, prompt: &str) -> Result<String, BackendError>;

    /// Send `prompt` and receive the completion as it is generated.
    async fn stream(&self, prompt: &str) -> Result<mpsc::Receiver<ChatEvent>, BackendError>;
}

pub type SharedBackend = Arc<dyn ChatBackend>;

/// Construct the backend named by `config.kind`.
pub fn from_config(config: &BackendConfig) -> Result<SharedBackend, BackendError> {
    let backend: SharedBackend = match config.kind.as_str() {
        "ollama" => Arc::new(OllamaBackend::new(&config.ollama, config.stream_buffer)?),
        "mock" => Arc::new(
            MockBackend::echo()
                .with_fragment_delay(Duration::from_millis(config.mock.fragment_delay_ms))
                .with_buffer(config.stream_buffer),
        ),
        other => {
            return Err(BackendError::InvalidConfig(format!(
                "unknown backend kind `{other}` (expected \"ollama\" or \"mock\")"
            )))
        }
    };

    info!(backend = backend.name(), model = backend.model(), "Chat backend ready");
    Ok(backend)
}
