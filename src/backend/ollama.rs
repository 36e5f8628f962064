//! Ollama chat backend.
//!
//! Talks to `POST {base_url}/api/chat`. Blocking calls send `stream: false`
//! and read one JSON object; streaming calls read newline-delimited JSON
//! objects until one carries `done: true`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::ndjson::LineDecoder;
use crate::backend::{BackendError, ChatBackend, ChatEvent};
use crate::config::OllamaConfig;

/// Ollama `/api/chat` client.
pub struct OllamaBackend {
    client: reqwest::Client,
    chat_url: Url,
    model: String,
    options: Option<ChatOptions>,
    keep_alive: Option<String>,
    buffer: usize,
    max_line_bytes: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a ChatOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    temperature: f64,
}

/// A reply object; streamed replies use the same shape per line.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl ChatResponse {
    fn decode(bytes: &[u8]) -> Result<Self, BackendError> {
        let reply: ChatResponse =
            serde_json::from_slice(bytes).map_err(|e| BackendError::Protocol(e.to_string()))?;
        match reply.error {
            Some(error) => Err(BackendError::Model(error)),
            None => Ok(reply),
        }
    }

    fn into_content(self) -> String {
        self.message.map(|m| m.content).unwrap_or_default()
    }
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig, buffer: usize) -> Result<Self, BackendError> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            BackendError::InvalidConfig(format!("ollama base_url `{}`: {e}", config.base_url))
        })?;
        // Keep any path prefix on the base URL (e.g. behind a reverse proxy).
        let chat_url = Url::parse(&format!("{}/api/chat", base.as_str().trim_end_matches('/')))
            .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BackendError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            chat_url,
            model: config.model.clone(),
            options: config.temperature.map(|temperature| ChatOptions { temperature }),
            keep_alive: config.keep_alive.clone(),
            buffer: buffer.max(1),
            max_line_bytes: config.max_line_bytes,
        })
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, BackendError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            options: self.options.as_ref(),
            keep_alive: self.keep_alive.as_deref(),
        };

        debug!(url = %self.chat_url, model = self.model, stream, "Calling Ollama");

        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|e| {
                warn!(status = status.as_u16(), "Failed to read Ollama error body: {e}");
                String::new()
            });
            let message = serde_json::from_str::<ChatResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or(body);
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let response = self.send(prompt, false).await?;
        let body = response.bytes().await?;
        Ok(ChatResponse::decode(&body)?.into_content())
    }

    async fn stream(&self, prompt: &str) -> Result<mpsc::Receiver<ChatEvent>, BackendError> {
        let response = self.send(prompt, true).await?;
        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(forward_stream(response, tx, self.max_line_bytes));
        Ok(rx)
    }
}

/// Relay NDJSON reply objects from `response` into `tx` until the model is
/// done, the upstream fails, or the receiver goes away.
///
/// `response` is owned here, so every return drops the upstream connection.
async fn forward_stream(
    response: reqwest::Response,
    tx: mpsc::Sender<ChatEvent>,
    max_line_bytes: usize,
) {
    let mut body = response.bytes_stream();
    let mut decoder = LineDecoder::with_limit(max_line_bytes);
    let mut fragments = 0;

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                debug!(fragments, "Receiver dropped, closing Ollama stream");
                return;
            }
            chunk = body.next() => chunk,
        };

        let eof = chunk.is_none();
        let lines = match chunk {
            Some(Ok(bytes)) => match decoder.push(&bytes) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(fragments, "Ollama stream failed: {e}");
                    let _ = tx
                        .send(ChatEvent::Error(BackendError::Protocol(e.to_string()).to_string()))
                        .await;
                    return;
                }
            },
            Some(Err(e)) => {
                warn!(fragments, "Ollama stream failed: {e}");
                let _ = tx.send(ChatEvent::Error(BackendError::from(e).to_string())).await;
                return;
            }
            None => decoder.finish().into_iter().collect(),
        };

        for line in lines {
            let reply = match ChatResponse::decode(&line) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(fragments, "Bad line in Ollama stream: {e}");
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    return;
                }
            };

            let done = reply.done;
            let content = reply.into_content();
            if !content.is_empty() {
                fragments += 1;
                if tx.send(ChatEvent::Fragment(content)).await.is_err() {
                    debug!(fragments, "Receiver dropped, closing Ollama stream");
                    return;
                }
            }

            if done {
                let _ = tx.send(ChatEvent::Done { fragments }).await;
                return;
            }
        }

        if eof {
            let _ = tx
                .send(ChatEvent::Error(
                    "Ollama closed the stream before it was done".to_string(),
                ))
                .await;
            return;
        }
    }
}
