//! In-process chat backend.
//!
//! Echoes the prompt back word by word unless a scripted reply is
//! registered for it. Every call is recorded, and streams that end because
//! the receiver was dropped are counted, so tests can observe cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use crate::backend::{BackendError, ChatBackend, ChatEvent};

/// Scripted behaviour for one prompt.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Produce these fragments, then finish.
    Fragments(Vec<String>),
    /// Fail before any output.
    Fail(String),
    /// Produce these fragments, then report an error.
    FailMidStream { fragments: Vec<String>, error: String },
    /// Produce these fragments, then never finish.
    Hang(Vec<String>),
}

impl Reply {
    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Fragments(fragments.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Complete,
    Stream,
}

/// A recorded backend invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub prompt: String,
}

pub struct MockBackend {
    replies: HashMap<String, Reply>,
    fragment_delay: Duration,
    buffer: usize,
    calls: Mutex<Vec<Call>>,
    cancellations: Arc<AtomicUsize>,
    cancelled: Arc<Notify>,
}

impl MockBackend {
    /// A backend that echoes every prompt.
    pub fn echo() -> Self {
        Self {
            replies: HashMap::new(),
            fragment_delay: Duration::ZERO,
            buffer: 32,
            calls: Mutex::new(Vec::new()),
            cancellations: Arc::new(AtomicUsize::new(0)),
            cancelled: Arc::new(Notify::new()),
        }
    }

    /// Script the reply for `prompt`.
    pub fn with_reply(mut self, prompt: impl Into<String>, reply: Reply) -> Self {
        self.replies.insert(prompt.into(), reply);
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock_calls().clone()
    }

    /// Number of streams stopped because their receiver was dropped.
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Wait until a stream is stopped by its receiver going away.
    pub async fn wait_cancelled(&self) {
        self.cancelled.notified().await;
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<Call>> {
        // A poisoned log is still a valid log.
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, kind: CallKind, prompt: &str) {
        self.lock_calls().push(Call {
            kind,
            prompt: prompt.to_string(),
        });
    }

    fn reply_for(&self, prompt: &str) -> Reply {
        self.replies.get(prompt).cloned().unwrap_or_else(|| {
            Reply::Fragments(prompt.split_inclusive(' ').map(str::to_string).collect())
        })
    }
}

/// How a scripted stream ends after its fragments.
enum Tail {
    Done,
    Error(String),
    Hang,
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        self.record(CallKind::Complete, prompt);

        match self.reply_for(prompt) {
            Reply::Fragments(fragments) => Ok(fragments.concat()),
            Reply::Fail(message) | Reply::FailMidStream { error: message, .. } => {
                Err(BackendError::Unavailable(message))
            }
            Reply::Hang(_) => std::future::pending::<Result<String, BackendError>>().await,
        }
    }

    async fn stream(&self, prompt: &str) -> Result<mpsc::Receiver<ChatEvent>, BackendError> {
        self.record(CallKind::Stream, prompt);

        let (fragments, tail) = match self.reply_for(prompt) {
            Reply::Fragments(fragments) => (fragments, Tail::Done),
            Reply::Fail(message) => return Err(BackendError::Unavailable(message)),
            Reply::FailMidStream { fragments, error } => (fragments, Tail::Error(error)),
            Reply::Hang(fragments) => (fragments, Tail::Hang),
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let delay = self.fragment_delay;
        let cancellations = self.cancellations.clone();
        let cancelled = self.cancelled.clone();
        let on_cancel = move |sent: usize| {
            debug!(sent, "Mock stream cancelled by receiver");
            cancellations.fetch_add(1, Ordering::SeqCst);
            cancelled.notify_one();
        };

        tokio::spawn(async move {
            let mut sent = 0;
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = tx.closed() => return on_cancel(sent),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                if tx.send(ChatEvent::Fragment(fragment)).await.is_err() {
                    return on_cancel(sent);
                }
                sent += 1;
            }

            match tail {
                Tail::Done => {
                    let _ = tx.send(ChatEvent::Done { fragments: sent }).await;
                }
                Tail::Error(message) => {
                    let _ = tx.send(ChatEvent::Error(message)).await;
                }
                Tail::Hang => {
                    tx.closed().await;
                    on_cancel(sent);
                }
            }
        });

        Ok(rx)
    }
}
