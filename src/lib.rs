//! deepseek-gateway: HTTP gateway to a locally hosted chat model.
//!
//! Takes a prompt from the URL path, forwards it to a chat backend
//! (Ollama by default) and returns either the full completion or the
//! completion streamed fragment by fragment.

pub mod backend;
pub mod config;
pub mod server;
