//! Runtime configuration for deepseek-gateway.
//!
//! Configuration is loaded from a JSON file (missing fields take their
//! defaults) and then overridden by command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::backend::ndjson::MAX_LINE_BYTES;

/// Command-line arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "deepseek-gateway", about = "HTTP gateway to a local chat model")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address, overrides `server.listen`.
    #[arg(long)]
    pub listen: Option<String>,

    /// Backend implementation to use ("ollama" or "mock").
    #[arg(long)]
    pub backend: Option<String>,

    /// Model name passed to the backend.
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL of the Ollama server.
    #[arg(long)]
    pub ollama_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Chat backend configuration.
    pub backend: BackendConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Upper bound for a blocking completion, in seconds.
    pub request_timeout_secs: u64,

    /// Longest gap between two streamed fragments before the stream is
    /// aborted, in seconds.
    pub stream_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 300,
            stream_idle_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

/// Which backend to construct, plus per-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend name: "ollama" or "mock".
    pub kind: String,

    /// Capacity of the per-request fragment channel.
    pub stream_buffer: usize,

    pub ollama: OllamaConfig,

    pub mock: MockConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "ollama".to_string(),
            stream_buffer: 32,
            ollama: OllamaConfig::default(),
            mock: MockConfig::default(),
        }
    }
}

/// Ollama connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API.
    pub base_url: String,

    /// Model tag to chat with.
    pub model: String,

    /// Sampling temperature; the model's own default when unset.
    pub temperature: Option<f64>,

    /// How long Ollama keeps the model loaded after a request (e.g. "5m").
    pub keep_alive: Option<String>,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Longest streamed reply line accepted before the stream is failed.
    pub max_line_bytes: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "deepseek-r1".to_string(),
            temperature: None,
            keep_alive: None,
            connect_timeout_secs: 10,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

/// In-process mock backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Delay inserted before each streamed fragment, in milliseconds.
    pub fragment_delay_ms: u64,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Reject values that would make every request fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("server.request_timeout_secs must be at least 1");
        }
        if self.server.stream_idle_timeout_secs == 0 {
            anyhow::bail!("server.stream_idle_timeout_secs must be at least 1");
        }
        if self.backend.ollama.max_line_bytes == 0 {
            anyhow::bail!("backend.ollama.max_line_bytes must be at least 1");
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(kind) = &cli.backend {
            self.backend.kind = kind.clone();
        }
        if let Some(model) = &cli.model {
            self.backend.ollama.model = model.clone();
        }
        if let Some(url) = &cli.ollama_url {
            self.backend.ollama.base_url = url.clone();
        }
    }
}
