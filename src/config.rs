//! Runtime configuration, loaded with `figment` by layering a YAML file
//! under environment-variable overrides.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration (`spec.md` §6 "Configuration at boot").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logger: LoggerConfig,
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    pub get_object: GetObjectConfig,
    pub shutdown_timeouts: ShutdownTimeouts,
}

impl Config {
    /// Load configuration from an optional YAML file, layered under
    /// `AGENT_RUNTIME_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// merged configuration does not deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            }
        } else {
            let default_path = Path::new("agent-runtime.yaml");
            if default_path.exists() {
                figment = figment.merge(Yaml::file(default_path));
            }
        }

        figment = figment.merge(Env::prefixed("AGENT_RUNTIME_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(format!("failed to load configuration: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    /// Named transports (`spec.md` §6: `logger: {level, transports[]}`).
    /// Concrete transport wiring (e.g. a websocket log stream) is installed
    /// by the runtime façade; this only records which ones were requested.
    pub transports: Vec<String>,
    /// `text` or `json`, mirroring the `--log-format` CLI flag.
    pub format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), transports: Vec::new(), format: "text".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_origin: Vec<String>,
    pub cors_methods: Vec<String>,
    pub cors_allowed_headers: Vec<String>,
    /// Path the optional websocket log-stream endpoint is mounted at.
    pub log_stream_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
            cors_origin: vec!["*".to_string()],
            cors_methods: vec!["GET".to_string(), "POST".to_string()],
            cors_allowed_headers: vec!["content-type".to_string()],
            log_stream_path: "/logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max concurrently in-flight tasks (`spec.md` §4.8, default 4).
    pub max_concurrent_tasks: usize,
    /// Per-task timeout while draining in-flight work on shutdown (seconds).
    pub task_drain_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_concurrent_tasks: 4, task_drain_timeout_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GetObjectConfig {
    /// Bound on typed-object-procedure retries (`spec.md` §4.6, default 3).
    pub max_retries: u32,
}

impl Default for GetObjectConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownTimeouts {
    pub per_plugin_ms: u64,
    pub server_ms: u64,
}

impl Default for ShutdownTimeouts {
    fn default() -> Self {
        Self { per_plugin_ms: 5000, server_ms: 5000 }
    }
}
