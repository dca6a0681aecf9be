//! agent-runtime — a model-driven agent orchestration substrate.
//!
//! For each incoming trigger, the [`engine`] asks a model (via
//! [`models`]) to generate a pipeline of `(pluginId, action)` steps, then
//! executes them through [`plugin`], appending to the task's context chain,
//! and asks the model after every step whether to modify the remainder. The
//! [`scheduler`] runs many tasks concurrently; [`capability`] declares and
//! translates the typed operations models can provide; [`memory`] persists
//! one record per task; [`templates`] renders the model-facing prompts;
//! [`analytics`] wraps every capability call with telemetry hooks;
//! [`runtime`] composes all of the above behind an HTTP surface.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod analytics;
pub mod capability;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod failsafe;
pub mod memory;
pub mod models;
pub mod plugin;
pub mod runtime;
pub mod scheduler;
pub mod templates;

pub use error::{Error, Result};
pub use runtime_model as model;

/// Configure the global `tracing` subscriber.
///
/// `format` selects `json` (structured, for log aggregators) or anything
/// else for compact text (the default, for local development).
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    let result = if format == Some("json") {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Internal(format!("failed to initialize tracing: {e}")))
}
