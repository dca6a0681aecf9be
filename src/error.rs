//! Error types for the agent runtime.

use std::io;

use thiserror::Error;

/// Result type alias for the agent runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Agent runtime errors. Variants map 1:1 onto the error kinds in `spec.md`
/// §7; kinds that are purely informational at the call site (e.g.
/// `transform-rejected`) are represented as logged events rather than
/// returned errors — see `capability::transform`.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// No registered provider supplies a required capability (fatal at boot).
    #[error("capability missing: {0}")]
    CapabilityMissing(String),

    /// At call time, no default provider and no explicit model id.
    #[error("no provider registered for capability: {0}")]
    NoProviderForCapability(String),

    /// An explicit model id was given but is not registered.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Alias resolution succeeded but the provider lacks the canonical capability.
    #[error("provider {provider} does not declare capability {capability}")]
    CapabilityMissingOnProvider { provider: String, capability: String },

    /// Schema validation failure on the (transformed) input.
    #[error("invalid input for capability {capability}: {reason}")]
    InvalidInput { capability: String, reason: String },

    /// Schema validation failure on the (transformed) config.
    #[error("invalid config for capability {capability}: {reason}")]
    InvalidConfig { capability: String, reason: String },

    /// A provider threw while executing a capability.
    #[error("model execution error for capability {capability}: {reason}")]
    ModelExecutionError { capability: String, reason: String },

    /// Model output did not parse or did not validate after `maxRetries`.
    #[error("typed-object parse failure after {attempts} attempts: {last_error}")]
    TypedObjectParseFailure { attempts: u32, last_error: String },

    /// Rendering an unregistered template id.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A plugin did not shut down within its grace window.
    #[error("plugin shutdown timed out: {0}")]
    PluginShutdownTimeout(String),

    /// The HTTP server did not shut down within its grace window.
    #[error("server shutdown timed out")]
    ServerShutdownTimeout,

    /// A memory-provider operation failed.
    #[error("memory provider error: {0}")]
    Memory(String),

    /// An HTTP route collided with one already registered.
    #[error("route already registered: {method} {path}")]
    RouteConflict { method: String, path: String },

    /// A required capability was declared by a plugin that was never satisfied.
    #[error("plugin {plugin} requires unregistered capability {capability}")]
    PluginRequiresUnknownCapability { plugin: String, capability: String },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime is shutting down.
    #[error("runtime shutdown")]
    Shutdown,

    /// Catch-all for conditions with no dedicated variant.
    #[error("internal error: {0}")]
    Internal(String),
}
