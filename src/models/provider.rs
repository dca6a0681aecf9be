//! The `ModelProvider` trait — one implementation per model backend.
//!
//! A pluggable-backend trait: stable id, an explicit `init` step (a
//! provider may need to establish a client/connection before serving
//! calls), declared capabilities, and `execute` against one of them.

use async_trait::async_trait;
use serde_json::Value;

use crate::model::CapabilityDescriptor;
use crate::Result;

/// Health status for a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderHealth {
    Healthy,
    Degraded(String),
    Unavailable(String),
}

impl ProviderHealth {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// An implementation of one or more capabilities (`spec.md` glossary:
/// "Provider. An implementation of a capability (model provider) or a
/// memory backend").
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be stored in
/// `Arc<dyn ModelProvider>` and shared across concurrently-executing tasks
/// (`spec.md` §5: "Model providers: shared; implementations are expected to
/// be thread/coroutine-safe").
#[async_trait]
pub trait ModelProvider: Send + Sync + 'static {
    /// Stable, unique provider id.
    fn id(&self) -> &str;

    /// One-time setup performed during `ModelManager::register_model`.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Health check performed during registration; failure aborts
    /// registration (`spec.md` §4.2).
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    /// Release any resources held by this provider.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// The capabilities this provider declares.
    fn capabilities(&self) -> Vec<CapabilityDescriptor>;

    /// Look up one declared capability by id.
    fn capability(&self, id: &str) -> Option<CapabilityDescriptor> {
        self.capabilities().into_iter().find(|c| c.id == id)
    }

    /// Execute a capability with already-transformed, already-validated
    /// input/config.
    ///
    /// # Errors
    ///
    /// Returns an error if execution fails; the Model Manager wraps this as
    /// `Error::ModelExecutionError`.
    async fn execute(&self, capability_id: &str, input: Value, config: Option<Value>) -> Result<Value>;

    /// Live health status, distinct from the one-shot `check_health` run at
    /// registration.
    async fn health(&self) -> ProviderHealth {
        ProviderHealth::Healthy
    }
}
