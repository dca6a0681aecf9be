//! Memory Provider Interface (`spec.md` §4.3).
//!
//! An abstract contract the runtime consumes; concrete backends are
//! external (`spec.md` §1 Out of scope). This module declares the trait
//! plus the one in-process reference implementation the crate ships for
//! its own tests and demos — ambient test tooling, not a production
//! backend (see `SPEC_FULL.md` §4.3).

pub mod in_memory;

pub use in_memory::InMemoryProvider;

use async_trait::async_trait;
use std::sync::Arc;

use crate::model::{MemoryPatch, MemoryQuery, MemoryRecord, NewMemoryRecord};
use crate::plugin::Plugin;
use crate::Result;

/// Required operations a memory backend must implement (`spec.md` §4.3).
///
/// # Thread Safety
///
/// Must be safe for concurrent readers; the engine serializes writes
/// within a single task (one store at task start, one update at task end),
/// but distinct tasks may write distinct ids concurrently
/// (`spec.md` §5 "Shared-resource policy").
#[async_trait]
pub trait MemoryProvider: Send + Sync + 'static {
    /// One-time setup. Failure must fail runtime startup (`spec.md` §4.3).
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Health check run at boot; failure must fail runtime startup.
    async fn check_health(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Each memory provider bundles a plugin exposing `save_memory`,
    /// `remove_memory`, `query_memory` executors usable by the engine
    /// (`spec.md` §4.3).
    fn get_plugin(self: Arc<Self>) -> Arc<dyn Plugin>;

    /// Store a new record; `created_at` is set here and never mutated
    /// again.
    async fn store_memory(&self, record: NewMemoryRecord) -> Result<String>;

    /// Patch `context`/`metadata`/`updated_at` on an existing record.
    async fn update_memory(&self, id: &str, patch: MemoryPatch) -> Result<()>;

    /// Query records, ordered descending by `created_at`.
    async fn query_memory(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>>;
}
