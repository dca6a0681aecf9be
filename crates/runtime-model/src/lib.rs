//! Shared data model for the agent runtime.
//!
//! Kept in its own crate so that plugin and provider implementations built
//! outside this workspace can depend on the vocabulary (context chains,
//! tasks, memory records, pipelines) without pulling in the scheduler,
//! engine, or HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Milliseconds since the Unix epoch, matching the wire shape in `spec.md` §6.
pub type TimestampMs = i64;

#[must_use]
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

/// Discriminant for [`ContextItem`]. The source models context items as ad
/// hoc structurally-typed objects keyed by a free-form `type` string; this
/// models the closed set of kinds the engine itself produces as a tagged
/// enum while still allowing plugin-defined action names to flow through
/// `ContextItem::type_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextItemKind {
    /// The task's originating trigger; always `contextChain[0]`.
    Trigger,
    /// Output of a successfully executed pipeline step.
    StepResult,
    /// A failed step, a failed pipeline generation, or any recovered error.
    Error,
    /// Raw model text surfaced into the chain (rare; mostly internal to the
    /// typed-object procedure, which does not itself append to the chain).
    GeneratedText,
}

/// One entry in a task's append-only context chain.
///
/// `type_name` carries the free-form discriminant from `spec.md` (e.g. the
/// plugin's action name for step results, or `"error"`); `kind` narrows it
/// to the four shapes the engine itself reasons about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: Uuid,
    pub plugin_id: String,
    pub action: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: ContextItemKind,
    pub content: String,
    pub timestamp: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helpful_instruction: Option<String>,
    /// Extra fields shallow-merged alongside `content` when a step result is
    /// appended (`spec.md` §4.6 step 3: "shallow-merging `data` alongside the
    /// canonical fields").
    #[serde(default, flatten, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    /// Present only on error context items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<PipelineStep>,
}

impl ContextItem {
    /// Build the trigger context item — always `contextChain[0]`.
    #[must_use]
    pub fn trigger(plugin_id: impl Into<String>, action: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            action: action.into(),
            type_name: "trigger".to_string(),
            kind: ContextItemKind::Trigger,
            content: content.into(),
            timestamp: now_ms(),
            helpful_instruction: None,
            metadata: Value::Null,
            error: None,
            failed_step: None,
        }
    }

    /// Build an error context item (`spec.md` §3, §4.6 step 4).
    #[must_use]
    pub fn error(plugin_id: impl Into<String>, action: impl Into<String>, error: impl Into<String>, failed_step: Option<PipelineStep>) -> Self {
        let error = error.into();
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            action: action.into(),
            type_name: "error".to_string(),
            kind: ContextItemKind::Error,
            content: error.clone(),
            timestamp: now_ms(),
            helpful_instruction: None,
            metadata: Value::Null,
            error: Some(error),
            failed_step,
        }
    }

    /// Build a step-result context item from a plugin executor's `data`.
    #[must_use]
    pub fn step_result(plugin_id: impl Into<String>, action: impl Into<String>, data: Value) -> Self {
        let content = serde_json::to_string(&data).unwrap_or_default();
        Self {
            id: Uuid::new_v4(),
            plugin_id: plugin_id.into(),
            action: action.clone().into(),
            type_name: action.into(),
            kind: ContextItemKind::StepResult,
            content,
            timestamp: now_ms(),
            helpful_instruction: None,
            metadata: data,
            error: None,
            failed_step: None,
        }
    }
}

/// The conversational bucket a task belongs to (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Space {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_spaces: Option<RelatedSpaces>,
}

impl Space {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), related_spaces: None }
    }
}

/// Fan-out selector for memory queries spanning a family of spaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RelatedSpaces {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// An optional response handler for request/response-style triggers
/// (`spec.md` §3: "`platformContext` carries an optional response handler").
/// The handler itself is plugin-owned and out of scope here; the runtime
/// only needs to know whether one was installed and, if so, whether it was
/// invoked by the time the pipeline completes (surfaced by the plugin layer,
/// also out of scope per `spec.md` §7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformContext {
    pub responded: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// An in-flight unit of work (`spec.md` §3, §8: `contextChain[0] ==
/// trigger` for its entire lifetime — enforced by construction here, since
/// `trigger` is derived from `context_chain[0]` rather than stored
/// separately and mutable).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: Uuid,
    pub context_chain: Vec<ContextItem>,
    pub space: Space,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_context: Option<PlatformContext>,
}

impl AgentTask {
    /// `spec.md` §4.8: `queueTask` wraps the trigger into a task with
    /// `contextChain = [trigger]` and empty metadata.
    #[must_use]
    pub fn new(trigger: ContextItem, space: Space) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_chain: vec![trigger],
            space,
            metadata: Value::Null,
            platform_context: None,
        }
    }

    /// The task's originating trigger. Invariant (`spec.md` §3, §8):
    /// `contextChain[0] == trigger` at every observable moment.
    #[must_use]
    pub fn trigger(&self) -> &ContextItem {
        &self.context_chain[0]
    }
}

/// A durable memory record (`spec.md` §3). `created_at` is set once at
/// insert and never mutated; `context`/`updated_at` are set once, when the
/// task completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub space_id: String,
    pub trigger: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub created_at: TimestampMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<TimestampMs>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A memory record without its id, as passed to `Memory::store_memory`
/// (`spec.md` §4.3: `storeMemory(memoryWithoutId) → id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemoryRecord {
    pub space_id: String,
    pub trigger: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// A partial update applied by `Memory::update_memory` (`spec.md` §4.3: "at
/// least `context`, `metadata`, `updatedAt` are patchable").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<TimestampMs>,
}

/// Filters for `Memory::query_memory` (`spec.md` §4.3). `space_selector`
/// mutually-excludes `spaceId` and `relatedSpaces`; when both would apply,
/// `related_spaces` wins per spec — represented here as a single enum so
/// the ambiguity cannot be constructed.
#[derive(Debug, Clone)]
pub enum SpaceSelector {
    Space(String),
    Related(RelatedSpaces),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub space: Option<SpaceSelector>,
    pub before: Option<TimestampMs>,
    pub after: Option<TimestampMs>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One `(pluginId, action)` step in a model-generated pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub plugin_id: String,
    pub action: String,
}

/// An ordered sequence of steps produced by a model for one task.
pub type Pipeline = Vec<PipelineStep>;

/// A model-produced instruction on whether/how to replace the remaining
/// pipeline after the current step (`spec.md` §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineModification {
    pub should_modify: bool,
    pub explanation: String,
    #[serde(default)]
    pub modified_steps: Option<Pipeline>,
}

/// The result an executor returns for one step (`spec.md` §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PluginResult {
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    #[must_use]
    pub fn ok_empty() -> Self {
        Self { success: true, data: None, error: None }
    }

    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

/// A capability's declared shape (`spec.md` §3). Schemas are JSON Schema
/// documents represented as plain `Value`s — validated at call time by
/// `jsonschema`, not baked into Rust types, since capabilities are declared
/// dynamically by providers rather than known at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}
