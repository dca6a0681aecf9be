//! An in-process, `DashMap`-backed reference `MemoryProvider`.
//!
//! Concrete memory backends are out of scope for this crate
//! (`spec.md` §1); this implementation exists for the crate's own
//! integration tests and as a runnable demo, not a real storage engine.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;

use crate::model::{AgentTask, MemoryPatch, MemoryQuery, MemoryRecord, NewMemoryRecord, PluginResult, SpaceSelector, now_ms};
use crate::plugin::{ExecutorSpec, Plugin};
use crate::{Error, Result};

use super::MemoryProvider;

#[derive(Default)]
pub struct InMemoryProvider {
    records: DashMap<String, MemoryRecord>,
    /// Insertion order, so `query_memory` can produce a stable order before
    /// sorting descending by `created_at`.
    order: RwLock<Vec<String>>,
}

impl InMemoryProvider {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl MemoryProvider for InMemoryProvider {
    fn get_plugin(self: Arc<Self>) -> Arc<dyn Plugin> {
        Arc::new(MemoryPlugin { provider: self })
    }

    async fn store_memory(&self, record: NewMemoryRecord) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let stored = MemoryRecord {
            id: id.clone(),
            space_id: record.space_id,
            trigger: record.trigger,
            context: record.context,
            created_at: now_ms(),
            updated_at: None,
            metadata: record.metadata,
        };
        self.records.insert(id.clone(), stored);
        self.order.write().push(id.clone());
        Ok(id)
    }

    async fn update_memory(&self, id: &str, patch: MemoryPatch) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::Memory(format!("no such memory record: {id}")))?;
        if let Some(context) = patch.context {
            entry.context = Some(context);
        }
        if let Some(metadata) = patch.metadata {
            entry.metadata = metadata;
        }
        entry.updated_at = Some(patch.updated_at.unwrap_or_else(now_ms));
        Ok(())
    }

    async fn query_memory(&self, query: MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let mut matches: Vec<MemoryRecord> = self
            .order
            .read()
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .filter(|record| match &query.space {
                Some(SpaceSelector::Related(related)) => {
                    related.prefix.as_deref().is_some_and(|p| record.space_id.starts_with(p))
                        || related
                            .pattern
                            .as_deref()
                            .is_some_and(|pat| glob_match(pat, &record.space_id))
                }
                Some(SpaceSelector::Space(space_id)) => &record.space_id == space_id,
                None => true,
            })
            .filter(|record| query.before.is_none_or(|b| record.created_at < b))
            .filter(|record| query.after.is_none_or(|a| record.created_at > a))
            .collect();

        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0);
        let matches = if offset >= matches.len() { Vec::new() } else { matches.split_off(offset) };

        Ok(match query.limit {
            Some(limit) => matches.into_iter().take(limit).collect(),
            None => matches,
        })
    }
}

/// Minimal glob matcher supporting a single `*` wildcard, enough for
/// `relatedSpaces.pattern` (`spec.md` §3); a real deployment would plug in a
/// full backend-specific query layer instead.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => candidate.starts_with(prefix) && candidate.ends_with(suffix),
        None => pattern == candidate,
    }
}

/// The plugin every memory provider bundles (`spec.md` §4.3: "`getPlugin()`
/// ... bundles a plugin exposing executor actions `save_memory`,
/// `remove_memory`, `query_memory` usable by the engine"). This is distinct
/// from the engine's own direct `store_memory`/`update_memory` calls at
/// task start/end — it lets *other* plugins' pipeline steps read and write
/// memory in-band. `remove_memory` is not one of the trait's core
/// operations (`spec.md` §4.3 lists only store/update/query); it is
/// implemented here as a soft delete via `update_memory`, recorded as a
/// design decision in `DESIGN.md`.
struct MemoryPlugin {
    provider: Arc<InMemoryProvider>,
}

#[async_trait]
impl Plugin for MemoryPlugin {
    fn id(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Built-in memory read/write executors"
    }

    fn executors(&self) -> Vec<ExecutorSpec> {
        vec![
            ExecutorSpec { name: "save_memory".to_string(), description: "Store a memory record".to_string() },
            ExecutorSpec { name: "remove_memory".to_string(), description: "Soft-delete a memory record".to_string() },
            ExecutorSpec { name: "query_memory".to_string(), description: "Query memory records".to_string() },
        ]
    }

    async fn execute(&self, executor_name: &str, task: &AgentTask) -> Result<PluginResult> {
        let params = task.context_chain.last().map(|item| item.metadata.clone()).unwrap_or(json!({}));

        match executor_name {
            "save_memory" => {
                let record = NewMemoryRecord {
                    space_id: params.get("space_id").and_then(|v| v.as_str()).unwrap_or(&task.space.id).to_string(),
                    trigger: params.get("trigger").cloned().unwrap_or(json!(task.trigger())),
                    context: params.get("context").cloned(),
                    metadata: params.get("metadata").cloned().unwrap_or(json!({})),
                };
                match self.provider.store_memory(record).await {
                    Ok(id) => Ok(PluginResult::ok(json!({"id": id}))),
                    Err(e) => Ok(PluginResult::fail(e.to_string())),
                }
            }
            "remove_memory" => {
                let Some(id) = params.get("id").and_then(|v| v.as_str()) else {
                    return Ok(PluginResult::fail("remove_memory requires an `id` field"));
                };
                let patch = crate::model::MemoryPatch { metadata: Some(json!({"deleted": true})), ..Default::default() };
                match self.provider.update_memory(id, patch).await {
                    Ok(()) => Ok(PluginResult::ok_empty()),
                    Err(e) => Ok(PluginResult::fail(e.to_string())),
                }
            }
            "query_memory" => {
                // `relatedSpaces` wins when both are given (spec.md:98).
                let prefix = params.get("prefix").and_then(|v| v.as_str()).map(str::to_string);
                let pattern = params.get("pattern").and_then(|v| v.as_str()).map(str::to_string);
                let space = if prefix.is_some() || pattern.is_some() {
                    Some(SpaceSelector::Related(crate::model::RelatedSpaces { prefix, pattern }))
                } else if let Some(space_id) = params.get("space_id").and_then(|v| v.as_str()) {
                    Some(SpaceSelector::Space(space_id.to_string()))
                } else {
                    None
                };
                let query = MemoryQuery {
                    space,
                    before: params.get("before").and_then(serde_json::Value::as_i64),
                    after: params.get("after").and_then(serde_json::Value::as_i64),
                    limit: params.get("limit").and_then(serde_json::Value::as_u64).map(|v| v as usize),
                    offset: params.get("offset").and_then(serde_json::Value::as_u64).map(|v| v as usize),
                };
                match self.provider.query_memory(query).await {
                    Ok(records) => Ok(PluginResult::ok(json!({"records": records}))),
                    Err(e) => Ok(PluginResult::fail(e.to_string())),
                }
            }
            other => Err(Error::Internal(format!("unknown memory executor: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContextItem, Space};

    fn task_with_params(params: serde_json::Value) -> AgentTask {
        let mut trigger = ContextItem::trigger("test", "recv", "hi");
        trigger.metadata = params;
        AgentTask::new(trigger, Space::new("space-a"))
    }

    #[tokio::test]
    async fn store_then_query_round_trips() {
        let provider = InMemoryProvider::new();
        let id = provider
            .store_memory(NewMemoryRecord { space_id: "space-a".into(), trigger: json!({"x": 1}), context: None, metadata: json!({}) })
            .await
            .unwrap();

        let found = provider
            .query_memory(MemoryQuery { space: Some(SpaceSelector::Space("space-a".into())), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert!(found[0].updated_at.is_none());
    }

    #[tokio::test]
    async fn update_sets_context_and_updated_at_once() {
        let provider = InMemoryProvider::new();
        let id = provider
            .store_memory(NewMemoryRecord { space_id: "space-a".into(), trigger: json!({}), context: None, metadata: json!({}) })
            .await
            .unwrap();
        provider
            .update_memory(&id, MemoryPatch { context: Some(json!([{"a": 1}])), updated_at: Some(1000), ..Default::default() })
            .await
            .unwrap();

        let found = provider.query_memory(MemoryQuery::default()).await.unwrap();
        assert_eq!(found[0].context, Some(json!([{"a": 1}])));
        assert_eq!(found[0].updated_at, Some(1000));
    }

    #[tokio::test]
    async fn query_orders_descending_by_created_at() {
        let provider = InMemoryProvider::new();
        provider.store_memory(NewMemoryRecord { space_id: "s".into(), trigger: json!({}), context: None, metadata: json!({}) }).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = provider.store_memory(NewMemoryRecord { space_id: "s".into(), trigger: json!({}), context: None, metadata: json!({}) }).await.unwrap();

        let found = provider.query_memory(MemoryQuery::default()).await.unwrap();
        assert_eq!(found[0].id, second);
    }

    #[tokio::test]
    async fn bundled_plugin_save_and_query_executors() {
        let provider = InMemoryProvider::new();
        let plugin = provider.clone().get_plugin();

        let save_task = task_with_params(json!({"space_id": "space-b", "trigger": {"x": 1}}));
        let result = plugin.execute("save_memory", &save_task).await.unwrap();
        assert!(result.success);
        let id = result.data.unwrap()["id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());

        let query_task = task_with_params(json!({"space_id": "space-b"}));
        let result = plugin.execute("query_memory", &query_task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data.unwrap()["records"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_prefers_related_spaces_over_space_id_when_both_given() {
        let provider = InMemoryProvider::new();
        let plugin = provider.clone().get_plugin();

        provider
            .store_memory(NewMemoryRecord { space_id: "team-a/room-1".into(), trigger: json!({}), context: None, metadata: json!({}) })
            .await
            .unwrap();

        // `space_id` names a space with no records; `prefix` matches the one
        // stored above. Per spec.md:98, relatedSpaces must win.
        let query_task = task_with_params(json!({"space_id": "no-such-space", "prefix": "team-a/"}));
        let result = plugin.execute("query_memory", &query_task).await.unwrap();
        assert!(result.success);
        let records = result.data.unwrap()["records"].as_array().unwrap().len();
        assert_eq!(records, 1, "relatedSpaces (prefix) must take priority over space_id when both are supplied");
    }
}
