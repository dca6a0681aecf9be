//! Plugin Registry (`spec.md` §4.5).
//!
//! A plugin bundles triggers (event sources) and executors (named actions)
//! and declares the capabilities it requires. Modeled as a trait —
//! `Arc<dyn Plugin>` — the same shape `ModelProvider`/`MemoryProvider` use:
//! a trait/interface with required and optional methods for each provider
//! kind.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use axum::routing::MethodRouter;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::warn;

use crate::memory::MemoryProvider;
use crate::model::{AgentTask, PluginResult};
use crate::models::ModelManager;
use crate::runtime::http::AppState;
use crate::templates::TemplateRegistry;
use crate::{Error, Result};

/// One HTTP route a plugin contributes to the shared server instance
/// (`spec.md` §6: "Plugin-contributed routes: each trigger may register
/// `POST <path>` ... with a handler and optional middleware").
pub struct HttpRoute {
    pub method: Method,
    pub path: String,
    pub router: MethodRouter<AppState>,
}

/// Executor metadata surfaced to pipeline generation
/// (`spec.md` §4.6: `availablePlugins: [{..., executors:[{name,description}]}]`).
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
    pub name: String,
    pub description: String,
}

/// The capability surface passed into each plugin after registration,
/// breaking the plugin↔runtime reference cycle (`spec.md` §9: "the plugin
/// stores only the capability surface it needs (executeCapability,
/// getObject, memory, templates, server) rather than the whole runtime").
pub struct PluginRuntimeHandle {
    pub model_manager: Arc<ModelManager>,
    pub memory: Arc<dyn MemoryProvider>,
    pub templates: Arc<TemplateRegistry>,
}

/// A plugin: event sources (triggers) and named actions (executors) that
/// the engine invokes while executing a model-generated pipeline.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Stable, unique plugin id; also the namespace its prompt directory
    /// (if any) is registered under.
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str {
        ""
    }

    /// Capability ids this plugin requires to be declared by some
    /// registered model provider (`spec.md` §3 invariant, checked at
    /// runtime bootstrap per §4.9/§4.5).
    fn required_capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Named actions this plugin exposes to the pipeline.
    fn executors(&self) -> Vec<ExecutorSpec>;

    /// Directory of prompt templates to install under this plugin's
    /// namespace, if any.
    fn prompts_dir(&self) -> Option<&Path> {
        None
    }

    /// HTTP routes this plugin contributes to the shared server instance,
    /// if any. The registry enforces `(method, path)` uniqueness across
    /// all plugins; a collision aborts startup (`spec.md` §6, §4.9).
    fn http_routes(&self) -> Vec<HttpRoute> {
        Vec::new()
    }

    /// Run once at registration (`spec.md` §4.5).
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// The one-shot setter that hands this plugin its capability surface,
    /// called once after all plugins have been registered.
    async fn attach_runtime(&self, _handle: Arc<PluginRuntimeHandle>) {}

    /// Run the named executor against a task, returning a `PluginResult`
    /// (`spec.md` §3: `{success, data?, error?}`).
    async fn execute(&self, executor_name: &str, task: &AgentTask) -> Result<PluginResult>;

    /// Run once at unregistration, bounded by a per-plugin timeout
    /// (`spec.md` §4.5).
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A flat registry of plugins, preserving registration order for
/// deterministic reverse-order shutdown (`spec.md` §3 lifecycles).
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, Arc<dyn Plugin>>,
    order: RwLock<Vec<String>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `init`, install `prompts_dir` into `templates` under the plugin
    /// id as namespace, then insert (`spec.md` §4.5).
    pub async fn register(&self, plugin: Arc<dyn Plugin>, templates: &TemplateRegistry) -> Result<()> {
        plugin.init().await?;

        if let Some(dir) = plugin.prompts_dir() {
            templates.register_directory(dir, plugin.id())?;
        }

        let id = plugin.id().to_string();
        self.plugins.insert(id.clone(), plugin);
        self.order.write().push(id);
        Ok(())
    }

    /// Run `shutdown` under `per_plugin_timeout`; on timeout, log and move
    /// on without propagating (`spec.md` §4.5: "shutdown is abandoned but
    /// runtime continues shutting down remaining components").
    pub async fn unregister(&self, id: &str, per_plugin_timeout: Duration) {
        let Some((_, plugin)) = self.plugins.remove(id) else { return };
        self.order.write().retain(|p| p != id);

        match tokio::time::timeout(per_plugin_timeout, plugin.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plugin = id, error = %e, "plugin shutdown returned an error"),
            Err(_) => warn!(plugin = id, "plugin shutdown timed out; abandoning wait"),
        }
    }

    /// Unregister every plugin in reverse registration order, each bounded
    /// by its own timeout, run concurrently (`spec.md` §4.9: "unregister
    /// plugins in parallel, each with a timeout").
    pub async fn shutdown_all(&self, per_plugin_timeout: Duration) {
        let ids: Vec<String> = self.order.read().iter().rev().cloned().collect();
        let futures = ids.into_iter().map(|id| self.unregister(&id, per_plugin_timeout));
        futures::future::join_all(futures).await;
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(id).map(|p| p.clone())
    }

    /// All plugins in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn Plugin>> {
        self.order.read().iter().filter_map(|id| self.get(id)).collect()
    }

    /// Hand every registered plugin its runtime capability surface
    /// (`spec.md` §9's one-shot setter).
    pub async fn attach_runtime_to_all(&self, handle: Arc<PluginRuntimeHandle>) {
        for plugin in self.list() {
            plugin.attach_runtime(handle.clone()).await;
        }
    }

    /// Union of every plugin's `required_capabilities`
    /// (`spec.md` §4.9: "the union of plugin-declared `requiredCapabilities`").
    #[must_use]
    pub fn required_capabilities(&self) -> Vec<(String, String)> {
        self.list()
            .iter()
            .flat_map(|p| p.required_capabilities().into_iter().map(|c| (p.id().to_string(), c)))
            .collect()
    }

    /// `availablePlugins` context for pipeline generation (`spec.md` §4.6).
    #[must_use]
    pub fn available_plugins_context(&self) -> Value {
        Value::Array(
            self.list()
                .iter()
                .map(|p| {
                    json!({
                        "id": p.id(),
                        "name": p.name(),
                        "description": p.description(),
                        "executors": p.executors().iter().map(|e| json!({
                            "name": e.name,
                            "description": e.description,
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect(),
        )
    }

    /// Gather every plugin's HTTP routes, failing fast on a `(method,
    /// path)` collision (`spec.md` §6: "the registry enforces uniqueness
    /// of `(method, path)`. Failure to register aborts startup.").
    pub fn collect_http_routes(&self) -> Result<Vec<HttpRoute>> {
        let mut seen = std::collections::HashSet::new();
        let mut routes = Vec::new();
        for plugin in self.list() {
            for route in plugin.http_routes() {
                let key = (route.method.clone(), route.path.clone());
                if !seen.insert(key) {
                    return Err(Error::RouteConflict { method: route.method.to_string(), path: route.path.clone() });
                }
                routes.push(route);
            }
        }
        Ok(routes)
    }

    /// Resolve `(plugin_id, action)` to a concrete executor invocation,
    /// returning a not-found error if either the plugin or the named
    /// executor is missing (`spec.md` §4.6 step 1).
    pub async fn invoke(&self, plugin_id: &str, action: &str, task: &AgentTask) -> Result<PluginResult> {
        let plugin = self.get(plugin_id).ok_or_else(|| Error::Internal(format!("plugin not found: {plugin_id}")))?;
        if !plugin.executors().iter().any(|e| e.name == action) {
            return Err(Error::Internal(format!("executor not found: {plugin_id}/{action}")));
        }
        plugin.execute(action, task).await
    }
}
