//! Runtime Façade (`spec.md` §4.9).
//!
//! Owns boot order, shutdown order, and the few cross-cutting accessors
//! (`executeCapability`, `getObject`, `createEvent`) the rest of the crate
//! is built around: a single façade that owns every long-lived component
//! and exposes a `run` that blocks until shutdown.

pub mod http;
pub mod monitoring;

use std::path::Path;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::memory::MemoryProvider;
use crate::models::ModelManager;
use crate::model::AgentTask;
use crate::plugin::{Plugin, PluginRegistry, PluginRuntimeHandle};
use crate::scheduler::Scheduler;
use crate::templates::TemplateRegistry;
use crate::{Error, Result};

use self::http::{AppState, build_router};
use self::monitoring::MonitoringHub;

/// Default capability ids every deployment is expected to supply a
/// provider for, beyond whatever plugins additionally require
/// (`spec.md` §4.9: "a fixed set plus the union of plugin-declared
/// `requiredCapabilities`"). The typed-object procedure is load-bearing
/// for pipeline generation, so text generation is always required.
const BASE_REQUIRED_CAPABILITIES: &[&str] = &["text-generation"];

/// Everything the runtime owns, assembled once at boot and torn down once
/// at shutdown.
pub struct Runtime {
    config: Config,
    capability_registry: Arc<crate::capability::CapabilityRegistry>,
    model_manager: Arc<ModelManager>,
    memory: Arc<dyn MemoryProvider>,
    templates: Arc<TemplateRegistry>,
    plugins: Arc<PluginRegistry>,
    monitoring: Arc<MonitoringHub>,
    scheduler: Arc<Scheduler>,
    server_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl Runtime {
    /// Boot the runtime: template registry, model providers, memory
    /// provider (+ its bundled plugin), user plugins, capability
    /// verification, then the HTTP server. Fails fast on the first error
    /// (`spec.md` §4.9).
    pub async fn bootstrap(
        config: Config,
        model_providers: Vec<Arc<dyn crate::models::ModelProvider>>,
        memory: Arc<dyn MemoryProvider>,
        user_plugins: Vec<Arc<dyn Plugin>>,
        core_templates_dir: &Path,
    ) -> Result<Arc<Self>> {
        let capability_registry = Arc::new(crate::capability::CapabilityRegistry::new());
        let analytics = Arc::new(crate::analytics::AnalyticsWrapper::new());
        let model_manager = Arc::new(ModelManager::new(capability_registry.clone(), analytics));

        let templates = Arc::new(TemplateRegistry::new());
        templates.register_directory(core_templates_dir, "core")?;

        for provider in model_providers {
            model_manager.register_model(provider).await?;
        }

        memory.init().await.map_err(|e| Error::Memory(format!("memory provider init failed: {e}")))?;
        memory.check_health().await.map_err(|e| Error::Memory(format!("memory provider health check failed: {e}")))?;

        let plugins = Arc::new(PluginRegistry::new());
        plugins.register(memory.clone().get_plugin(), &templates).await?;
        for plugin in user_plugins {
            plugins.register(plugin, &templates).await?;
        }

        let handle = Arc::new(PluginRuntimeHandle {
            model_manager: model_manager.clone(),
            memory: memory.clone(),
            templates: templates.clone(),
        });
        plugins.attach_runtime_to_all(handle).await;

        Self::verify_required_capabilities(&capability_registry, &plugins)?;

        let monitoring = MonitoringHub::new(config.scheduler.max_concurrent_tasks);

        let engine = Arc::new(Engine::new(
            model_manager.clone(),
            plugins.clone(),
            templates.clone(),
            monitoring.clone(),
            config.get_object.max_retries,
            "text-generation",
        ));
        let scheduler = Scheduler::new(engine, memory.clone(), monitoring.clone(), config.scheduler.clone());

        let (shutdown_tx, _) = tokio::sync::watch::channel(false);

        let runtime = Arc::new(Self {
            config,
            capability_registry,
            model_manager,
            memory,
            templates,
            plugins,
            monitoring,
            scheduler,
            server_handle: tokio::sync::Mutex::new(None),
            shutdown_tx,
        });

        runtime.scheduler.clone().spawn_dispatcher();
        runtime.start_http_server().await?;

        Ok(runtime)
    }

    /// Await an interrupt/suspend/terminate signal, then run the shutdown
    /// sequence (`spec.md` §4.9, §6: "Process signals ... trigger one-shot
    /// graceful shutdown then process exit"). Intended to be the last
    /// thing a binary embedding this crate awaits in `main`.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        self.shutdown().await
    }

    fn verify_required_capabilities(
        registry: &crate::capability::CapabilityRegistry,
        plugins: &PluginRegistry,
    ) -> Result<()> {
        for capability in BASE_REQUIRED_CAPABILITIES.iter().copied() {
            if !registry.is_declared(capability) {
                return Err(Error::CapabilityMissing(capability.to_string()));
            }
        }
        for (plugin_id, capability) in plugins.required_capabilities() {
            if !registry.is_declared(&capability) {
                return Err(Error::PluginRequiresUnknownCapability { plugin: plugin_id, capability });
            }
        }
        Ok(())
    }

    async fn start_http_server(self: &Arc<Self>) -> Result<()> {
        let state = AppState { templates: self.templates.clone(), monitoring: self.monitoring.clone() };
        let plugin_routes = self.plugins.collect_http_routes()?;
        let router = build_router(state, plugin_routes, &self.config.server)?;

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "http server listening");

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "http server exited with an error");
            }
        });
        *self.server_handle.lock().await = Some(handle);
        Ok(())
    }

    /// `executeCapability` (`spec.md` §4.9) — delegates straight to the
    /// Model Manager.
    pub async fn execute_capability(
        &self,
        capability_id: &str,
        input: serde_json::Value,
        config: Option<serde_json::Value>,
        model_id: Option<&str>,
    ) -> Result<serde_json::Value> {
        self.model_manager.execute_capability(capability_id, input, config, model_id).await
    }

    /// `createEvent` (`spec.md` §4.9) — enqueue a new task via the
    /// scheduler.
    pub fn create_event(&self, trigger: crate::model::ContextItem, space: crate::model::Space) {
        self.scheduler.queue_task(AgentTask::new(trigger, space));
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<dyn MemoryProvider> {
        &self.memory
    }

    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    #[must_use]
    pub fn capability_registry(&self) -> &Arc<crate::capability::CapabilityRegistry> {
        &self.capability_registry
    }

    /// Shutdown order (`spec.md` §4.9): stop the HTTP server (timeout);
    /// unregister plugins in parallel (timeout each); unregister the
    /// memory provider; unregister model providers; exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown(std::time::Duration::from_secs(self.config.scheduler.task_drain_timeout_secs)).await;

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.server_handle.lock().await.take() {
            let timeout = std::time::Duration::from_millis(self.config.shutdown_timeouts.server_ms);
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("http server did not shut down within its grace window");
            }
        }

        let per_plugin = std::time::Duration::from_millis(self.config.shutdown_timeouts.per_plugin_ms);
        self.plugins.shutdown_all(per_plugin).await;

        if let Err(e) = self.memory.shutdown().await {
            warn!(error = %e, "memory provider shutdown returned an error");
        }

        for provider_id in self.model_manager.provider_ids() {
            if let Err(e) = self.model_manager.unregister_model(&provider_id).await {
                warn!(provider_id, error = %e, "model provider shutdown returned an error");
            }
        }

        Ok(())
    }
}

/// Races interrupt/terminate signals, also covering "suspend" on Unix
/// (`spec.md` §6: "Interrupt, suspend, terminate all trigger one-shot
/// graceful shutdown").
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigtstp =
            signal::unix::signal(signal::unix::SignalKind::from_raw(20)).expect("failed to install SIGTSTP handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigtstp.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
