//! The Engine — pipeline generation, step execution, and pipeline
//! modification (`spec.md` §4.6).
//!
//! Contract: given a task, mutate its context chain to reflect every step
//! outcome; never throw; recover from any step failure by appending an
//! error context item and continuing. Step execution resolves a
//! `(pluginId, action)` pair, invokes it, and translates the result into a
//! context-chain entry; the typed-object procedure (see [`typed_object`])
//! wraps model calls in a validate-then-retry-with-logging loop.

pub mod typed_object;

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::model::{AgentTask, ContextItem, Pipeline, PipelineModification, PipelineStep};
use crate::models::ModelManager;
use crate::plugin::PluginRegistry;
use crate::runtime::monitoring::MonitoringHub;
use crate::templates::TemplateRegistry;
use crate::{Error, Result};

/// Low, fixed temperature for pipeline generation/modification calls
/// (`spec.md` §4.6: "Pipeline generation and modification use a low,
/// configurable temperature"). Exposed as a constant rather than a config
/// field since no `[MODULE]` names it as a top-level option; a deployment
/// that needs it tunable can substitute its own value via `Engine::new`.
const GENERATION_TEMPERATURE: f64 = 0.2;

fn pipeline_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["plugin_id", "action"],
            "properties": {
                "plugin_id": {"type": "string"},
                "action": {"type": "string"},
            },
        },
    })
}

fn modification_schema() -> Value {
    json!({
        "type": "object",
        "required": ["should_modify", "explanation"],
        "properties": {
            "should_modify": {"type": "boolean"},
            "explanation": {"type": "string"},
            "modified_steps": {
                "type": ["array", "null"],
                "items": {
                    "type": "object",
                    "required": ["plugin_id", "action"],
                    "properties": {
                        "plugin_id": {"type": "string"},
                        "action": {"type": "string"},
                    },
                },
            },
        },
    })
}

pub struct Engine {
    model_manager: Arc<ModelManager>,
    plugins: Arc<PluginRegistry>,
    templates: Arc<TemplateRegistry>,
    monitoring: Arc<MonitoringHub>,
    max_retries: u32,
    text_generation_capability: String,
}

impl Engine {
    #[must_use]
    pub fn new(
        model_manager: Arc<ModelManager>,
        plugins: Arc<PluginRegistry>,
        templates: Arc<TemplateRegistry>,
        monitoring: Arc<MonitoringHub>,
        max_retries: u32,
        text_generation_capability: impl Into<String>,
    ) -> Self {
        Self {
            model_manager,
            plugins,
            templates,
            monitoring,
            max_retries,
            text_generation_capability: text_generation_capability.into(),
        }
    }

    /// Run the engine against one task end to end. Never returns an error:
    /// every failure mode is absorbed into an error context item, per
    /// `spec.md` §4.6's contract.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub async fn run(&self, task: &mut AgentTask) {
        self.monitoring.update("engine:start", |s| {
            s.current_context = task.context_chain.last().and_then(|c| serde_json::to_value(c).ok());
        });

        let mut pipeline = self.generate_pipeline(task).await;
        self.monitoring.update("engine:pipeline-generated", |s| s.pipeline = Some(pipeline.clone()));

        let mut index = 0;
        while index < pipeline.len() {
            let step = pipeline[index].clone();
            self.monitoring.update("engine:step-start", |s| {
                s.current_step_index = Some(index);
                s.current_step = Some(step.clone());
            });

            self.execute_step(task, &step).await;

            self.monitoring.update("engine:step-complete", |s| {
                s.current_context = task.context_chain.last().and_then(|c| serde_json::to_value(c).ok());
            });

            if let Some(modification) = self.modify_pipeline(task, &step, &pipeline, index).await {
                if modification.should_modify {
                    if let Some(modified_steps) = modification.modified_steps {
                        pipeline = pipeline[..=index].iter().cloned().chain(modified_steps).collect();
                        self.monitoring.update("engine:pipeline-modified", |s| {
                            s.modified_steps = Some(pipeline.clone());
                            s.explanation = Some(modification.explanation.clone());
                        });
                    }
                }
            }

            index += 1;
        }

        self.monitoring.update("engine:complete", |s| {
            s.current_step = None;
            s.current_step_index = None;
            s.pipeline = None;
        });
    }

    /// Build the generation context, render the generation template, and
    /// ask for a structured `Pipeline`. Any failure along the way yields
    /// the empty pipeline plus an error context item
    /// (`spec.md` §4.6, §7 *pipeline-generation-failure*).
    async fn generate_pipeline(&self, task: &mut AgentTask) -> Pipeline {
        match self.try_generate_pipeline(task).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(error = %e, "pipeline generation failed; continuing with an empty pipeline");
                task.context_chain.push(ContextItem::error("engine", "generate_pipeline", e.to_string(), None));
                Vec::new()
            }
        }
    }

    async fn try_generate_pipeline(&self, task: &AgentTask) -> Result<Pipeline> {
        let context = json!({
            "context_chain": task.context_chain,
            "available_plugins": self.plugins.available_plugins_context(),
            "current_context": task.context_chain.last(),
        });
        let prompt = self.templates.render("core/pipeline/generate", &context)?;
        let value = self.get_object(&pipeline_schema(), &prompt).await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    /// Execute one step: resolve plugin+executor, invoke, and translate
    /// the outcome into a context-chain append (`spec.md` §4.6 steps 1-4).
    async fn execute_step(&self, task: &mut AgentTask, step: &PipelineStep) {
        let outcome = self.plugins.invoke(&step.plugin_id, &step.action, task).await;
        match outcome {
            Ok(result) if result.success => {
                if let Some(data) = result.data {
                    task.context_chain.push(ContextItem::step_result(step.plugin_id.clone(), step.action.clone(), data));
                }
            }
            Ok(result) => {
                task.context_chain.push(ContextItem::error(
                    step.plugin_id.clone(),
                    step.action.clone(),
                    result.error.unwrap_or_else(|| "executor reported failure with no error message".to_string()),
                    Some(step.clone()),
                ));
            }
            Err(e) => {
                task.context_chain.push(ContextItem::error(step.plugin_id.clone(), step.action.clone(), e.to_string(), Some(step.clone())));
            }
        }
    }

    /// Build the modification context, render the modification template,
    /// and request a structured `PipelineModification`. Any failure here
    /// is treated as "do not modify" rather than propagated — the spec
    /// names modification as best-effort, not a required step
    /// (`spec.md` §4.6).
    async fn modify_pipeline(
        &self,
        task: &AgentTask,
        current_step: &PipelineStep,
        pipeline: &Pipeline,
        index: usize,
    ) -> Option<PipelineModification> {
        let remaining: Pipeline = pipeline.get(index + 1..).map(<[_]>::to_vec).unwrap_or_default();
        let context = json!({
            "context_chain": task.context_chain,
            "current_step": current_step,
            "remaining_pipeline": remaining,
            "available_plugins": self.plugins.available_plugins_context(),
        });

        let prompt = match self.templates.render("core/pipeline/modify", &context) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "pipeline modification template failed to render; skipping modification");
                return None;
            }
        };

        match self.get_object(&modification_schema(), &prompt).await {
            Ok(value) => serde_json::from_value(value).ok(),
            Err(e) => {
                warn!(error = %e, "pipeline modification request failed; keeping current pipeline");
                None
            }
        }
    }

    /// The typed-object procedure (`spec.md` §4.6): render the "object"
    /// template, call text generation, extract and validate the result
    /// against `schema`, retrying via the "retry" template up to
    /// `max_retries` times.
    pub async fn get_object(&self, schema: &Value, prompt: &str) -> Result<Value> {
        let object_context = json!({"schema": schema, "prompt": prompt});
        let mut rendered = self.templates.render("core/object", &object_context)?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let text = self.generate_text(&rendered).await?;

            match typed_object::parse_and_validate(&text, schema) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempts = attempt, "typed object parsed after retries");
                    }
                    return Ok(value);
                }
                Err(last_error) => {
                    if attempt >= self.max_retries.max(1) {
                        return Err(Error::TypedObjectParseFailure { attempts: attempt, last_error });
                    }
                    let retry_context = json!({
                        "schema": schema,
                        "prompt": prompt,
                        "last_response": text,
                        "error_message": last_error,
                    });
                    rendered = self.templates.render("core/retry", &retry_context)?;
                }
            }
        }
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let output = self
            .model_manager
            .execute_capability(
                &self.text_generation_capability,
                json!({"prompt": prompt}),
                Some(json!({"temperature": GENERATION_TEMPERATURE})),
                None,
            )
            .await?;
        Ok(output.get("text").and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| output.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::analytics::AnalyticsWrapper;
    use crate::capability::CapabilityRegistry;
    use crate::model::{CapabilityDescriptor, PluginResult};
    use crate::models::ModelProvider;
    use crate::plugin::{ExecutorSpec, Plugin};

    struct ScriptedTextProvider {
        responses: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ModelProvider for ScriptedTextProvider {
        fn id(&self) -> &str {
            "scripted"
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![CapabilityDescriptor {
                id: "text-generation".to_string(),
                name: "Text generation".to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                config_schema: None,
            }]
        }
        async fn execute(&self, _capability_id: &str, _input: Value, _config: Option<Value>) -> Result<Value> {
            let mut responses = self.responses.lock();
            let text = if responses.len() > 1 { responses.remove(0) } else { responses[0].clone() };
            Ok(json!({"text": text}))
        }
    }

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn id(&self) -> &str {
            "noop"
        }
        fn executors(&self) -> Vec<ExecutorSpec> {
            vec![ExecutorSpec { name: "do_thing".to_string(), description: String::new() }]
        }
        async fn execute(&self, _executor_name: &str, _task: &AgentTask) -> Result<PluginResult> {
            Ok(PluginResult::ok(json!({"done": true})))
        }
    }

    fn templates_with(entries: &[(&str, &str)]) -> Arc<TemplateRegistry> {
        let dir = tempfile::tempdir().unwrap();
        for (id, body) in entries {
            let path = dir.path().join(format!("{id}.tera"));
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        let registry = TemplateRegistry::new();
        registry.register_directory(dir.path(), "core").unwrap();
        // leak the tempdir so files outlive the registry for the duration of the test
        std::mem::forget(dir);
        Arc::new(registry)
    }

    async fn engine_with(responses: Vec<&str>) -> (Engine, Arc<PluginRegistry>) {
        let registry = Arc::new(CapabilityRegistry::new());
        let analytics = Arc::new(AnalyticsWrapper::new());
        let model_manager = Arc::new(ModelManager::new(registry, analytics));
        model_manager
            .register_model(Arc::new(ScriptedTextProvider {
                responses: parking_lot::Mutex::new(responses.into_iter().map(str::to_string).collect()),
            }))
            .await
            .unwrap();

        let plugins = Arc::new(PluginRegistry::new());
        let templates = templates_with(&[
            ("pipeline/generate", "generate"),
            ("pipeline/modify", "modify"),
            ("object", "{{ prompt }}"),
            ("retry", "retry: {{ error_message }}"),
        ]);
        plugins.register(Arc::new(NoopPlugin), &templates).await.unwrap();

        let monitoring = MonitoringHub::new(4);
        let engine = Engine::new(model_manager, plugins.clone(), templates, monitoring, 3, "text-generation");
        (engine, plugins)
    }

    fn trigger_task() -> AgentTask {
        AgentTask::new(ContextItem::trigger("test", "recv", "hi"), crate::model::Space::new("s"))
    }

    #[tokio::test]
    async fn run_executes_generated_pipeline_and_appends_step_result() {
        let (engine, _plugins) = engine_with(vec![
            "[{\"plugin_id\": \"noop\", \"action\": \"do_thing\"}]",
            "{\"should_modify\": false, \"explanation\": \"fine as is\"}",
        ])
        .await;

        let mut task = trigger_task();
        engine.run(&mut task).await;

        assert_eq!(task.context_chain.len(), 2);
        assert_eq!(task.context_chain[1].action, "do_thing");
        assert_eq!(task.context_chain[1].metadata, json!({"done": true}));
    }

    #[tokio::test]
    async fn run_with_malformed_pipeline_falls_back_to_empty_pipeline() {
        let (engine, _plugins) = engine_with(vec!["not json at all", "not json at all", "not json at all"]).await;

        let mut task = trigger_task();
        engine.run(&mut task).await;

        assert_eq!(task.context_chain.len(), 2);
        assert_eq!(task.context_chain[1].kind, crate::model::ContextItemKind::Error);
    }

    #[tokio::test]
    async fn run_recovers_from_missing_executor_step() {
        let (engine, _plugins) = engine_with(vec![
            "[{\"plugin_id\": \"noop\", \"action\": \"does_not_exist\"}]",
            "{\"should_modify\": false, \"explanation\": \"stop\"}",
        ])
        .await;

        let mut task = trigger_task();
        engine.run(&mut task).await;

        assert_eq!(task.context_chain.len(), 2);
        assert_eq!(task.context_chain[1].kind, crate::model::ContextItemKind::Error);
    }

    #[tokio::test]
    async fn get_object_retries_then_succeeds() {
        let (engine, _plugins) = engine_with(vec!["garbage", "{\"should_modify\": true, \"explanation\": \"ok\"}"]).await;
        let value = engine.get_object(&modification_schema(), "request").await.unwrap();
        assert_eq!(value["should_modify"], json!(true));
    }

    #[tokio::test]
    async fn get_object_exhausts_retries_and_propagates() {
        let (engine, _plugins) = engine_with(vec!["garbage"]).await;
        let err = engine.get_object(&modification_schema(), "request").await.unwrap_err();
        assert!(matches!(err, Error::TypedObjectParseFailure { .. }));
    }
}
