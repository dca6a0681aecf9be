//! Model Manager (`spec.md` §4.2).
//!
//! Owns model providers; routes a capability call to a provider; validates
//! input/config/output against schemas, after applying any alias transform.

pub mod provider;
pub mod reference;

pub use provider::{ModelProvider, ProviderHealth};
pub use reference::ReferenceTextProvider;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{info, instrument};

use crate::analytics::{AnalyticsWrapper, ExecutionContext};
use crate::capability::{self, CapabilityRegistry};
use crate::model::CapabilityDescriptor;
use crate::{Error, Result};

/// Owns registered model providers and the shared capability registry they
/// declare into.
pub struct ModelManager {
    registry: Arc<CapabilityRegistry>,
    providers: DashMap<String, Arc<dyn ModelProvider>>,
    analytics: Arc<AnalyticsWrapper>,
}

impl ModelManager {
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, analytics: Arc<AnalyticsWrapper>) -> Self {
        Self { registry, providers: DashMap::new(), analytics }
    }

    #[must_use]
    pub fn capability_registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<Arc<dyn ModelProvider>> {
        self.providers.get(id).map(|p| p.clone())
    }

    /// Every currently-registered provider id, for shutdown teardown.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|e| e.key().clone()).collect()
    }

    /// Register a provider: `init` → `check_health` → declare its
    /// capabilities → insert into the provider map. Capability default
    /// assignment happens implicitly in `register_capability` (first
    /// registrant wins). Any failure rolls back the partial effect for this
    /// provider (`spec.md` §4.2).
    #[instrument(skip(self, provider), fields(provider_id = provider.id()))]
    pub async fn register_model(&self, provider: Arc<dyn ModelProvider>) -> Result<()> {
        let id = provider.id().to_string();

        provider.init().await.map_err(|e| Error::Internal(format!("provider {id} init failed: {e}")))?;

        let health = provider.check_health().await;
        if let Err(e) = health {
            return Err(Error::Internal(format!("provider {id} health check failed: {e}")));
        }

        let capabilities = provider.capabilities();
        for capability in &capabilities {
            self.registry.register_capability(&id, &capability.id);
        }

        self.providers.insert(id.clone(), provider);
        info!(provider_id = %id, capabilities = capabilities.len(), "registered model provider");
        Ok(())
    }

    /// Unregister a provider, mirroring registration in reverse: remove
    /// from the provider map, withdraw its capability declarations (which
    /// also reassigns defaults to the next declarant, if any), then call
    /// `shutdown`.
    pub async fn unregister_model(&self, provider_id: &str) -> Result<()> {
        let Some((_, provider)) = self.providers.remove(provider_id) else {
            return Ok(());
        };
        self.registry.unregister_provider(provider_id);
        provider.shutdown().await.map_err(|e| Error::Internal(format!("provider {provider_id} shutdown failed: {e}")))?;
        Ok(())
    }

    /// `executeCapability` (`spec.md` §4.2), step by step.
    pub async fn execute_capability(
        &self,
        capability_id: &str,
        input: Value,
        config: Option<Value>,
        model_id: Option<&str>,
    ) -> Result<Value> {
        // 1. Resolve alias → canonicalId.
        let canonical = self.registry.resolve(capability_id);

        // 2. Choose provider.
        let provider_id = match model_id {
            Some(id) => {
                if !self.providers.contains_key(id) {
                    return Err(Error::UnknownModel(id.to_string()));
                }
                id.to_string()
            }
            None => self
                .registry
                .default_provider_for(&canonical)
                .ok_or_else(|| Error::NoProviderForCapability(canonical.clone()))?,
        };
        let provider = self
            .providers
            .get(&provider_id)
            .map(|p| p.clone())
            .ok_or_else(|| Error::UnknownModel(provider_id.clone()))?;

        // 3. Retrieve the capability object from the provider.
        let descriptor: CapabilityDescriptor = provider
            .capability(&canonical)
            .ok_or_else(|| Error::CapabilityMissingOnProvider {
                provider: provider_id.clone(),
                capability: canonical.clone(),
            })?;

        // 4. Pick transform entry; apply input/config transforms.
        let entry = self.registry.select_transform_entry(capability_id, &input, config.as_ref());

        let transformed_input = match entry.as_ref().and_then(|e| e.input.as_ref()) {
            Some(group) => capability::transform::apply(group, &input)?,
            None => input,
        };
        let transformed_config = match (entry.as_ref().and_then(|e| e.config.as_ref()), config) {
            (Some(group), Some(cfg)) => Some(capability::transform::apply(group, &cfg)?),
            (_, passthrough) => passthrough,
        };

        // 5. Validate transformed config.
        let config_schema = entry
            .as_ref()
            .and_then(|e| e.config.as_ref())
            .map(|g| g.provider_schema.clone())
            .or_else(|| descriptor.config_schema.clone());
        if let (Some(schema), Some(cfg)) = (&config_schema, &transformed_config) {
            capability::validate(schema, cfg).map_err(|reason| Error::InvalidConfig {
                capability: canonical.clone(),
                reason,
            })?;
        }

        // 6. Validate transformed input.
        let input_schema = entry
            .as_ref()
            .and_then(|e| e.input.as_ref())
            .map(|g| g.provider_schema.clone())
            .unwrap_or_else(|| descriptor.input_schema.clone());
        capability::validate(&input_schema, &transformed_input).map_err(|reason| Error::InvalidInput {
            capability: canonical.clone(),
            reason,
        })?;

        // 7. Execute, wrapped by the Analytics Wrapper.
        let ctx = ExecutionContext::new(
            canonical.clone(),
            provider_id.clone(),
            "execute_capability",
            transformed_input.clone(),
            transformed_config.clone(),
        );
        let provider_for_call = provider.clone();
        let canonical_for_call = canonical.clone();
        let result = self
            .analytics
            .run(ctx, move || async move {
                provider_for_call
                    .execute(&canonical_for_call, transformed_input, transformed_config)
                    .await
                    .map_err(|e| Error::ModelExecutionError {
                        capability: canonical_for_call.clone(),
                        reason: e.to_string(),
                    })
            })
            .await?;

        // 8. Apply output transform if present.
        let output = match entry.as_ref().and_then(|e| e.output.as_ref()) {
            Some(group) => capability::transform::apply(group, &result)?,
            None => result,
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoProvider;

    #[async_trait]
    impl ModelProvider for EchoProvider {
        fn id(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![CapabilityDescriptor {
                id: "text-gen".to_string(),
                name: "Text generation".to_string(),
                description: String::new(),
                input_schema: json!({"type": "object"}),
                output_schema: json!({"type": "object"}),
                config_schema: None,
            }]
        }

        async fn execute(&self, _capability_id: &str, input: Value, _config: Option<Value>) -> Result<Value> {
            Ok(input)
        }
    }

    struct FailingHealthProvider;

    #[async_trait]
    impl ModelProvider for FailingHealthProvider {
        fn id(&self) -> &str {
            "bad"
        }
        fn capabilities(&self) -> Vec<CapabilityDescriptor> {
            vec![]
        }
        async fn check_health(&self) -> Result<()> {
            Err(Error::Internal("unreachable".into()))
        }
        async fn execute(&self, _capability_id: &str, input: Value, _config: Option<Value>) -> Result<Value> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn execute_capability_round_trips_through_echo_provider() {
        let registry = Arc::new(CapabilityRegistry::new());
        let analytics = Arc::new(AnalyticsWrapper::new());
        let manager = ModelManager::new(registry, analytics);
        manager.register_model(Arc::new(EchoProvider)).await.unwrap();

        let out = manager
            .execute_capability("text-gen", json!({"prompt": "hi"}), None, None)
            .await
            .unwrap();
        assert_eq!(out, json!({"prompt": "hi"}));
    }

    #[tokio::test]
    async fn no_provider_for_capability_surfaces() {
        let registry = Arc::new(CapabilityRegistry::new());
        let analytics = Arc::new(AnalyticsWrapper::new());
        let manager = ModelManager::new(registry, analytics);
        let err = manager.execute_capability("text-gen", json!({}), None, None).await.unwrap_err();
        assert!(matches!(err, Error::NoProviderForCapability(_)));
    }

    #[tokio::test]
    async fn unknown_model_id_surfaces() {
        let registry = Arc::new(CapabilityRegistry::new());
        let analytics = Arc::new(AnalyticsWrapper::new());
        let manager = ModelManager::new(registry, analytics);
        manager.register_model(Arc::new(EchoProvider)).await.unwrap();
        let err = manager
            .execute_capability("text-gen", json!({}), None, Some("nonexistent"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownModel(_)));
    }

    #[tokio::test]
    async fn registration_rolls_back_on_failed_health_check() {
        let registry = Arc::new(CapabilityRegistry::new());
        let analytics = Arc::new(AnalyticsWrapper::new());
        let manager = ModelManager::new(registry.clone(), analytics);
        let err = manager.register_model(Arc::new(FailingHealthProvider)).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(manager.provider("bad").is_none());
    }
}
