//! Capability Registry & Transform Layer (`spec.md` §4.1).
//!
//! Declares which typed capabilities models can provide, which provider is
//! the default for each, and the alias/transform indirection that lets a
//! plugin speak its own vocabulary while a provider speaks its own, without
//! either side knowing about the other.
//!
//! ```text
//! capability id ──register_capability──▶ {provider ids}
//!        │                                    │
//!        │ (first registrant)                 ▼
//!        └──────────────────────────▶ default provider
//!
//! alias id ──register_capability_alias──▶ canonical id
//!        │
//!        └──────────────────────────▶ [CapabilityTransformEntry]
//! ```

pub mod transform;

pub use transform::{CapabilityTransformEntry, TransformFn, TransformGroup, validate};

use dashmap::DashMap;

use crate::{Error, Result};

/// Registry of capability→provider declarations, defaults, and aliases.
///
/// Written only at bootstrap and on plugin/provider register-unregister
/// (off the hot path); readers see a stable snapshot during task execution
/// (`spec.md` §5), so a concurrent `DashMap` is sufficient without an outer
/// lock.
#[derive(Default)]
pub struct CapabilityRegistry {
    providers_by_capability: DashMap<String, Vec<String>>,
    defaults: DashMap<String, String>,
    aliases: DashMap<String, String>,
    transforms: DashMap<String, Vec<CapabilityTransformEntry>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent insertion; the first provider registered for a capability
    /// becomes its default (`spec.md` §4.1, §3 invariant "exactly one
    /// default model provider is chosen per capability id").
    pub fn register_capability(&self, provider_id: &str, capability_id: &str) {
        let mut providers = self.providers_by_capability.entry(capability_id.to_string()).or_default();
        if !providers.iter().any(|p| p == provider_id) {
            providers.push(provider_id.to_string());
        }
        drop(providers);
        self.defaults.entry(capability_id.to_string()).or_insert_with(|| provider_id.to_string());
    }

    /// Remove a provider's declarations, e.g. on `Model Manager::unregister_model`.
    /// If the provider was the default, the next remaining declarant (if
    /// any) becomes the new default — mirroring "first registered wins"
    /// applied to what remains after removal.
    pub fn unregister_provider(&self, provider_id: &str) {
        for mut entry in self.providers_by_capability.iter_mut() {
            entry.value_mut().retain(|p| p != provider_id);
        }
        let stale: Vec<String> = self
            .defaults
            .iter()
            .filter(|e| e.value() == provider_id)
            .map(|e| e.key().clone())
            .collect();
        for capability_id in stale {
            self.defaults.remove(&capability_id);
            if let Some(providers) = self.providers_by_capability.get(&capability_id) {
                if let Some(next) = providers.first() {
                    self.defaults.insert(capability_id, next.clone());
                }
            }
        }
    }

    /// Returns the providers declaring `capability_id`, if any.
    #[must_use]
    pub fn providers_for(&self, capability_id: &str) -> Vec<String> {
        self.providers_by_capability.get(capability_id).map(|v| v.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_declared(&self, capability_id: &str) -> bool {
        self.providers_by_capability.get(capability_id).is_some_and(|v| !v.is_empty())
    }

    /// Set the default provider for a capability. The provider must already
    /// declare it, else fails (`spec.md` §4.1: *unknown-capability-for-provider*,
    /// represented here as `Error::CapabilityMissingOnProvider`).
    pub fn set_default_model_for_capability(&self, capability_id: &str, provider_id: &str) -> Result<()> {
        let declares = self
            .providers_by_capability
            .get(capability_id)
            .is_some_and(|providers| providers.iter().any(|p| p == provider_id));
        if !declares {
            return Err(Error::CapabilityMissingOnProvider {
                provider: provider_id.to_string(),
                capability: capability_id.to_string(),
            });
        }
        self.defaults.insert(capability_id.to_string(), provider_id.to_string());
        Ok(())
    }

    #[must_use]
    pub fn default_provider_for(&self, capability_id: &str) -> Option<String> {
        self.defaults.get(capability_id).map(|v| v.clone())
    }

    /// Register an alias. `canonical_id` must already be a declared
    /// capability. Transforms are stored keyed by `alias_id`; when
    /// `alias_id == canonical_id` they are naturally retrievable via the
    /// canonical id too, since it is the same key.
    pub fn register_capability_alias(
        &self,
        alias_id: &str,
        canonical_id: &str,
        transforms: Vec<CapabilityTransformEntry>,
    ) -> Result<()> {
        if !self.is_declared(canonical_id) {
            return Err(Error::CapabilityMissing(canonical_id.to_string()));
        }
        self.aliases.insert(alias_id.to_string(), canonical_id.to_string());
        if !transforms.is_empty() {
            self.transforms.insert(alias_id.to_string(), transforms);
        }
        Ok(())
    }

    /// Resolve an id to its canonical capability id; identity if not an alias.
    #[must_use]
    pub fn resolve(&self, id: &str) -> String {
        self.aliases.get(id).map_or_else(|| id.to_string(), |c| c.clone())
    }

    /// Pick the transform entry whose plugin-side schemas accept `input`
    /// and `config` under strict validation; otherwise fall back to the
    /// first registered entry (`spec.md` §4.1). Returns `None` if no
    /// entries are registered for `alias_id` at all.
    #[must_use]
    pub fn select_transform_entry(
        &self,
        alias_id: &str,
        input: &serde_json::Value,
        config: Option<&serde_json::Value>,
    ) -> Option<CapabilityTransformEntry> {
        let entries = self.transforms.get(alias_id)?;
        entries
            .iter()
            .find(|e| e.accepts(input, config))
            .or_else(|| entries.first())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_registered_provider_becomes_default() {
        let registry = CapabilityRegistry::new();
        registry.register_capability("provider-a", "text-gen");
        registry.register_capability("provider-b", "text-gen");
        assert_eq!(registry.default_provider_for("text-gen"), Some("provider-a".to_string()));
        assert_eq!(registry.providers_for("text-gen"), vec!["provider-a", "provider-b"]);
    }

    #[test]
    fn set_default_requires_declaration() {
        let registry = CapabilityRegistry::new();
        registry.register_capability("provider-a", "text-gen");
        let err = registry.set_default_model_for_capability("text-gen", "provider-b").unwrap_err();
        assert!(matches!(err, Error::CapabilityMissingOnProvider { .. }));
        registry.register_capability("provider-b", "text-gen");
        registry.set_default_model_for_capability("text-gen", "provider-b").unwrap();
        assert_eq!(registry.default_provider_for("text-gen"), Some("provider-b".to_string()));
    }

    #[test]
    fn alias_requires_declared_canonical() {
        let registry = CapabilityRegistry::new();
        let err = registry.register_capability_alias("comic-image", "mm-image", vec![]).unwrap_err();
        assert!(matches!(err, Error::CapabilityMissing(_)));

        registry.register_capability("img-provider", "mm-image");
        registry.register_capability_alias("comic-image", "mm-image", vec![]).unwrap();
        assert_eq!(registry.resolve("comic-image"), "mm-image");
        assert_eq!(registry.resolve("mm-image"), "mm-image");
    }

    #[test]
    fn transform_selection_falls_back_to_first() {
        let registry = CapabilityRegistry::new();
        registry.register_capability("img-provider", "mm-image");

        let strict = CapabilityTransformEntry {
            input: Some(TransformGroup::new(
                json!({"type": "object", "required": ["urls"]}),
                json!({"type": "object", "required": ["images"]}),
                std::sync::Arc::new(|v: &serde_json::Value| {
                    let urls = v.get("urls").cloned().unwrap_or(json!([]));
                    Ok(json!({"images": urls}))
                }),
            )),
            output: None,
            config: None,
        };
        registry
            .register_capability_alias("comic-image", "mm-image", vec![strict.clone()])
            .unwrap();

        let matching = registry
            .select_transform_entry("comic-image", &json!({"urls": ["u1", "u2"]}), None)
            .unwrap();
        let out = transform::apply(matching.input.as_ref().unwrap(), &json!({"urls": ["u1", "u2"]})).unwrap();
        assert_eq!(out, json!({"images": ["u1", "u2"]}));

        // Non-matching input still returns the only entry (fallback-to-first).
        let fallback = registry.select_transform_entry("comic-image", &json!({"other": 1}), None);
        assert!(fallback.is_some());
    }
}
