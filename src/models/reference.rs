//! A reference `text-generation` provider.
//!
//! Concrete model backends are out of scope for this crate (`spec.md` §1);
//! this implementation plays the same role [`crate::memory::InMemoryProvider`]
//! plays for memory — crate-own test/demo tooling, not a production model
//! integration. It does not call any external model; it renders a fixed,
//! deterministic response so the typed-object procedure and pipeline
//! generation have something to exercise end to end.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::Result;
use crate::model::CapabilityDescriptor;

use super::ModelProvider;

/// Capability id this provider declares; also the id the Engine defaults
/// to for its own typed-object procedure (`spec.md` §4.6).
pub const TEXT_GENERATION_CAPABILITY: &str = "text-generation";

pub struct ReferenceTextProvider;

impl Default for ReferenceTextProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceTextProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ModelProvider for ReferenceTextProvider {
    fn id(&self) -> &str {
        "reference-text"
    }

    fn capabilities(&self) -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor {
            id: TEXT_GENERATION_CAPABILITY.to_string(),
            name: "Reference text generation".to_string(),
            description: "Deterministic placeholder text generation for local smoke tests".to_string(),
            input_schema: json!({"type": "object", "required": ["prompt"], "properties": {"prompt": {"type": "string"}}}),
            output_schema: json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}}),
            config_schema: None,
        }]
    }

    async fn execute(&self, _capability_id: &str, input: Value, _config: Option<Value>) -> Result<Value> {
        let prompt = input.get("prompt").and_then(Value::as_str).unwrap_or_default().to_string();
        // Routed through the shared retry helper like any other outbound
        // model call would be, even though this reference implementation
        // never actually fails.
        crate::failsafe::retry("reference-text::execute", 1, || {
            let prompt = prompt.clone();
            async move { Ok::<Value, crate::Error>(json!({"text": format!("[reference-text] no model configured; echoing prompt of {} chars", prompt.len())})) }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_prompt_length() {
        let provider = ReferenceTextProvider::new();
        let out = provider.execute(TEXT_GENERATION_CAPABILITY, json!({"prompt": "hello"}), None).await.unwrap();
        assert!(out["text"].as_str().unwrap().contains('5'));
    }
}
