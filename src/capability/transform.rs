//! The capability alias/transform layer (`spec.md` §4.1).
//!
//! "The alias+transform layer becomes a small value-level language: each
//! transform entry is data, not code generation" (`spec.md` §9). Each group
//! here is a plain struct: two schemas plus a translation function supplied
//! by whoever registers the alias — there is no macro or DSL generating
//! these, just values assembled by provider/plugin authors.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{Error, Result};

/// A value-to-value translation, boxed so it can be stored alongside its
/// schemas in a registry entry.
pub type TransformFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// One direction of translation for an alias: plugin-side schema,
/// provider-side schema, and the function mapping plugin shape to provider
/// shape (for input/config groups) or provider shape to plugin shape (for
/// the output group).
#[derive(Clone)]
pub struct TransformGroup {
    pub plugin_schema: Value,
    pub provider_schema: Value,
    pub transform: TransformFn,
}

impl fmt::Debug for TransformGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformGroup")
            .field("plugin_schema", &self.plugin_schema)
            .field("provider_schema", &self.provider_schema)
            .field("transform", &"<fn>")
            .finish()
    }
}

impl TransformGroup {
    #[must_use]
    pub fn new(plugin_schema: Value, provider_schema: Value, transform: TransformFn) -> Self {
        Self { plugin_schema, provider_schema, transform }
    }

    /// Does `value` validate under the plugin-side schema? Used by
    /// `select_transform_entry`'s "strict validation" selection rule.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        validate(&self.plugin_schema, value).is_ok()
    }
}

/// Up to three transform groups for one alias (`spec.md` §3:
/// "CapabilityTransformEntry"). Input/config transforms translate
/// plugin→provider; the output transform translates provider→plugin.
#[derive(Debug, Clone, Default)]
pub struct CapabilityTransformEntry {
    pub input: Option<TransformGroup>,
    pub output: Option<TransformGroup>,
    pub config: Option<TransformGroup>,
}

impl CapabilityTransformEntry {
    /// Does this entry's plugin-side input (and config, if both present)
    /// schema accept the given values? An entry with no input group accepts
    /// anything for the input side (nothing to translate).
    #[must_use]
    pub fn accepts(&self, input: &Value, config: Option<&Value>) -> bool {
        let input_ok = self.input.as_ref().is_none_or(|g| g.accepts(input));
        let config_ok = match (&self.config, config) {
            (Some(group), Some(cfg)) => group.accepts(cfg),
            (Some(_), None) => false,
            (None, _) => true,
        };
        input_ok && config_ok
    }
}

/// Validate `instance` against `schema`, returning the first violation as a
/// human-readable string. Used both by alias transform selection and by the
/// Model Manager's provider-side validation (`spec.md` §4.2 steps 5-6) and
/// the typed-object procedure's schema check (`spec.md` §4.6).
pub fn validate(schema: &Value, instance: &Value) -> std::result::Result<(), String> {
    let compiled = jsonschema::validator_for(schema)
        .map_err(|e| format!("invalid schema: {e}"))?;
    if let Err(e) = compiled.validate(instance) {
        return Err(e.to_string());
    }
    Ok(())
}

/// Apply `group`'s transform function, wrapping failures in `Error::Internal`
/// since a transform function erroring is an authoring bug, not a runtime
/// condition with a dedicated error kind.
pub fn apply(group: &TransformGroup, value: &Value) -> Result<Value> {
    (group.transform)(value).map_err(|e| Error::Internal(format!("transform failed: {e}")))
}
