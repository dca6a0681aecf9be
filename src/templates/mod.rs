//! Prompt Template Registry (`spec.md` §4.4).
//!
//! Discovers `.tera` prompt template files on disk with a recursive
//! `walkdir` scan, one namespace per registered directory. Rendering itself
//! is delegated to `tera`; the template language is explicitly out of scope
//! for this spec — only the registry's contract (namespaced ids,
//! first-directory-wins, override/extend hook chains) is specified.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use walkdir::WalkDir;

use crate::{Error, Result};

const TEMPLATE_EXTENSION: &str = "tera";

pub type OverrideFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
pub type ExtendFn = Arc<dyn Fn(&Value, &str) -> String + Send + Sync>;

/// A template id, its backing file path, and its raw (unrendered) content
/// — `GET /prompts` returns exactly this triple for every registered
/// template (`spec.md` §6).
#[derive(Debug, Clone)]
pub struct TemplateListing {
    pub id: String,
    pub path: PathBuf,
    pub template: String,
}

#[derive(Default)]
pub struct TemplateRegistry {
    /// id -> absolute file path. First directory registered for a given id
    /// wins (`spec.md` §4.4: "Same id registered from two directories:
    /// first wins").
    files: DashMap<String, PathBuf>,
    overrides: DashMap<String, OverrideFn>,
    extensions: DashMap<String, RwLock<Vec<ExtendFn>>>,
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry").field("ids", &self.files.len()).finish()
    }
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recursively index `.tera` files under `dir`; each file becomes id
    /// `{namespace}/{relative path without extension}`, with `/` as
    /// separator regardless of host filesystem (`spec.md` §4.4).
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be read.
    pub fn register_directory(&self, dir: &Path, namespace: &str) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }

        let mut count = 0;
        for entry in WalkDir::new(dir).into_iter().filter_map(std::result::Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
                continue;
            }

            let relative = path.strip_prefix(dir).unwrap_or(path).with_extension("");
            let relative = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
            let id = format!("{namespace}/{relative}");

            self.files.entry(id).or_insert_with(|| path.to_path_buf());
            count += 1;
        }
        Ok(count)
    }

    /// Replace rendering for `id` entirely; wins over any file
    /// (`spec.md` §4.4).
    pub fn override_template(&self, id: &str, f: OverrideFn) {
        self.overrides.insert(id.to_string(), f);
    }

    /// Append a post-render extension for `id`, applied left-to-right in
    /// registration order (`spec.md` §4.4).
    pub fn extend(&self, id: &str, f: ExtendFn) {
        self.extensions.entry(id.to_string()).or_default().write().push(f);
    }

    /// Render `id` with `ctx`. Override wins; otherwise resolve to a file
    /// and render via `tera`; then run extensions. Fails
    /// `TemplateNotFound` if neither an override nor a file exists
    /// (`spec.md` §4.4).
    pub fn render(&self, id: &str, ctx: &Value) -> Result<String> {
        let mut rendered = if let Some(f) = self.overrides.get(id) {
            f(ctx)
        } else if let Some(path) = self.files.get(id) {
            let content = std::fs::read_to_string(path.value())
                .map_err(|e| Error::Internal(format!("failed to read template {id}: {e}")))?;
            let tera_ctx = tera::Context::from_value(ctx.clone())
                .map_err(|e| Error::Internal(format!("invalid template context for {id}: {e}")))?;
            tera::Tera::one_off(&content, &tera_ctx, false)
                .map_err(|e| Error::Internal(format!("failed to render template {id}: {e}")))?
        } else {
            return Err(Error::TemplateNotFound(id.to_string()));
        };

        if let Some(exts) = self.extensions.get(id) {
            for ext in exts.read().iter() {
                rendered = ext(ctx, &rendered);
            }
        }

        Ok(rendered)
    }

    /// List every registered template (files only; overrides have no
    /// backing path and are omitted, matching `spec.md` §6's `{id, path,
    /// template}` shape).
    ///
    /// # Errors
    ///
    /// Returns an error if any backing file cannot be read.
    pub fn list(&self) -> Result<Vec<TemplateListing>> {
        self.files
            .iter()
            .map(|entry| {
                let template = std::fs::read_to_string(entry.value())
                    .map_err(|e| Error::Internal(format!("failed to read template {}: {e}", entry.key())))?;
                Ok(TemplateListing { id: entry.key().clone(), path: entry.value().clone(), template })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn directory_registration_normalizes_ids_and_renders() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("greet.tera"), "Hello, {{ name }}!").unwrap();

        let registry = TemplateRegistry::new();
        let count = registry.register_directory(dir.path(), "core").unwrap();
        assert_eq!(count, 1);

        let rendered = registry.render("core/sub/greet", &json!({"name": "Ava"})).unwrap();
        assert_eq!(rendered, "Hello, Ava!");
    }

    #[test]
    fn missing_template_fails() {
        let registry = TemplateRegistry::new();
        let err = registry.render("nope", &json!({})).unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound(_)));
    }

    #[test]
    fn override_wins_over_file_and_extensions_apply_left_to_right() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("p.tera"), "from-file").unwrap();

        let registry = TemplateRegistry::new();
        registry.register_directory(dir.path(), "ns").unwrap();
        registry.override_template("ns/p", Arc::new(|_ctx| "from-override".to_string()));
        registry.extend("ns/p", Arc::new(|_ctx, rendered| format!("{rendered}-ext1")));
        registry.extend("ns/p", Arc::new(|_ctx, rendered| format!("{rendered}-ext2")));

        let rendered = registry.render("ns/p", &json!({})).unwrap();
        assert_eq!(rendered, "from-override-ext1-ext2");
    }

    #[test]
    fn first_directory_wins_on_id_collision() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        std::fs::write(first.path().join("p.tera"), "first").unwrap();
        std::fs::write(second.path().join("p.tera"), "second").unwrap();

        let registry = TemplateRegistry::new();
        registry.register_directory(first.path(), "ns").unwrap();
        registry.register_directory(second.path(), "ns").unwrap();

        assert_eq!(registry.render("ns/p", &json!({})).unwrap(), "first");
    }
}
