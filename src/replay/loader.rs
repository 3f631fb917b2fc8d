use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use serde_json::Value;

use super::store::STORE_FILE;
use crate::error::{ReplayError, Result};
use crate::models::Recording;

/// Name suffix routing a recording through the template engine before
/// parsing.
pub const TEMPLATE_SUFFIX: &str = ".json.tmpl";

/// External templating collaborator. The engine never assumes a concrete
/// templating technology; it hands over the template name and a context
/// object (`{ params, env, store, jsparams }`) and gets text back.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template_name: &str, context: &Value) -> anyhow::Result<String>;
}

/// Resolves recording names to parsed step data.
///
/// Names are pre-indexed at session start by scanning the base directories;
/// a name that was never indexed fails with a distinct unknown-recording
/// error rather than a parse error.
pub struct RecordingLoader {
    index: HashMap<String, PathBuf>,
    templates: Option<Arc<dyn TemplateEngine>>,
}

impl RecordingLoader {
    pub fn new(templates: Option<Arc<dyn TemplateEngine>>) -> Self {
        Self {
            index: HashMap::new(),
            templates,
        }
    }

    /// Index all recordings (`*.json`, `*.json.tmpl`) in one directory.
    /// Later scans win on name collision.
    pub fn scan(&mut self, dir: &Path) -> Result<usize> {
        let mut found = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name == STORE_FILE {
                continue;
            }
            if name.ends_with(".json") || name.ends_with(TEMPLATE_SUFFIX) {
                self.index.insert(name.to_string(), path.clone());
                found += 1;
            }
        }

        tracing::debug!(
            "Indexed {} recordings from {} (total: {})",
            found,
            dir.display(),
            self.index.len()
        );
        Ok(found)
    }

    /// Register a single recording file under its base name.
    pub fn add_file(&mut self, path: &Path) -> Result<String> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ReplayError::UnknownRecording(path.display().to_string()))?
            .to_string();
        self.index.insert(name.clone(), path.to_path_buf());
        Ok(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Indexed recording names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.index.keys().map(|n| n.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Load one recording by name, rendering templated names through the
    /// template engine first.
    pub fn load(&self, name: &str, render_context: &Value) -> Result<Recording> {
        let path = self
            .index
            .get(name)
            .ok_or_else(|| ReplayError::UnknownRecording(name.to_string()))?;

        if name.ends_with(TEMPLATE_SUFFIX) {
            let engine = self
                .templates
                .as_ref()
                .ok_or_else(|| ReplayError::TemplateRender {
                    name: name.to_string(),
                    source: anyhow!("no template engine configured"),
                })?;
            let rendered =
                engine
                    .render(name, render_context)
                    .map_err(|e| ReplayError::TemplateRender {
                        name: name.to_string(),
                        source: e,
                    })?;
            return Ok(Recording::from_json(&rendered)?);
        }

        let raw = std::fs::read_to_string(path)?;
        Ok(Recording::from_json(&raw)?)
    }
}
