//! Job-graph templates and the store they are loaded from.
//!
//! A template is a ComfyUI "API format" workflow: an object keyed by
//! node id whose values carry a `class_type` and an `inputs` object.
//! Parameters are written by overwriting existing input fields; node
//! and key order survive load and re-serialization unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Key under which a node keeps its field values.
pub const INPUTS_KEY: &str = "inputs";

/// Parsed job-graph template: node id -> node document.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    nodes: Map<String, Value>,
}

impl JobTemplate {
    /// Build a template from an already-parsed JSON document.
    ///
    /// The document must be a non-empty object whose values are objects.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(nodes) = value else {
            return Err(CoreError::Validation(
                "Template must be a JSON object keyed by node id".to_string(),
            ));
        };
        if nodes.is_empty() {
            return Err(CoreError::Validation("Template has no nodes".to_string()));
        }
        if let Some((id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(CoreError::Validation(format!(
                "Template node '{id}' is not an object"
            )));
        }
        Ok(Self { nodes })
    }

    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let value = serde_json::from_str(json).map_err(|source| CoreError::Parse {
            what: "job template".to_string(),
            source,
        })?;
        Self::from_value(value)
    }

    /// Node ids in document order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Read `nodes[node_id].inputs[field]`.
    pub fn get_field(&self, node_id: &str, field: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.get(INPUTS_KEY)?.get(field)
    }

    /// Overwrite an existing input field.
    ///
    /// Fields are never created: a missing node, a node without an
    /// `inputs` object, or a missing field is reported as a
    /// [`CoreError::Validation`] so that a template that does not carry a
    /// required parameter is rejected before submission.
    pub fn set_field(
        &mut self,
        node_id: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), CoreError> {
        let slot = self.field_mut(node_id, field)?;
        *slot = value.into();
        Ok(())
    }

    /// Check that `nodes[node_id].inputs[field]` exists.
    pub fn require_field(&self, node_id: &str, field: &str) -> Result<(), CoreError> {
        let node = self.nodes.get(node_id).ok_or_else(|| missing_node(node_id))?;
        let inputs = node
            .get(INPUTS_KEY)
            .and_then(Value::as_object)
            .ok_or_else(|| missing_inputs(node_id))?;
        if inputs.contains_key(field) {
            Ok(())
        } else {
            Err(missing_field(node_id, field))
        }
    }

    /// Borrow the template as the JSON document sent to the backend.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.nodes
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.nodes.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.nodes)
    }

    fn field_mut(&mut self, node_id: &str, field: &str) -> Result<&mut Value, CoreError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| missing_node(node_id))?;
        let inputs = node
            .get_mut(INPUTS_KEY)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| missing_inputs(node_id))?;
        inputs
            .get_mut(field)
            .ok_or_else(|| missing_field(node_id, field))
    }
}

fn missing_node(node_id: &str) -> CoreError {
    CoreError::Validation(format!("Template has no node '{node_id}'"))
}

fn missing_inputs(node_id: &str) -> CoreError {
    CoreError::Validation(format!("Template node '{node_id}' has no inputs object"))
}

fn missing_field(node_id: &str, field: &str) -> CoreError {
    CoreError::Validation(format!(
        "Template node '{node_id}' has no input field '{field}'"
    ))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// When the store reads the template file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// Read once at [`TemplateStore::open`] and serve clones afterwards.
    #[default]
    Once,
    /// Re-read the file on every [`TemplateStore::template`] call.
    PerCall,
}

/// Source of job templates backed by a JSON file on disk.
///
/// Every call to [`template`](Self::template) hands out an independent
/// copy, so per-request parameter overrides never leak between callers.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    path: PathBuf,
    policy: ReloadPolicy,
    cached: Arc<JobTemplate>,
}

impl TemplateStore {
    /// Load the template at `path`. The file is read (and validated)
    /// immediately regardless of policy, so a broken path fails at startup.
    pub fn open(path: impl Into<PathBuf>, policy: ReloadPolicy) -> Result<Self, CoreError> {
        let path = path.into();
        let template = Self::load(&path)?;
        tracing::info!(
            path = %path.display(),
            nodes = template.nodes.len(),
            ?policy,
            "Loaded job template",
        );
        Ok(Self {
            path,
            policy,
            cached: Arc::new(template),
        })
    }

    /// Wrap an in-memory template (no backing file is consulted).
    pub fn from_template(template: JobTemplate) -> Self {
        Self {
            path: PathBuf::new(),
            policy: ReloadPolicy::Once,
            cached: Arc::new(template),
        }
    }

    /// Read and parse a template file.
    pub fn load(path: &Path) -> Result<JobTemplate, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|source| io_error(path, source))?;
        parse_file(path, &text)
    }

    /// [`load`](Self::load) through `tokio::fs`, for use on the runtime.
    pub async fn load_async(path: &Path) -> Result<JobTemplate, CoreError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| io_error(path, source))?;
        parse_file(path, &text)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    /// Return a private copy of the template for one job.
    ///
    /// Under [`ReloadPolicy::PerCall`] this blocks on file I/O; async
    /// callers use [`fetch_template`](Self::fetch_template).
    pub fn template(&self) -> Result<JobTemplate, CoreError> {
        match self.policy {
            ReloadPolicy::Once => Ok(JobTemplate::clone(&self.cached)),
            ReloadPolicy::PerCall => Self::load(&self.path),
        }
    }

    /// Async counterpart of [`template`](Self::template).
    pub async fn fetch_template(&self) -> Result<JobTemplate, CoreError> {
        match self.policy {
            ReloadPolicy::Once => Ok(JobTemplate::clone(&self.cached)),
            ReloadPolicy::PerCall => Self::load_async(&self.path).await,
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn parse_file(path: &Path, text: &str) -> Result<JobTemplate, CoreError> {
    let value = serde_json::from_str(text).map_err(|source| CoreError::Parse {
        what: path.display().to_string(),
        source,
    })?;
    JobTemplate::from_value(value)
}
