//! Generation parameters and where they land in a job template.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::template::JobTemplate;

/// Default sampler step count.
pub const DEFAULT_STEPS: u32 = 25;
/// Default output width in pixels.
pub const DEFAULT_WIDTH: u32 = 512;
/// Default output height in pixels.
pub const DEFAULT_HEIGHT: u32 = 512;

/// Caller-supplied inputs for one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub positive: String,
    pub negative: String,
    pub steps: u32,
    pub width: u32,
    pub height: u32,
}

impl GenerationParams {
    /// Parameters with the default step count and resolution.
    pub fn new(positive: impl Into<String>, negative: impl Into<String>) -> Self {
        Self {
            positive: positive.into(),
            negative: negative.into(),
            steps: DEFAULT_STEPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Steps and both dimensions must be positive.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.steps == 0 {
            return Err(CoreError::Validation("steps must be at least 1".to_string()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::Validation(format!(
                "resolution must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// One `(node id, input field)` location inside a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub node: String,
    pub field: String,
}

impl FieldRef {
    pub fn new(node: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            field: field.into(),
        }
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.node, self.field)
    }
}

/// Template locations written for every job.
///
/// The defaults address the stock text-to-image workflow: `KSampler`
/// (node 3), `EmptyLatentImage` (node 5) and the positive/negative
/// `CLIPTextEncode` nodes (6 and 7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBindings {
    pub positive: FieldRef,
    pub negative: FieldRef,
    pub steps: FieldRef,
    pub width: FieldRef,
    pub height: FieldRef,
    pub seed: FieldRef,
}

impl Default for TemplateBindings {
    fn default() -> Self {
        Self {
            positive: FieldRef::new("6", "text"),
            negative: FieldRef::new("7", "text"),
            steps: FieldRef::new("3", "steps"),
            width: FieldRef::new("5", "width"),
            height: FieldRef::new("5", "height"),
            seed: FieldRef::new("3", "seed"),
        }
    }
}

impl TemplateBindings {
    fn all(&self) -> [&FieldRef; 6] {
        [
            &self.positive,
            &self.negative,
            &self.steps,
            &self.width,
            &self.height,
            &self.seed,
        ]
    }

    /// Check that every bound location exists in `template`.
    pub fn validate(&self, template: &JobTemplate) -> Result<(), CoreError> {
        for location in self.all() {
            template.require_field(&location.node, &location.field)?;
        }
        Ok(())
    }

    /// Write the five caller parameters into `template`.
    ///
    /// Validates every binding (including the seed) first, so a template
    /// missing any required field is left untouched.
    pub fn apply_params(
        &self,
        template: &mut JobTemplate,
        params: &GenerationParams,
    ) -> Result<(), CoreError> {
        params.validate()?;
        self.validate(template)?;

        template.set_field(&self.positive.node, &self.positive.field, params.positive.as_str())?;
        template.set_field(&self.negative.node, &self.negative.field, params.negative.as_str())?;
        template.set_field(&self.steps.node, &self.steps.field, params.steps)?;
        template.set_field(&self.width.node, &self.width.field, params.width)?;
        template.set_field(&self.height.node, &self.height.field, params.height)?;
        Ok(())
    }

    /// Write the sampler seed into `template`.
    pub fn apply_seed(&self, template: &mut JobTemplate, seed: u64) -> Result<(), CoreError> {
        template.set_field(&self.seed.node, &self.seed.field, seed)
    }

    /// Read back the seed stored in `template`, if it is an integer.
    pub fn read_seed(&self, template: &JobTemplate) -> Option<u64> {
        template
            .get_field(&self.seed.node, &self.seed.field)
            .and_then(serde_json::Value::as_u64)
    }
}
