//! Flow definitions — name, input/output shapes and prompt template.
//!
//! Definitions are declared in Rust (see `catalog`) or in YAML:
//!
//! ```yaml
//! name: "product-tagline"
//! description: "One-line marketing tagline"
//! model: "gemini-2.0-flash"
//! options:
//!   temperature: 0.9
//! input:
//!   - name: productName
//!     type: string
//!     required: true
//! output:
//!   kind: text
//!   field: tagline
//! template: |
//!   Write a short tagline for {{productName}}.
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::GenerationOptions;
use crate::config::ConfigError;
use crate::prompt::Template;
use crate::schema::{FieldSpec, Format, Shape};

/// How a backend response is turned into the flow's output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputSpec {
    /// Response text stored under `field`
    Text {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<Shape>,
    },
    /// Response text parsed as a JSON object
    Json { shape: Shape },
    /// Response media reference stored under `field`
    Media {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<Shape>,
    },
}

impl OutputSpec {
    pub fn text(field: &str) -> Self {
        OutputSpec::Text {
            field: field.to_string(),
            shape: None,
        }
    }

    pub fn json(shape: Shape) -> Self {
        OutputSpec::Json { shape }
    }

    pub fn media(field: &str) -> Self {
        OutputSpec::Media {
            field: field.to_string(),
            shape: None,
        }
    }

    /// Declared output shape; text and media outputs default to a single
    /// required field.
    pub fn shape(&self) -> Shape {
        match self {
            OutputSpec::Text { field, shape } => shape.clone().unwrap_or_else(|| {
                Shape::new().field(FieldSpec::string(field).required().format(Format::NonEmpty))
            }),
            OutputSpec::Json { shape } => shape.clone(),
            OutputSpec::Media { field, shape } => shape.clone().unwrap_or_else(|| {
                Shape::new().field(FieldSpec::string(field).required().format(Format::Media))
            }),
        }
    }
}

/// A named generative operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Model identifier sent as the request's backend
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerationOptions>,

    pub input: Shape,

    pub output: OutputSpec,

    pub template: Template,
}

impl FlowDefinition {
    pub fn new(
        name: &str,
        model: &str,
        input: Shape,
        output: OutputSpec,
        template: Template,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            model: model.to_string(),
            options: None,
            input,
            output,
            template,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse a flow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let flow: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            what: "flow definition YAML".to_string(),
            message: e.to_string(),
        })?;
        flow.check()?;
        Ok(flow)
    }

    /// Load a flow definition from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Structural checks: the template may only refer to declared input
    /// fields, so assembling a request from validated input cannot fail.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("flow name must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "flow '{}' has no model",
                self.name
            )));
        }
        let undeclared: Vec<String> = self
            .template
            .referenced_fields()
            .into_iter()
            .filter(|field| self.input.get(field).is_none())
            .collect();
        if !undeclared.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "template of flow '{}' refers to undeclared input field(s): {}",
                self.name,
                undeclared.join(", ")
            )));
        }
        Ok(())
    }
}
