use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::DomainError;
use super::fingerprint::Fingerprint;

/// Structured data a template is expanded against. Always a JSON object so its
/// keys can become top-level template variables.
pub type RenderContext = Map<String, Value>;

/// Opaque identifier naming a template in the deployment's template directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier can be used verbatim as a single file name.
    ///
    /// Identifiers that could escape the template directory (separators,
    /// parent references, hidden names) can never name a template.
    pub fn is_path_safe(&self) -> bool {
        let value = self.0.as_str();
        !value.is_empty()
            && !value.starts_with('.')
            && !value
                .chars()
                .any(|ch| matches!(ch, '/' | '\\' | '\0') || ch.is_control())
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A template identifier paired with the context it should be rendered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub template_id: TemplateId,
    pub context: RenderContext,
}

impl RenderRequest {
    pub fn new(template_id: impl Into<TemplateId>, context: RenderContext) -> Self {
        Self {
            template_id: template_id.into(),
            context,
        }
    }

    /// Build a request from an arbitrary JSON document, which must be an object.
    pub fn from_json(template_id: impl Into<TemplateId>, value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Object(context) => Ok(Self::new(template_id, context)),
            other => Err(DomainError::ContextNotObject {
                found: json_kind(&other),
            }),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.template_id, &self.context)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Raw template text as read from the template repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Name the template is registered under, e.g. `invoice.tex`.
    pub name: String,
    pub source: String,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Reference to a published, immutable artifact in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn new(fingerprint: Fingerprint, path: PathBuf) -> Self {
        Self { fingerprint, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}
