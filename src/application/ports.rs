//! Collaborator traits the render pipeline is assembled from.
//!
//! Filesystem and process-backed implementations live in `crate::infra`;
//! tests substitute counting doubles.

use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::fingerprint::Fingerprint;
use crate::domain::types::{ArtifactRef, RenderContext, TemplateId, TemplateSource};

/// Failure reading a template that exists (or may exist). Absence is not an error.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to read template `{name}`")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("template `{name}` is not valid UTF-8")]
    Encoding { name: String },
}

/// The template could not be expanded against the supplied context.
#[derive(Debug, Error)]
#[error("failed to expand template `{template}`: {message}")]
pub struct ExpansionError {
    pub template: String,
    pub message: String,
}

impl ExpansionError {
    pub fn new(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            message: message.into(),
        }
    }
}

/// The external document compiler did not produce a usable artifact.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to spawn compiler `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("compiler exited unsuccessfully (exit {exit_code:?}): {stderr}")]
    Exit {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("compiler did not finish within {}s", .after.as_secs())]
    Timeout { after: Duration },
    #[error("compiler produced no output file")]
    MissingOutput,
    #[error("compiler produced an empty artifact")]
    EmptyOutput,
    #[error("compiler output does not start with the expected signature `{expected}`")]
    InvalidOutput { expected: String },
    #[error("compiler i/o failed")]
    Io(#[from] io::Error),
}

/// The artifact store could not complete a storage operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("artifact storage i/o failed at `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("refusing to publish an empty artifact")]
    EmptyArtifact,
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Read-only repository of template sources.
#[async_trait]
pub trait TemplateResolver: Send + Sync {
    /// Return the template source, or `None` when no such template exists.
    async fn resolve(&self, template_id: &TemplateId)
    -> Result<Option<TemplateSource>, ResolveError>;
}

/// Expands template source into intermediate marked-up text. Expansion is
/// CPU-bound and synchronous; callers move it off the async executor.
pub trait TemplateEngine: Send + Sync {
    fn expand(
        &self,
        template: &TemplateSource,
        context: &RenderContext,
    ) -> Result<String, ExpansionError>;
}

/// Turns intermediate text into the final binary artifact.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    async fn compile(&self, intermediate: &str) -> Result<Bytes, CompileError>;
}

/// Write-once, content-addressed artifact storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Existence check; never reports an artifact that is still being written.
    async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<ArtifactRef>, StorageError>;

    /// Durably store `bytes` under the fingerprint and make them visible atomically.
    async fn publish(
        &self,
        fingerprint: &Fingerprint,
        bytes: Bytes,
    ) -> Result<ArtifactRef, StorageError>;

    /// Read back a published artifact.
    async fn fetch(&self, fingerprint: &Fingerprint) -> Result<Option<Bytes>, StorageError>;
}

/// Flatten an error and its sources into a single line.
pub(crate) fn error_chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut current = error.source();
    while let Some(inner) = current {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        current = inner.source();
    }
    message
}
