use thiserror::Error;

use crate::application::ports::{
    CompileError, ExpansionError, ResolveError, StorageError, error_chain,
};
use crate::domain::types::ArtifactRef;

/// Final result of a render request.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    /// A published artifact, either freshly rendered or served from cache.
    Artifact(ArtifactRef),
    /// No template exists under the requested identifier.
    TemplateNotFound,
    /// Rendering failed; nothing was published.
    RenderFailed(RenderError),
}

impl RenderOutcome {
    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match self {
            RenderOutcome::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RenderOutcome::TemplateNotFound)
    }

    pub fn error(&self) -> Option<&RenderError> {
        match self {
            RenderOutcome::RenderFailed(error) => Some(error),
            _ => None,
        }
    }
}

/// Structured render failures. Messages are flattened so a single failure can
/// be handed to every caller that coalesced onto the same render.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("template lookup failed: {message}")]
    Resolve { message: String },
    #[error("template expansion failed: {message}")]
    Expansion { message: String },
    #[error("document compilation failed: {message}")]
    Compile { message: String, timed_out: bool },
    #[error("artifact storage failed: {message}")]
    Storage { message: String },
    #[error("render task aborted: {message}")]
    Aborted { message: String },
}

impl RenderError {
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Resolve { .. } => "resolve",
            RenderError::Expansion { .. } => "expansion",
            RenderError::Compile {
                timed_out: true, ..
            } => "compile_timeout",
            RenderError::Compile { .. } => "compile",
            RenderError::Storage { .. } => "storage",
            RenderError::Aborted { .. } => "aborted",
        }
    }
}

impl From<ResolveError> for RenderError {
    fn from(error: ResolveError) -> Self {
        Self::Resolve {
            message: error_chain(&error),
        }
    }
}

impl From<ExpansionError> for RenderError {
    fn from(error: ExpansionError) -> Self {
        Self::Expansion {
            message: error_chain(&error),
        }
    }
}

impl From<CompileError> for RenderError {
    fn from(error: CompileError) -> Self {
        Self::Compile {
            timed_out: matches!(error, CompileError::Timeout { .. }),
            message: error_chain(&error),
        }
    }
}

impl From<StorageError> for RenderError {
    fn from(error: StorageError) -> Self {
        Self::Storage {
            message: error_chain(&error),
        }
    }
}
