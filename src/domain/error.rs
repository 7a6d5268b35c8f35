use thiserror::Error;

/// Requests that can never be rendered, whatever the templates on disk.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("render context must be a JSON object, got {found}")]
    ContextNotObject { found: &'static str },
}
