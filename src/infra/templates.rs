//! Template sources read from `<templates_dir>/<id>.tex`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::{ResolveError, TemplateResolver};
use crate::domain::types::{TemplateId, TemplateSource};

pub const TEMPLATE_EXTENSION: &str = "tex";

#[derive(Debug, Clone)]
pub struct FsTemplateResolver {
    root: PathBuf,
}

impl FsTemplateResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(template_id: &TemplateId) -> String {
        format!("{template_id}.{TEMPLATE_EXTENSION}")
    }
}

#[async_trait]
impl TemplateResolver for FsTemplateResolver {
    async fn resolve(
        &self,
        template_id: &TemplateId,
    ) -> Result<Option<TemplateSource>, ResolveError> {
        // No file can exist under a name that escapes the template directory.
        if !template_id.is_path_safe() {
            debug!(
                target = "infra::templates",
                op = "templates::resolve",
                result = "unsafe_id",
                template = %template_id,
                "Rejected template identifier"
            );
            return Ok(None);
        }

        let name = Self::file_name(template_id);
        let bytes = match tokio::fs::read(self.root.join(&name)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ResolveError::Io { name, source }),
        };

        match String::from_utf8(bytes) {
            Ok(source) => Ok(Some(TemplateSource::new(name, source))),
            Err(_) => Err(ResolveError::Encoding { name }),
        }
    }
}
