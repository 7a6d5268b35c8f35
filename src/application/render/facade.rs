use bytes::Bytes;

use crate::application::ports::StorageError;
use crate::domain::fingerprint::Fingerprint;
use crate::domain::types::{ArtifactRef, RenderContext, RenderRequest, TemplateId};

use super::pipeline::RenderPipeline;
use super::types::RenderOutcome;

/// Entry point used by the HTTP gateway and the offline `render` command.
#[derive(Clone)]
pub struct RenderService {
    pipeline: RenderPipeline,
}

impl RenderService {
    pub fn new(pipeline: RenderPipeline) -> Self {
        Self { pipeline }
    }

    pub async fn handle(
        &self,
        template_id: impl Into<TemplateId>,
        context: RenderContext,
    ) -> RenderOutcome {
        self.pipeline
            .render(RenderRequest::new(template_id.into(), context))
            .await
    }

    pub async fn fetch_artifact(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<Bytes>, StorageError> {
        self.pipeline.store().fetch(fingerprint).await
    }

    pub async fn read_artifact(
        &self,
        artifact: &ArtifactRef,
    ) -> Result<Option<Bytes>, StorageError> {
        self.fetch_artifact(&artifact.fingerprint).await
    }
}
