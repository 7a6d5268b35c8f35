use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use crate::application::ports::{ArtifactStore, DocumentCompiler, TemplateEngine, TemplateResolver};
use crate::domain::fingerprint::Fingerprint;
use crate::domain::types::{ArtifactRef, RenderRequest};

use super::runtime::InFlightRenders;
use super::types::{RenderError, RenderOutcome};

const TARGET: &str = "application::render::pipeline";

/// Resolve → expand → compile → publish, keyed by request fingerprint.
///
/// A published artifact is served without touching the template engine or the
/// compiler. Misses for the same fingerprint are coalesced onto a single
/// execution through [`InFlightRenders`].
#[derive(Clone)]
pub struct RenderPipeline {
    resolver: Arc<dyn TemplateResolver>,
    engine: Arc<dyn TemplateEngine>,
    compiler: Arc<dyn DocumentCompiler>,
    store: Arc<dyn ArtifactStore>,
    flights: InFlightRenders,
}

impl RenderPipeline {
    pub fn new(
        resolver: Arc<dyn TemplateResolver>,
        engine: Arc<dyn TemplateEngine>,
        compiler: Arc<dyn DocumentCompiler>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            resolver,
            engine,
            compiler,
            store,
            flights: InFlightRenders::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn in_flight(&self) -> &InFlightRenders {
        &self.flights
    }

    pub async fn render(&self, request: RenderRequest) -> RenderOutcome {
        let started_at = Instant::now();
        let fingerprint = request.fingerprint();

        match self.store.lookup(&fingerprint).await {
            Ok(Some(artifact)) => {
                counter!("quire_render_cache_hit_total").increment(1);
                info!(
                    target = TARGET,
                    op = "render::lookup",
                    result = "cache_hit",
                    template = %request.template_id,
                    fingerprint = %fingerprint,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "Artifact served from cache"
                );
                return RenderOutcome::Artifact(artifact);
            }
            Ok(None) => {
                counter!("quire_render_cache_miss_total").increment(1);
            }
            Err(err) => {
                let error = RenderError::from(err);
                record_failure(&request, &fingerprint, &error, started_at);
                return RenderOutcome::RenderFailed(error);
            }
        }

        let pipeline = self.clone();
        let flight = self
            .flights
            .join_or_start(fingerprint, move || pipeline.execute(fingerprint, request));

        if !flight.is_leader() {
            counter!("quire_render_coalesced_total").increment(1);
            debug!(
                target = TARGET,
                op = "render::single_flight",
                result = "joined",
                fingerprint = %fingerprint,
                "Waiting for in-flight render"
            );
        }

        flight.wait().await
    }

    async fn execute(self, fingerprint: Fingerprint, request: RenderRequest) -> RenderOutcome {
        let started_at = Instant::now();
        match self.produce(&fingerprint, &request).await {
            Ok(Some(artifact)) => RenderOutcome::Artifact(artifact),
            Ok(None) => {
                counter!("quire_render_not_found_total").increment(1);
                info!(
                    target = TARGET,
                    op = "render::resolve",
                    result = "not_found",
                    template = %request.template_id,
                    fingerprint = %fingerprint,
                    "Template not found"
                );
                RenderOutcome::TemplateNotFound
            }
            Err(error) => {
                record_failure(&request, &fingerprint, &error, started_at);
                RenderOutcome::RenderFailed(error)
            }
        }
    }

    async fn produce(
        &self,
        fingerprint: &Fingerprint,
        request: &RenderRequest,
    ) -> Result<Option<ArtifactRef>, RenderError> {
        let started_at = Instant::now();

        // A render that finished between our lookup and joining the flight
        // registry has already published.
        if let Some(artifact) = self.store.lookup(fingerprint).await? {
            return Ok(Some(artifact));
        }

        let Some(template) = self.resolver.resolve(&request.template_id).await? else {
            return Ok(None);
        };

        let engine = Arc::clone(&self.engine);
        let context = request.context.clone();
        let intermediate = tokio::task::spawn_blocking(move || engine.expand(&template, &context))
            .await
            .map_err(|err| RenderError::aborted(format!("template expansion task: {err}")))??;

        let compile_started_at = Instant::now();
        let bytes = self.compiler.compile(&intermediate).await?;
        let compile_ms = compile_started_at.elapsed().as_millis() as u64;
        histogram!("quire_render_compile_ms").record(compile_ms as f64);

        let artifact_bytes = bytes.len();
        let artifact = self.store.publish(fingerprint, bytes).await?;
        counter!("quire_render_published_total").increment(1);

        info!(
            target = TARGET,
            op = "render::publish",
            result = "cache_miss",
            template = %request.template_id,
            fingerprint = %fingerprint,
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            compile_ms,
            artifact_bytes,
            path = %artifact.path().display(),
            "Artifact rendered and published"
        );

        Ok(Some(artifact))
    }
}

fn record_failure(
    request: &RenderRequest,
    fingerprint: &Fingerprint,
    error: &RenderError,
    started_at: Instant,
) {
    counter!("quire_render_failed_total", "kind" => error.kind()).increment(1);
    warn!(
        target = TARGET,
        op = "render",
        result = "error",
        error_code = error.kind(),
        template = %request.template_id,
        fingerprint = %fingerprint,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        error = %error,
        "Render failed"
    );
}
