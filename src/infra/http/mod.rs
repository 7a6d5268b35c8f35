//! HTTP gateway: routing, shared-secret authentication and CORS in front of
//! the render service.

mod auth;
mod handlers;
mod middleware;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::application::render::RenderService;

pub use auth::SharedSecrets;
pub use handlers::{FINGERPRINT_HEADER, content_type_for};
pub use middleware::REQUEST_ID_HEADER;

#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<RenderService>,
    pub auth: Arc<SharedSecrets>,
    /// Artifact file extension, used for download names.
    pub extension: Arc<str>,
    pub content_type: HeaderValue,
}

impl HttpState {
    pub fn new(service: Arc<RenderService>, auth: SharedSecrets, extension: &str) -> Self {
        Self {
            service,
            auth: Arc::new(auth),
            extension: Arc::from(extension),
            content_type: content_type_for(extension),
        }
    }
}

/// Transport limits and cross-origin policy applied to every route.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub max_request_bytes: usize,
    pub cors_origins: Vec<HeaderValue>,
}

pub fn build_router(state: HttpState, options: RouterOptions) -> Router {
    let protected = Router::new()
        .route("/artifacts/{fingerprint}", get(handlers::fetch_artifact))
        .route("/{template_id}", post(handlers::render_template))
        .route_layer(from_fn_with_state(state.clone(), auth::require_shared_secret));

    Router::new()
        .route("/_health", get(handlers::health))
        .merge(protected)
        .layer(DefaultBodyLimit::max(options.max_request_bytes))
        .with_state(state)
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(middleware::set_request_context))
        .layer(cors_layer(options.cors_origins))
}

fn cors_layer(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_DISPOSITION, FINGERPRINT_HEADER])
}
