use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

use super::handlers::FINGERPRINT_HEADER;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Which part of the gateway a request path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind<'a> {
    Health,
    Artifact,
    Render { template: &'a str },
}

impl RouteKind<'_> {
    fn classify(path: &str) -> RouteKind<'_> {
        match path {
            "/_health" => RouteKind::Health,
            path if path.starts_with("/artifacts/") => RouteKind::Artifact,
            path => RouteKind::Render {
                template: path.trim_start_matches('/'),
            },
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RouteKind::Health => "health",
            RouteKind::Artifact => "artifact",
            RouteKind::Render { .. } => "render",
        }
    }

    fn template(&self) -> &str {
        match self {
            RouteKind::Render { template } => *template,
            _ => "",
        }
    }
}

/// Log every gateway response with its route, template and cache key; error
/// responses also carry the attached [`ErrorReport`].
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let route = RouteKind::classify(uri.path());
    let fingerprint = response
        .headers()
        .get(FINGERPRINT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if !(status.is_client_error() || status.is_server_error()) {
        if route != RouteKind::Health {
            debug!(
                target = "quire::http::response",
                status = status.as_u16(),
                method = %method,
                route = route.name(),
                template = route.template(),
                fingerprint = %fingerprint,
                elapsed_ms,
                request_id = %request_id,
                "request served",
            );
        }
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let (source, messages) = match report {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    if status.is_server_error() {
        error!(
            target = "quire::http::response",
            status = status.as_u16(),
            method = %method,
            route = route.name(),
            template = route.template(),
            path = %uri.path(),
            elapsed_ms,
            source,
            detail = %detail,
            chain = ?messages,
            request_id = %request_id,
            "request failed",
        );
    } else {
        warn!(
            target = "quire::http::response",
            status = status.as_u16(),
            method = %method,
            route = route.name(),
            template = route.template(),
            path = %uri.path(),
            elapsed_ms,
            source,
            detail = %detail,
            request_id = %request_id,
            "client request error",
        );
    }

    response
}
