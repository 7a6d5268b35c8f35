use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::warn;

use crate::application::{error::HttpError, render::RenderOutcome};
use crate::domain::{fingerprint::Fingerprint, types::RenderRequest};

use super::HttpState;

pub const FINGERPRINT_HEADER: HeaderName = HeaderName::from_static("x-quire-fingerprint");
const IMMUTABLE: HeaderValue = HeaderValue::from_static("public, max-age=31536000, immutable");

pub async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn render_template(
    State(state): State<HttpState>,
    Path(template_id): Path<String>,
    body: Bytes,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::handlers::render_template";

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Request body must be a JSON object",
            &err,
        )
    })?;
    let request = RenderRequest::from_json(template_id, payload)?;
    let template_id = request.template_id.clone();

    match state
        .service
        .handle(request.template_id, request.context)
        .await
    {
        RenderOutcome::Artifact(artifact) => {
            let bytes = state.service.read_artifact(&artifact).await?.ok_or_else(|| {
                HttpError::new(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    format!("artifact {} vanished after publish", artifact.fingerprint),
                )
            })?;
            let file_name = format!("{}.{}", template_id, state.extension);
            Ok(artifact_response(
                &state,
                &artifact.fingerprint,
                bytes,
                Some(&file_name),
            ))
        }
        RenderOutcome::TemplateNotFound => Err(HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Template not found",
            format!("no template registered as `{template_id}`"),
        )),
        RenderOutcome::RenderFailed(error) => Err(error.into()),
    }
}

pub async fn fetch_artifact(
    State(state): State<HttpState>,
    Path(fingerprint): Path<String>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::handlers::fetch_artifact";

    let not_found = || {
        HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Artifact not found",
            format!("no artifact stored for `{fingerprint}`"),
        )
    };

    let parsed: Fingerprint = fingerprint.parse().map_err(|_| not_found())?;
    let bytes = state
        .service
        .fetch_artifact(&parsed)
        .await?
        .ok_or_else(not_found)?;

    Ok(artifact_response(&state, &parsed, bytes, None))
}

fn artifact_response(
    state: &HttpState,
    fingerprint: &Fingerprint,
    bytes: Bytes,
    attachment_name: Option<&str>,
) -> Response {
    let mut response = Body::from(bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, state.content_type.clone());
    headers.insert(CACHE_CONTROL, IMMUTABLE);
    if let Ok(value) = HeaderValue::from_str(&fingerprint.to_hex()) {
        headers.insert(FINGERPRINT_HEADER, value);
    }
    if let Some(name) = attachment_name {
        match HeaderValue::from_str(&content_disposition(name)) {
            Ok(value) => {
                headers.insert(CONTENT_DISPOSITION, value);
            }
            Err(err) => warn!(
                target = "quire::http::handlers",
                fingerprint = %fingerprint,
                file_name = name,
                error = %err,
                "Omitting unrepresentable Content-Disposition header"
            ),
        }
    }
    response
}

/// Attachment header with an ASCII `filename` and, for non-ASCII names, an
/// RFC 5987 `filename*` carrying the exact UTF-8 name.
fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() || !ch.is_ascii() => '_',
            ch => ch,
        })
        .collect();
    if file_name.is_ascii() {
        return format!("attachment; filename=\"{fallback}\"");
    }
    let exact: String = file_name.chars().filter(|ch| !ch.is_control()).collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(&exact)
    )
}

/// Media type served for artifacts with the given file extension.
pub fn content_type_for(extension: &str) -> HeaderValue {
    match extension.to_ascii_lowercase().as_str() {
        "pdf" => HeaderValue::from_static("application/pdf"),
        "html" | "htm" => HeaderValue::from_static("text/html; charset=utf-8"),
        "txt" | "tex" => HeaderValue::from_static("text/plain; charset=utf-8"),
        "png" => HeaderValue::from_static("image/png"),
        "svg" => HeaderValue::from_static("image/svg+xml"),
        _ => HeaderValue::from_static("application/octet-stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_neutralises_quotes() {
        assert_eq!(
            content_disposition("in\"voice.pdf"),
            "attachment; filename=\"in_voice.pdf\""
        );
    }

    #[test]
    fn disposition_encodes_non_ascii_names() {
        let value = content_disposition("Zoë-税.pdf");
        assert_eq!(
            value,
            "attachment; filename=\"Zo_-_.pdf\"; filename*=UTF-8''Zo%C3%AB-%E7%A8%8E.pdf"
        );
        assert!(HeaderValue::from_str(&value).is_ok());
    }

    #[test]
    fn pdf_extension_maps_to_pdf_media_type() {
        assert_eq!(content_type_for("PDF"), "application/pdf");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
