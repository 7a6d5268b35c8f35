//! Shared-secret authentication for the render and artifact routes.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::{Choice, ConstantTimeEq};

use crate::application::error::HttpError;

use super::HttpState;

/// The configured secrets. A request is authorised when its `Authorization`
/// header carries one of them, either bare or as a bearer token.
#[derive(Clone, Default)]
pub struct SharedSecrets {
    secrets: Vec<Vec<u8>>,
}

impl SharedSecrets {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets
                .into_iter()
                .map(|secret| secret.into().into_bytes())
                .filter(|secret| !secret.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Compare `candidate` against every secret without short-circuiting.
    pub fn verify(&self, candidate: &[u8]) -> bool {
        let mut matched = Choice::from(0);
        for secret in &self.secrets {
            matched |= secret.as_slice().ct_eq(candidate);
        }
        bool::from(matched)
    }

    pub fn authorizes(&self, header: Option<&HeaderValue>) -> bool {
        let Some(raw) = header.map(HeaderValue::as_bytes) else {
            return false;
        };
        let bearer = raw.strip_prefix(b"Bearer ").unwrap_or(raw);
        // Evaluate both forms so timing does not depend on which one matched.
        let raw_ok = self.verify(raw);
        let bearer_ok = self.verify(bearer);
        raw_ok | bearer_ok
    }
}

impl std::fmt::Debug for SharedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecrets")
            .field("count", &self.secrets.len())
            .finish()
    }
}

pub async fn require_shared_secret(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.auth.authorizes(request.headers().get(AUTHORIZATION)) {
        return HttpError::new(
            "infra::http::auth::require_shared_secret",
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or unknown shared secret",
        )
        .into_response();
    }

    next.run(request).await
}
