use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::server::error::ApiError;

/// Shared-secret bearer authentication
///
/// Rejects the request with 401 before any handler runs unless the
/// Authorization header is exactly `Bearer <secret>`.
pub async fn bearer_auth_middleware(
    secret: Arc<str>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match extract_bearer_token(&request) {
        Some(token) if constant_time_eq(token.as_bytes(), secret.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            debug!(path = %request.uri().path(), "invalid bearer token");
            ApiError::Unauthorized.into_response()
        }
        None => {
            debug!(path = %request.uri().path(), "missing bearer token");
            ApiError::Unauthorized.into_response()
        }
    }
}

fn extract_bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Time depends only on the presented token's length, never the secret's.
fn constant_time_eq(presented: &[u8], secret: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }
    let length_mismatch = u8::from(presented.len() != secret.len());
    presented
        .iter()
        .enumerate()
        .fold(length_mismatch, |acc, (i, byte)| acc | (byte ^ secret[i % secret.len()]))
        == 0
}
