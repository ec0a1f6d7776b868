//! Credential extraction and HTTP rejections for handshakes.

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::Deserialize;
use smt_auth::{AuthRejection, IdentityVerifier, VerifiedIdentity};
use smt_core::Role;
use smt_core::errors::AUTH_REJECTED;
use tracing::info;

use crate::metrics::AUTH_REJECTIONS_TOTAL;

/// `?token=` query parameter (EventSource cannot set headers).
#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    /// Bearer token.
    pub token: Option<String>,
}

/// A rejected handshake, rendered as `401` (`403` for a disallowed role).
#[derive(Debug)]
pub struct AuthFailure(pub AuthRejection);

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        let status = match self.0 {
            AuthRejection::RoleNotPermitted { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = serde_json::json!({
            "error": {
                "code": AUTH_REJECTED,
                "reason": self.0.reason(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Token from `Authorization: Bearer`, else from the query string.
pub fn extract_token(headers: &HeaderMap, query: &TokenQuery) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty());
    from_header
        .map(str::to_owned)
        .or_else(|| query.token.clone().filter(|t| !t.trim().is_empty()))
}

/// Verify the request's credential against `allowed` roles.
pub fn authenticate(
    verifier: &IdentityVerifier,
    headers: &HeaderMap,
    query: &TokenQuery,
    allowed: &[Role],
) -> Result<VerifiedIdentity, AuthFailure> {
    let result = match extract_token(headers, query) {
        Some(token) => verifier.verify_for_roles(&token, allowed),
        None => Err(AuthRejection::Missing),
    };
    result.map_err(|rejection| {
        counter!(AUTH_REJECTIONS_TOTAL, "reason" => rejection.reason()).increment(1);
        info!(reason = rejection.reason(), "handshake rejected");
        AuthFailure(rejection)
    })
}
