//! HTTP authentication
//!
//! WebSocket clients authenticate in-band through the gate. HTTP routes that
//! need a caller use the [`BearerUser`] extractor instead, which verifies the
//! `Authorization: Bearer` header with the same verifier.

use axum::{
    Json,
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
};
use fanout_auth::error::ErrorResponse;
use fanout_auth::{AuthError, Identity};

use crate::AppState;

/// Caller identity verified from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct BearerUser(pub Identity);

/// Why an HTTP request was refused.
#[derive(Debug)]
pub enum ApiAuthError {
    MissingCredentials,
    Rejected(AuthError),
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiAuthError::MissingCredentials => ErrorResponse {
                error: "missing_credentials".into(),
                message: "Authorization header with a bearer token is required".into(),
            },
            ApiAuthError::Rejected(e) => ErrorResponse::from(e),
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl axum::extract::FromRequestParts<AppState> for BearerUser {
    type Rejection = ApiAuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiAuthError::MissingCredentials)?;
        if !header.trim_start().starts_with("Bearer ") {
            return Err(ApiAuthError::MissingCredentials);
        }
        state
            .verifier
            .verify(header)
            .map(BearerUser)
            .map_err(ApiAuthError::Rejected)
    }
}
