//! API handlers and shared utilities for Konfirmo.
//!
//! This module organizes the service's route handlers and provides common
//! helpers for bearer-token extraction and error-to-status mapping.

pub mod auth;
pub mod health;
pub mod root;
pub mod stepup;

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use tracing::error;

use crate::error::AuthError;
use crate::session::{Session, SessionManager};

pub use auth::types::ErrorResponse;

/// Where the server persists state; `/health` pings Postgres when present.
#[derive(Clone)]
pub enum Backend {
    Postgres(PgPool),
    Memory,
}

/// Extract the bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Uniform error body: `{"error": "<message>"}`.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Map an [`AuthError`] to a response.
///
/// [`AuthError::InvalidOrExpiredCode`] has no single status: login endpoints
/// answer 401 while verification and step-up confirmation answer 422, so each
/// call site picks via `invalid_code`.
pub(crate) fn auth_error_response(err: AuthError, invalid_code: StatusCode) -> Response {
    let status = match &err {
        AuthError::InvalidCredentials | AuthError::SessionInvalid => StatusCode::UNAUTHORIZED,
        AuthError::InvalidOrExpiredCode => invalid_code,
        AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        AuthError::DeliveryUnavailable => StatusCode::BAD_GATEWAY,
        AuthError::GrantInvalid => StatusCode::FORBIDDEN,
        AuthError::Internal(inner) => {
            error!("internal error: {inner:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, err.to_string())
}

/// Resolve the bearer token into a live session or produce the 401 response.
pub(crate) async fn require_session(
    headers: &HeaderMap,
    sessions: &SessionManager,
) -> Result<Session, Response> {
    let Some(token) = bearer_token(headers) else {
        return Err(auth_error_response(
            AuthError::SessionInvalid,
            StatusCode::UNAUTHORIZED,
        ));
    };
    sessions
        .resolve(token)
        .await
        .map_err(|err| auth_error_response(err, StatusCode::UNAUTHORIZED))
}
