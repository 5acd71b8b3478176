//! Session introspection and logout.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::api::handlers::{auth_error_response, bearer_token, require_session};
use crate::session::SessionManager;

use super::types::{ErrorResponse, SessionResponse};

/// Describe the session behind the bearer token.
#[utoipa::path(
    get,
    path = "/auth/session",
    responses(
        (status = 200, description = "Session is live", body = SessionResponse),
        (status = 401, description = "Missing, unknown, or expired session token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    let session = match require_session(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    (
        StatusCode::OK,
        Json(SessionResponse {
            identity_id: session.identity_id.to_string(),
            created_at: session.created_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
            mfa_satisfied: session.mfa_satisfied,
        }),
    )
        .into_response()
}

/// End the session. Idempotent: unknown and missing tokens answer 204 too.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session ended (or was already gone)")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };

    match sessions.logout(token).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNAUTHORIZED),
    }
}
