//! Step-up endpoints: operation challenges, grants, and the stub operations
//! they gate.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::handlers::{auth_error_response, error_response, require_session};
use crate::challenge::Operation;
use crate::error::AuthError;
use crate::session::SessionManager;
use crate::stepup::StepUpAuthorizer;

use super::auth::types::ErrorResponse;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StepUpRequireRequest {
    pub operation: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StepUpChallengeResponse {
    pub challenge_id: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StepUpConfirmRequest {
    pub challenge_id: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GrantResponse {
    pub grant: String,
    pub operation: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExecuteOperationRequest {
    pub grant: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ExecuteOperationResponse {
    pub operation: String,
    pub status: String,
}

/// Open a session-bound challenge for a sensitive operation and deliver its
/// code.
#[utoipa::path(
    post,
    path = "/stepup/require",
    request_body = StepUpRequireRequest,
    responses(
        (status = 201, description = "Challenge opened, code sent", body = StepUpChallengeResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 422, description = "Unknown operation", body = ErrorResponse),
        (status = 429, description = "Rate limited; the open challenge stands", body = ErrorResponse),
        (status = 502, description = "Code delivery unavailable", body = ErrorResponse)
    ),
    tag = "stepup"
)]
pub async fn require_stepup(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    stepup: Extension<Arc<StepUpAuthorizer>>,
    payload: Option<Json<StepUpRequireRequest>>,
) -> impl IntoResponse {
    let request: StepUpRequireRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let Some(operation) = Operation::parse(request.operation.trim()) else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Unknown operation");
    };

    let session = match require_session(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match stepup.require(&session, operation).await {
        Ok(challenge) => (
            StatusCode::CREATED,
            Json(StepUpChallengeResponse {
                challenge_id: challenge.id.to_string(),
                expires_at: challenge.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNPROCESSABLE_ENTITY),
    }
}

/// Redeem the step-up code for a single-use operation grant.
#[utoipa::path(
    post,
    path = "/stepup/confirm",
    request_body = StepUpConfirmRequest,
    responses(
        (status = 201, description = "Grant minted", body = GrantResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 422, description = "Invalid or expired code", body = ErrorResponse)
    ),
    tag = "stepup"
)]
pub async fn confirm_stepup(
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    stepup: Extension<Arc<StepUpAuthorizer>>,
    payload: Option<Json<StepUpConfirmRequest>>,
) -> impl IntoResponse {
    let request: StepUpConfirmRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    // A malformed challenge_id reads the same as an unknown one.
    let Ok(challenge_id) = Uuid::parse_str(request.challenge_id.trim()) else {
        return auth_error_response(
            AuthError::InvalidOrExpiredCode,
            StatusCode::UNPROCESSABLE_ENTITY,
        );
    };

    let session = match require_session(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match stepup.confirm(&session, challenge_id, &request.code).await {
        Ok(minted) => (
            StatusCode::CREATED,
            Json(GrantResponse {
                grant: minted.token,
                operation: minted.grant.operation.as_str().to_string(),
                expires_at: minted.grant.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNPROCESSABLE_ENTITY),
    }
}

/// Execute a gated operation: spend the grant, then acknowledge.
///
/// No business effect runs here; the endpoint exists so the grant is consumed
/// atomically ahead of whatever the operation would do.
#[utoipa::path(
    post,
    path = "/operations/{operation}",
    params(
        ("operation" = String, Path, description = "Operation name, e.g. transfer_external")
    ),
    request_body = ExecuteOperationRequest,
    responses(
        (status = 200, description = "Grant consumed, operation acknowledged", body = ExecuteOperationResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 403, description = "Missing, spent, or out-of-scope grant", body = ErrorResponse),
        (status = 404, description = "Unknown operation", body = ErrorResponse)
    ),
    tag = "stepup"
)]
pub async fn execute_operation(
    Path(operation): Path<String>,
    headers: HeaderMap,
    sessions: Extension<Arc<SessionManager>>,
    stepup: Extension<Arc<StepUpAuthorizer>>,
    payload: Option<Json<ExecuteOperationRequest>>,
) -> impl IntoResponse {
    let Some(operation) = Operation::parse(operation.trim()) else {
        return error_response(StatusCode::NOT_FOUND, "Unknown operation");
    };

    let request: ExecuteOperationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let session = match require_session(&headers, &sessions).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    match stepup
        .consume_grant(&session, operation, &request.grant)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(ExecuteOperationResponse {
                operation: operation.as_str().to_string(),
                status: "accepted".to_string(),
            }),
        )
            .into_response(),
        Err(err) => auth_error_response(err, StatusCode::FORBIDDEN),
    }
}
