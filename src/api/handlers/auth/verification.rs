//! Email verification endpoints.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::api::handlers::{auth_error_response, error_response};
use crate::identity::{IdentityService, ResendOutcome};

use super::types::{ErrorResponse, ResendVerificationRequest, VerifyEmailRequest};

/// Redeem the emailed code and mark the address verified.
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 422, description = "Invalid or expired code", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let code = request.code.trim();
    if code.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing code");
    }

    match identity.verify_email(&request.email, code).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        // Unknown address and wrong code collapse into the same reply.
        Err(err) => auth_error_response(err, StatusCode::UNPROCESSABLE_ENTITY),
    }
}

/// Resend the verification code.
#[utoipa::path(
    post,
    path = "/auth/verify-email/resend",
    request_body = ResendVerificationRequest,
    responses(
        (status = 202, description = "Verification code resent"),
        (status = 204, description = "Nothing to send; unknown and already-verified addresses answer alike"),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    match identity.resend_verification(&request.email).await {
        Ok(ResendOutcome::Sent) => StatusCode::ACCEPTED.into_response(),
        Ok(ResendOutcome::Unknown) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNPROCESSABLE_ENTITY),
    }
}
