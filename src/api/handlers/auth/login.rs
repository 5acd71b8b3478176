//! Two-step login endpoints: password first, then the delivered code.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::handlers::{auth_error_response, error_response};
use crate::error::AuthError;
use crate::login::LoginFlow;

use super::types::{
    ErrorResponse, LoginOtpRequest, LoginRequest, LoginResendRequest, LoginResponse,
    SessionTokenResponse,
};

/// First factor. On success a login code is delivered out-of-band and the
/// returned `login_id` names the pending ceremony.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Password accepted, login code sent", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse),
        (status = 502, description = "Code delivery unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    flow: Extension<Arc<LoginFlow>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    match flow
        .submit_password(&request.email, &request.password)
        .await
    {
        Ok(login_id) => (
            StatusCode::OK,
            Json(LoginResponse {
                login_id: login_id.to_string(),
            }),
        )
            .into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNAUTHORIZED),
    }
}

/// Second factor. Redeems the delivered code for a session token.
#[utoipa::path(
    post,
    path = "/auth/login/otp",
    request_body = LoginOtpRequest,
    responses(
        (status = 200, description = "Login complete", body = SessionTokenResponse),
        (status = 401, description = "Invalid or expired code", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_otp(
    flow: Extension<Arc<LoginFlow>>,
    payload: Option<Json<LoginOtpRequest>>,
) -> impl IntoResponse {
    let request: LoginOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    // A malformed login_id reads the same as an unknown one.
    let Ok(login_id) = Uuid::parse_str(request.login_id.trim()) else {
        return auth_error_response(AuthError::InvalidOrExpiredCode, StatusCode::UNAUTHORIZED);
    };

    match flow.submit_otp(login_id, &request.code).await {
        Ok(minted) => (
            StatusCode::OK,
            Json(SessionTokenResponse {
                token: minted.token,
                expires_at: minted.session.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNAUTHORIZED),
    }
}

/// Replace the pending login's code with a fresh one.
#[utoipa::path(
    post,
    path = "/auth/login/resend",
    request_body = LoginResendRequest,
    responses(
        (status = 202, description = "Login code resent"),
        (status = 401, description = "Unknown or expired login", body = ErrorResponse),
        (status = 429, description = "Rate limited; the previous code stays live", body = ErrorResponse),
        (status = 502, description = "Code delivery unavailable", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login_resend(
    flow: Extension<Arc<LoginFlow>>,
    payload: Option<Json<LoginResendRequest>>,
) -> impl IntoResponse {
    let request: LoginResendRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let Ok(login_id) = Uuid::parse_str(request.login_id.trim()) else {
        return auth_error_response(AuthError::InvalidOrExpiredCode, StatusCode::UNAUTHORIZED);
    };

    match flow.resend(login_id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => auth_error_response(err, StatusCode::UNAUTHORIZED),
    }
}
