//! Account registration endpoint.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::api::handlers::{auth_error_response, error_response};
use crate::identity::{IdentityService, RegisterError};

use super::types::{ErrorResponse, RegisterRequest, RegisterResponse};

/// Create an account and send its email-verification code.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification code sent", body = RegisterResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 422, description = "Invalid email or weak password", body = ErrorResponse),
        (status = 502, description = "Code delivery unavailable; the account exists and resend recovers", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_response(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    match identity.register(&request.email, &request.password).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                id: created.id.to_string(),
                email: created.email,
            }),
        )
            .into_response(),
        Err(RegisterError::Auth(err)) => {
            auth_error_response(err, StatusCode::UNPROCESSABLE_ENTITY)
        }
        Err(err) => {
            let status = match err {
                RegisterError::EmailTaken => StatusCode::CONFLICT,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            error_response(status, err.to_string())
        }
    }
}
