//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterResponse {
    pub id: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub login_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginOtpRequest {
    pub login_id: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResendRequest {
    pub login_id: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionTokenResponse {
    pub token: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub identity_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub mfa_satisfied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn register_request_round_trips() -> Result<()> {
        let request = RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "hunter2hunter2".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: RegisterRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.password, "hunter2hunter2");
        Ok(())
    }

    #[test]
    fn login_otp_request_uses_snake_case_keys() -> Result<()> {
        let request: LoginOtpRequest = serde_json::from_str(
            r#"{"login_id":"00000000-0000-0000-0000-000000000000","code":"123456"}"#,
        )?;
        assert_eq!(request.code, "123456");
        Ok(())
    }

    #[test]
    fn session_token_response_round_trips() -> Result<()> {
        let response = SessionTokenResponse {
            token: "opaque".to_string(),
            expires_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let value = serde_json::to_value(&response)?;
        let expires_at = value
            .get("expires_at")
            .and_then(serde_json::Value::as_str)
            .context("missing expires_at")?;
        assert_eq!(expires_at, "2026-01-01T00:00:00+00:00");
        Ok(())
    }

    #[test]
    fn error_response_has_single_error_key() -> Result<()> {
        let response = ErrorResponse {
            error: "Invalid credentials".to_string(),
        };
        let value = serde_json::to_value(&response)?;
        let object = value.as_object().context("not an object")?;
        assert_eq!(object.len(), 1);
        assert_eq!(
            object.get("error").and_then(serde_json::Value::as_str),
            Some("Invalid credentials")
        );
        Ok(())
    }
}
