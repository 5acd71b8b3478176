//! User-facing error taxonomy.
//!
//! Every challenge or session failure is collapsed into one of these variants
//! before it reaches a client. The internal reason (wrong code vs expired vs
//! locked, unknown email vs wrong password) is logged but never distinguished
//! in a response, so the API cannot be used as an oracle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown email, wrong password, or unverified address.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Wrong, expired, already consumed, locked, or session-mismatched code.
    #[error("Invalid or expired code")]
    InvalidOrExpiredCode,

    /// Challenge issuance requested again before the minimum interval elapsed.
    #[error("Rate limited")]
    RateLimited,

    /// The delivery gateway failed; the challenge stands and a resend is safe.
    #[error("Code delivery unavailable")]
    DeliveryUnavailable,

    /// Missing, unknown, or expired session token.
    #[error("Invalid or expired session")]
    SessionInvalid,

    /// Missing, consumed, or mismatched operation grant.
    #[error("Invalid or expired operation grant")]
    GrantInvalid,

    /// Storage or other infrastructure failure; detail stays in the logs.
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable label, used in logs and metrics fields.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidOrExpiredCode => "invalid_or_expired_code",
            Self::RateLimited => "rate_limited",
            Self::DeliveryUnavailable => "delivery_unavailable",
            Self::SessionInvalid => "session_invalid",
            Self::GrantInvalid => "grant_invalid",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuthError;

    #[test]
    fn messages_stay_generic() {
        // These strings are part of the API contract; they must not name the
        // failing factor or check.
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid credentials"
        );
        assert_eq!(
            AuthError::InvalidOrExpiredCode.to_string(),
            "Invalid or expired code"
        );
        assert_eq!(
            AuthError::Internal(anyhow::anyhow!("connection reset")).to_string(),
            "Internal error"
        );
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(AuthError::RateLimited.label(), "rate_limited");
        assert_eq!(AuthError::SessionInvalid.label(), "session_invalid");
        assert_eq!(AuthError::GrantInvalid.label(), "grant_invalid");
        assert_eq!(AuthError::DeliveryUnavailable.label(), "delivery_unavailable");
    }
}
