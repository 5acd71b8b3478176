//! Outbound delivery of one-time codes.
//!
//! A failed send means the code never reached its channel; the challenge it
//! belongs to stays open so a resend can recover without restarting the flow.

use async_trait::async_trait;
use tracing::info;

use crate::challenge::Purpose;
use crate::error::AuthError;

pub mod resend;

pub use resend::ResendCodeSender;

/// Hands a plaintext code to an out-of-band channel.
#[async_trait]
pub trait CodeSender: Send + Sync {
    /// # Errors
    ///
    /// [`AuthError::DeliveryUnavailable`] when the channel refuses or cannot
    /// be reached.
    async fn send_code(
        &self,
        email: &str,
        purpose: &Purpose,
        code: &str,
        ttl_seconds: i64,
    ) -> Result<(), AuthError>;
}

/// Development sender: codes go to the log stream and nowhere else.
///
/// Selected when no delivery credentials are configured, so a local instance
/// is usable end to end without an email provider.
pub struct LogCodeSender;

#[async_trait]
impl CodeSender for LogCodeSender {
    async fn send_code(
        &self,
        email: &str,
        purpose: &Purpose,
        code: &str,
        ttl_seconds: i64,
    ) -> Result<(), AuthError> {
        info!(
            email,
            purpose = purpose.label(),
            code,
            ttl_seconds,
            "one-time code (log delivery)"
        );
        Ok(())
    }
}
