//! Email delivery through the [Resend](https://resend.com) HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

use crate::challenge::Purpose;
use crate::error::AuthError;

use super::CodeSender;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

// Codes are useless once expired; a slow provider should fail the request
// rather than hold the auth flow open.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ResendCodeSender {
    client: Client,
    api_key: SecretString,
    from: String,
}

impl ResendCodeSender {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(api_key: SecretString, from: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(SEND_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            from,
        })
    }
}

fn resend_error_message(json_response: &Value) -> &str {
    json_response
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
}

fn format_ttl(ttl_seconds: i64) -> String {
    match ttl_seconds {
        60 => "1 minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} minutes", s / 60),
        s => format!("{s} seconds"),
    }
}

fn subject(purpose: &Purpose) -> String {
    format!("{} code", purpose.label())
}

fn body_text(purpose: &Purpose, code: &str, ttl_seconds: i64) -> String {
    format!(
        "Your {} code is {code}. It expires in {}.\n\n\
         If you did not request this code, you can ignore this email.",
        purpose.label().to_lowercase(),
        format_ttl(ttl_seconds)
    )
}

#[async_trait]
impl CodeSender for ResendCodeSender {
    async fn send_code(
        &self,
        email: &str,
        purpose: &Purpose,
        code: &str,
        ttl_seconds: i64,
    ) -> Result<(), AuthError> {
        let payload = json!({
            "from": self.from,
            "to": [email],
            "subject": subject(purpose),
            "text": body_text(purpose, code, ttl_seconds),
        });

        let response = self
            .client
            .post(RESEND_API_URL)
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                error!("Failed to reach delivery provider: {err}");
                AuthError::DeliveryUnavailable
            })?;

        let status = response.status();
        if !status.is_success() {
            let json_response: Value = response.json().await.unwrap_or(Value::Null);
            error!(
                "Delivery provider refused send: {status}, {}",
                resend_error_message(&json_response)
            );
            return Err(AuthError::DeliveryUnavailable);
        }

        info!(purpose = purpose.label(), "one-time code dispatched");
        Ok(())
    }
}
