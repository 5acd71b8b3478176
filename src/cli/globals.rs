use secrecy::SecretString;

/// Settings shared across the server wiring: secrets and delivery knobs.
/// Challenge policy lives in [`crate::config::AuthConfig`] instead.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    /// Server-side pepper mixed into every code hash.
    pub code_pepper: SecretString,
    /// Resend API key; absent means codes go to the log instead of email.
    pub resend_api_key: Option<SecretString>,
    pub email_from: String,
    pub frontend_url: String,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(code_pepper: SecretString, email_from: String, frontend_url: String) -> Self {
        Self {
            code_pepper,
            resend_api_key: None,
            email_from,
            frontend_url,
        }
    }

    pub fn set_resend_api_key(&mut self, key: SecretString) {
        self.resend_api_key = Some(key);
    }
}
