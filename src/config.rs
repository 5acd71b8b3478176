//! Challenge and session policy knobs.
//!
//! Values only; where they come from (CLI flags, environment) is the CLI
//! layer's concern. Everything here has a default so tests can build a
//! config without touching the environment.

const DEFAULT_OTP_LENGTH: usize = 6;
const DEFAULT_OTP_ALPHABET: &str = "0123456789";
const DEFAULT_OTP_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_RESEND_INTERVAL_SECONDS: i64 = 30;
const DEFAULT_GRANT_TTL_SECONDS: i64 = 2 * 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RETENTION_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_PENDING_LOGIN_TTL_SECONDS: u64 = 10 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    otp_length: usize,
    otp_alphabet: String,
    otp_ttl_seconds: i64,
    max_attempts: i32,
    resend_interval_seconds: i64,
    grant_ttl_seconds: i64,
    session_ttl_seconds: i64,
    retention_seconds: i64,
    pending_login_ttl_seconds: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            otp_length: DEFAULT_OTP_LENGTH,
            otp_alphabet: DEFAULT_OTP_ALPHABET.to_string(),
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            resend_interval_seconds: DEFAULT_RESEND_INTERVAL_SECONDS,
            grant_ttl_seconds: DEFAULT_GRANT_TTL_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            retention_seconds: DEFAULT_RETENTION_SECONDS,
            pending_login_ttl_seconds: DEFAULT_PENDING_LOGIN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_otp_length(mut self, length: usize) -> Self {
        self.otp_length = length;
        self
    }

    #[must_use]
    pub fn with_otp_alphabet(mut self, alphabet: String) -> Self {
        self.otp_alphabet = alphabet;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_resend_interval_seconds(mut self, seconds: i64) -> Self {
        self.resend_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_grant_ttl_seconds(mut self, seconds: i64) -> Self {
        self.grant_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_retention_seconds(mut self, seconds: i64) -> Self {
        self.retention_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_pending_login_ttl_seconds(mut self, seconds: u64) -> Self {
        self.pending_login_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn otp_length(&self) -> usize {
        self.otp_length
    }

    #[must_use]
    pub fn otp_alphabet(&self) -> &str {
        &self.otp_alphabet
    }

    #[must_use]
    pub fn otp_ttl_seconds(&self) -> i64 {
        self.otp_ttl_seconds
    }

    #[must_use]
    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    #[must_use]
    pub fn resend_interval_seconds(&self) -> i64 {
        self.resend_interval_seconds
    }

    #[must_use]
    pub fn grant_ttl_seconds(&self) -> i64 {
        self.grant_ttl_seconds
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub fn retention_seconds(&self) -> i64 {
        self.retention_seconds
    }

    #[must_use]
    pub fn pending_login_ttl_seconds(&self) -> u64 {
        self.pending_login_ttl_seconds
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::AuthConfig;

    #[test]
    fn defaults_and_overrides() {
        let config = AuthConfig::new();

        assert_eq!(config.otp_length(), super::DEFAULT_OTP_LENGTH);
        assert_eq!(config.otp_alphabet(), super::DEFAULT_OTP_ALPHABET);
        assert_eq!(config.otp_ttl_seconds(), super::DEFAULT_OTP_TTL_SECONDS);
        assert_eq!(config.max_attempts(), super::DEFAULT_MAX_ATTEMPTS);
        assert_eq!(
            config.resend_interval_seconds(),
            super::DEFAULT_RESEND_INTERVAL_SECONDS
        );
        assert_eq!(config.grant_ttl_seconds(), super::DEFAULT_GRANT_TTL_SECONDS);
        assert_eq!(
            config.session_ttl_seconds(),
            super::DEFAULT_SESSION_TTL_SECONDS
        );
        assert_eq!(config.retention_seconds(), super::DEFAULT_RETENTION_SECONDS);

        let config = config
            .with_otp_length(8)
            .with_otp_alphabet("ABCDEF".to_string())
            .with_otp_ttl_seconds(60)
            .with_max_attempts(3)
            .with_resend_interval_seconds(5)
            .with_grant_ttl_seconds(30)
            .with_session_ttl_seconds(3600)
            .with_retention_seconds(7200)
            .with_pending_login_ttl_seconds(42);

        assert_eq!(config.otp_length(), 8);
        assert_eq!(config.otp_alphabet(), "ABCDEF");
        assert_eq!(config.otp_ttl_seconds(), 60);
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.resend_interval_seconds(), 5);
        assert_eq!(config.grant_ttl_seconds(), 30);
        assert_eq!(config.session_ttl_seconds(), 3600);
        assert_eq!(config.retention_seconds(), 7200);
        assert_eq!(config.pending_login_ttl_seconds(), 42);
    }
}
