//! The login ceremony: password first, then a one-time code.
//!
//! Between the two steps the flow holds a pending login, an opaque server-side
//! artifact keyed by `login_id`. No session exists until the code is accepted;
//! a crash between steps costs nothing but the pending entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::challenge::{ChallengeLedger, Purpose, ValidationOutcome};
use crate::config::AuthConfig;
use crate::delivery::CodeSender;
use crate::error::AuthError;
use crate::identity::{normalize_email, verify_password};
use crate::session::{MintedSession, SessionManager};
use crate::store::IdentityStore;

// Argon2id digest of nothing in particular; verified when the email is
// unknown so both rejects cost one argon2 pass.
const DUMMY_PASSWORD_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

struct PendingLogin {
    identity_id: Uuid,
    challenge_id: Uuid,
    created_at: Instant,
}

/// Pending logins between the password and code steps, expired lazily.
struct PendingLogins {
    ttl: Duration,
    states: Mutex<HashMap<Uuid, PendingLogin>>,
}

impl PendingLogins {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn store(&self, identity_id: Uuid, challenge_id: Uuid) -> Uuid {
        let login_id = Uuid::new_v4();
        let mut states = self.states.lock().await;
        states.retain(|_, entry| entry.created_at.elapsed() < self.ttl);
        states.insert(
            login_id,
            PendingLogin {
                identity_id,
                challenge_id,
                created_at: Instant::now(),
            },
        );
        login_id
    }

    /// Remove and return the pending login; the caller decides whether it
    /// comes back. Concurrent takers get at most one entry between them.
    async fn take(&self, login_id: Uuid) -> Option<PendingLogin> {
        let mut states = self.states.lock().await;
        states
            .remove(&login_id)
            .filter(|entry| entry.created_at.elapsed() < self.ttl)
    }

    /// Put a taken entry back under its original id and age.
    async fn restore(&self, login_id: Uuid, pending: PendingLogin) {
        let mut states = self.states.lock().await;
        states.insert(login_id, pending);
    }
}

pub struct LoginFlow {
    identities: Arc<dyn IdentityStore>,
    ledger: Arc<ChallengeLedger>,
    sessions: Arc<SessionManager>,
    delivery: Arc<dyn CodeSender>,
    pending: PendingLogins,
}

impl LoginFlow {
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        ledger: Arc<ChallengeLedger>,
        sessions: Arc<SessionManager>,
        delivery: Arc<dyn CodeSender>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            identities,
            ledger,
            sessions,
            delivery,
            pending: PendingLogins::new(Duration::from_secs(config.pending_login_ttl_seconds())),
        }
    }

    /// First factor. On success a login code is delivered and an opaque
    /// `login_id` returned for the second step.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidCredentials`] for unknown email, wrong password,
    /// and unverified email alike; [`AuthError::RateLimited`] inside the
    /// resend interval; [`AuthError::DeliveryUnavailable`] when the code
    /// cannot be sent.
    pub async fn submit_password(&self, email: &str, password: &str) -> Result<Uuid, AuthError> {
        let email = normalize_email(email);
        let Some(identity) = self.identities.lookup_identity_by_email(&email).await? else {
            let _ = verify_password(password, DUMMY_PASSWORD_HASH);
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(password, &identity.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }
        if !identity.email_verified {
            return Err(AuthError::InvalidCredentials);
        }

        let opened = self
            .ledger
            .open(identity.id, Purpose::Login, None)
            .await?;
        let ttl = (opened.challenge.expires_at - opened.challenge.issued_at).num_seconds();
        self.delivery
            .send_code(&identity.email, &Purpose::Login, &opened.code, ttl)
            .await?;

        let login_id = self.pending.store(identity.id, opened.challenge.id).await;
        info!(identity_id = %identity.id, "password accepted, login code sent");
        Ok(login_id)
    }

    /// Second factor. Consumes the login code and mints the session.
    ///
    /// A wrong or expired code leaves the pending login armed for another
    /// attempt or a resend; terminal outcomes (lockout, consumed challenge)
    /// drop it, forcing a fresh password step.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidOrExpiredCode`] for every rejection.
    pub async fn submit_otp(
        &self,
        login_id: Uuid,
        code: &str,
    ) -> Result<MintedSession, AuthError> {
        let Some(pending) = self.pending.take(login_id).await else {
            return Err(AuthError::InvalidOrExpiredCode);
        };

        let outcome = self
            .ledger
            .validate(pending.challenge_id, code, None)
            .await?;
        match outcome {
            ValidationOutcome::Accepted(_) => {
                let minted = self.sessions.mint(pending.identity_id).await?;
                info!(identity_id = %pending.identity_id, "login complete");
                Ok(minted)
            }
            ValidationOutcome::WrongCode | ValidationOutcome::Expired => {
                self.pending.restore(login_id, pending).await;
                Err(AuthError::InvalidOrExpiredCode)
            }
            _ => Err(AuthError::InvalidOrExpiredCode),
        }
    }

    /// Replace the pending login's code with a fresh one.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidOrExpiredCode`] for an unknown or expired
    /// `login_id`; [`AuthError::RateLimited`] inside the resend interval (the
    /// previous code stays live).
    pub async fn resend(&self, login_id: Uuid) -> Result<(), AuthError> {
        let Some(mut pending) = self.pending.take(login_id).await else {
            return Err(AuthError::InvalidOrExpiredCode);
        };

        let Some(identity) = self.identities.lookup_identity(pending.identity_id).await? else {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "pending login references unknown identity"
            )));
        };

        let opened = match self.ledger.open(identity.id, Purpose::Login, None).await {
            Ok(opened) => opened,
            Err(err) => {
                // Throttled or failed: the prior challenge and pending login
                // both stay usable.
                self.pending.restore(login_id, pending).await;
                return Err(err);
            }
        };

        pending.challenge_id = opened.challenge.id;
        let ttl = (opened.challenge.expires_at - opened.challenge.issued_at).num_seconds();
        let sent = self
            .delivery
            .send_code(&identity.email, &Purpose::Login, &opened.code, ttl)
            .await;
        // The new challenge superseded the old one either way; the pending
        // login must point at it even when the send failed.
        self.pending.restore(login_id, pending).await;
        sent?;

        info!(identity_id = %identity.id, "login code resent");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::challenge::CodeGenerator;
    use crate::delivery::testing::RecordingSender;
    use crate::identity::hash_password;
    use crate::store::{MemoryStore, NewIdentity};
    use secrecy::SecretString;

    const PASSWORD: &str = "correct horse battery staple";

    struct Harness {
        flow: LoginFlow,
        sessions: Arc<SessionManager>,
        sender: Arc<RecordingSender>,
    }

    async fn harness_with(config: AuthConfig, verified: bool) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(RecordingSender::new());
        let codes = CodeGenerator::new(&config, SecretString::from("test-pepper"));
        let ledger = Arc::new(ChallengeLedger::new(store.clone(), codes, config.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), config.clone()));
        let flow = LoginFlow::new(
            store.clone(),
            ledger,
            sessions.clone(),
            sender.clone(),
            &config,
        );

        let identity = store
            .insert_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: "a@example.com".to_string(),
                password_hash: hash_password(PASSWORD).unwrap(),
            })
            .await
            .unwrap();
        if verified {
            store.mark_email_verified(identity.id).await.unwrap();
        }

        Harness {
            flow,
            sessions,
            sender,
        }
    }

    async fn harness(config: AuthConfig) -> Harness {
        harness_with(config, true).await
    }

    fn quiet_config() -> AuthConfig {
        AuthConfig::new().with_resend_interval_seconds(0)
    }

    #[tokio::test]
    async fn password_then_otp_creates_session() -> anyhow::Result<()> {
        let h = harness(quiet_config()).await;

        let login_id = h.flow.submit_password("A@example.com ", PASSWORD).await?;
        let sent = h.sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].purpose_label, "Login");

        let minted = h.flow.submit_otp(login_id, &sent[0].code).await?;
        let session = h.sessions.resolve(&minted.token).await?;
        assert!(session.mfa_satisfied);
        Ok(())
    }

    #[tokio::test]
    async fn bad_credentials_collapse_to_one_error() -> anyhow::Result<()> {
        let h = harness(quiet_config()).await;

        assert!(matches!(
            h.flow.submit_password("ghost@example.com", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.flow.submit_password("a@example.com", "wrong password").await,
            Err(AuthError::InvalidCredentials)
        ));
        // Neither attempt leaked a code.
        assert!(h.sender.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unverified_email_cannot_log_in() -> anyhow::Result<()> {
        let h = harness_with(quiet_config(), false).await;

        // Right password, unproven mailbox: same error as a wrong password.
        assert!(matches!(
            h.flow.submit_password("a@example.com", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(h.sender.sent().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn wrong_otp_can_be_retried() -> anyhow::Result<()> {
        let h = harness(quiet_config()).await;

        let login_id = h.flow.submit_password("a@example.com", PASSWORD).await?;
        let code = h.sender.last_code().unwrap();
        let wrong = if code.starts_with('0') {
            format!("1{}", &code[1..])
        } else {
            format!("0{}", &code[1..])
        };

        assert!(matches!(
            h.flow.submit_otp(login_id, &wrong).await,
            Err(AuthError::InvalidOrExpiredCode)
        ));
        // Same login_id, right code: still good.
        let minted = h.flow.submit_otp(login_id, &code).await?;
        assert!(h.sessions.resolve(&minted.token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn expired_otp_then_resend_succeeds() -> anyhow::Result<()> {
        let h = harness(quiet_config().with_otp_ttl_seconds(1)).await;

        let login_id = h.flow.submit_password("a@example.com", PASSWORD).await?;
        let first_code = h.sender.last_code().unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(matches!(
            h.flow.submit_otp(login_id, &first_code).await,
            Err(AuthError::InvalidOrExpiredCode)
        ));

        h.flow.resend(login_id).await?;
        let second_code = h.sender.last_code().unwrap();
        assert_ne!(first_code, second_code);

        let minted = h.flow.submit_otp(login_id, &second_code).await?;
        assert!(h.sessions.resolve(&minted.token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn resend_requires_known_login_id() -> anyhow::Result<()> {
        let h = harness(quiet_config()).await;
        assert!(matches!(
            h.flow.resend(Uuid::new_v4()).await,
            Err(AuthError::InvalidOrExpiredCode)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn throttled_resend_keeps_login_armed() -> anyhow::Result<()> {
        let h = harness(AuthConfig::new().with_resend_interval_seconds(30)).await;

        let login_id = h.flow.submit_password("a@example.com", PASSWORD).await?;
        let code = h.sender.last_code().unwrap();

        assert!(matches!(
            h.flow.resend(login_id).await,
            Err(AuthError::RateLimited)
        ));
        // The original code and pending login both survived the throttle.
        let minted = h.flow.submit_otp(login_id, &code).await?;
        assert!(h.sessions.resolve(&minted.token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn lockout_ends_the_pending_login() -> anyhow::Result<()> {
        let h = harness(quiet_config().with_max_attempts(2)).await;

        let login_id = h.flow.submit_password("a@example.com", PASSWORD).await?;
        let code = h.sender.last_code().unwrap();

        for _ in 0..2 {
            assert!(matches!(
                h.flow.submit_otp(login_id, "000000!").await,
                Err(AuthError::InvalidOrExpiredCode)
            ));
        }
        // Third attempt trips the ceiling and drops the pending login.
        assert!(matches!(
            h.flow.submit_otp(login_id, &code).await,
            Err(AuthError::InvalidOrExpiredCode)
        ));
        assert!(matches!(
            h.flow.submit_otp(login_id, &code).await,
            Err(AuthError::InvalidOrExpiredCode)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_otp_submissions_mint_one_session() -> anyhow::Result<()> {
        let h = harness(quiet_config()).await;

        let login_id = h.flow.submit_password("a@example.com", PASSWORD).await?;
        let code = h.sender.last_code().unwrap();

        let (a, b) = tokio::join!(
            h.flow.submit_otp(login_id, &code),
            h.flow.submit_otp(login_id, &code)
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn delivery_failure_surfaces_but_throttles_retry() -> anyhow::Result<()> {
        let h = harness(AuthConfig::new().with_resend_interval_seconds(30)).await;

        h.sender.set_failing(true);
        assert!(matches!(
            h.flow.submit_password("a@example.com", PASSWORD).await,
            Err(AuthError::DeliveryUnavailable)
        ));

        // The undelivered challenge still occupies the interval.
        h.sender.set_failing(false);
        assert!(matches!(
            h.flow.submit_password("a@example.com", PASSWORD).await,
            Err(AuthError::RateLimited)
        ));
        Ok(())
    }
}
