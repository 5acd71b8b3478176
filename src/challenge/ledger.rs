//! The challenge ledger: issue, validate, retire.
//!
//! Validation order is fixed: attempt accounting, consumption state, lockout
//! ceiling, expiry, session binding, then the code itself. The final accept
//! is a compare-and-set on `consumed_at`, so concurrent validations of the
//! same challenge can produce at most one [`ValidationOutcome::Accepted`].

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::challenge::{Challenge, CodeGenerator, Purpose, ValidationOutcome};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::{ChallengeStore, NewChallenge, OpenOutcome};

/// A just-opened challenge with its plaintext code.
///
/// The code exists for the delivery call and is dropped afterwards; it is
/// not recoverable from the ledger.
pub struct OpenedChallenge {
    pub challenge: Challenge,
    pub code: String,
}

pub struct ChallengeLedger {
    store: Arc<dyn ChallengeStore>,
    codes: CodeGenerator,
    config: AuthConfig,
}

impl ChallengeLedger {
    #[must_use]
    pub fn new(store: Arc<dyn ChallengeStore>, codes: CodeGenerator, config: AuthConfig) -> Self {
        Self {
            store,
            codes,
            config,
        }
    }

    /// Open a challenge for (identity, purpose), superseding any active one.
    ///
    /// # Errors
    ///
    /// [`AuthError::RateLimited`] when a challenge for the tuple was issued
    /// within the configured minimum interval; [`AuthError::Internal`] on
    /// store failure.
    pub async fn open(
        &self,
        identity_id: Uuid,
        purpose: Purpose,
        bound_session_id: Option<Uuid>,
    ) -> Result<OpenedChallenge, AuthError> {
        let issued = self.codes.issue()?;
        let new = NewChallenge {
            id: Uuid::new_v4(),
            identity_id,
            purpose,
            code_hash: issued.hash,
            ttl_seconds: self.config.otp_ttl_seconds(),
            min_interval_seconds: self.config.resend_interval_seconds(),
            bound_session_id,
        };

        match self.store.open_challenge(new).await? {
            OpenOutcome::Opened(challenge) => {
                info!(
                    challenge_id = %challenge.id,
                    purpose = %challenge.purpose.to_db(),
                    "challenge opened"
                );
                Ok(OpenedChallenge {
                    challenge,
                    code: issued.plaintext,
                })
            }
            OpenOutcome::Throttled => Err(AuthError::RateLimited),
        }
    }

    /// Validate a presented code against a challenge.
    ///
    /// Every call counts as an attempt, including calls against unknown ids,
    /// which report [`ValidationOutcome::WrongCode`] so challenge existence
    /// never leaks.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures; every policy decision is a
    /// [`ValidationOutcome`].
    pub async fn validate(
        &self,
        challenge_id: Uuid,
        presented_code: &str,
        requesting_session_id: Option<Uuid>,
    ) -> Result<ValidationOutcome, AuthError> {
        let outcome = self
            .validate_inner(challenge_id, presented_code, requesting_session_id)
            .await?;
        info!(
            challenge_id = %challenge_id,
            outcome = outcome.label(),
            "challenge validation"
        );
        Ok(outcome)
    }

    async fn validate_inner(
        &self,
        challenge_id: Uuid,
        presented_code: &str,
        requesting_session_id: Option<Uuid>,
    ) -> Result<ValidationOutcome, AuthError> {
        // Attempt accounting happens before any check so a rejected attempt
        // still moves the counter.
        let Some(challenge) = self.store.record_attempt(challenge_id).await? else {
            return Ok(ValidationOutcome::WrongCode);
        };

        if challenge.is_consumed() {
            return Ok(ValidationOutcome::AlreadyConsumed);
        }
        if challenge.attempt_count > self.config.max_attempts() {
            return Ok(ValidationOutcome::Locked);
        }
        if challenge.is_expired(Utc::now()) {
            return Ok(ValidationOutcome::Expired);
        }
        if challenge.purpose.requires_session_binding()
            && (challenge.bound_session_id.is_none()
                || challenge.bound_session_id != requesting_session_id)
        {
            return Ok(ValidationOutcome::SessionMismatch);
        }
        if !self.codes.verify(presented_code, &challenge.code_hash)? {
            return Ok(ValidationOutcome::WrongCode);
        }

        // The code matched, but only the caller that flips consumed_at wins.
        if self.store.consume_challenge(challenge_id).await? {
            Ok(ValidationOutcome::Accepted(challenge))
        } else {
            Ok(ValidationOutcome::AlreadyConsumed)
        }
    }
}
