//! Identities and their credentials.
//!
//! Registration, email verification, and the password helpers the login flow
//! builds on. Passwords are stored as salted Argon2id PHC strings; emails are
//! normalized before every lookup so the unique index sees one spelling.

use anyhow::anyhow;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::{postgres::PgRow, FromRow, Row};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::challenge::{ChallengeLedger, Purpose};
use crate::delivery::CodeSender;
use crate::error::AuthError;
use crate::store::{ChallengeStore, IdentityStore, NewIdentity, StoreError};

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A registered account.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// Login is refused until the mailbox is proven.
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Identity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            email_verified: row.try_get("email_verified")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Hash a password for storage.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| anyhow!("failed to hash password"))
}

/// Verify a password against a stored PHC string.
///
/// A malformed stored hash reads as a mismatch.
#[must_use]
pub fn verify_password(password: &str, stored: &str) -> bool {
    PasswordHash::new(stored).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,
    #[error("Email already registered")]
    EmailTaken,
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// What a resend request did, kept coarse so responses stay opaque.
#[derive(Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Sent,
    /// No account, or nothing left to verify. Indistinguishable on the wire.
    Unknown,
}

pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    challenges: Arc<dyn ChallengeStore>,
    ledger: Arc<ChallengeLedger>,
    delivery: Arc<dyn CodeSender>,
}

impl IdentityService {
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        challenges: Arc<dyn ChallengeStore>,
        ledger: Arc<ChallengeLedger>,
        delivery: Arc<dyn CodeSender>,
    ) -> Self {
        Self {
            store,
            challenges,
            ledger,
            delivery,
        }
    }

    /// Create an account and send its email-verification code.
    ///
    /// The account exists once this returns, even with
    /// [`AuthError::DeliveryUnavailable`]: the verification challenge stays
    /// open and the resend path recovers.
    ///
    /// # Errors
    ///
    /// Input validation errors, [`RegisterError::EmailTaken`] on duplicates,
    /// or a wrapped [`AuthError`].
    pub async fn register(&self, email: &str, password: &str) -> Result<Identity, RegisterError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(RegisterError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(RegisterError::WeakPassword);
        }

        let password_hash = hash_password(password).map_err(AuthError::Internal)?;
        let new = NewIdentity {
            id: Uuid::new_v4(),
            email,
            password_hash,
        };
        let identity = match self.store.insert_identity(new).await {
            Ok(identity) => identity,
            Err(StoreError::Conflict) => return Err(RegisterError::EmailTaken),
            Err(err) => return Err(AuthError::from(err).into()),
        };
        info!(identity_id = %identity.id, "identity registered");

        self.send_verification(&identity).await?;
        Ok(identity)
    }

    /// Redeem an email-verification code.
    ///
    /// # Errors
    ///
    /// Everything short of success collapses to
    /// [`AuthError::InvalidOrExpiredCode`]; account existence never leaks
    /// through this path.
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(identity) = self.store.lookup_identity_by_email(&email).await? else {
            return Err(AuthError::InvalidOrExpiredCode);
        };
        let Some(challenge) = self
            .challenges
            .find_active_challenge(identity.id, &Purpose::EmailVerify)
            .await?
        else {
            return Err(AuthError::InvalidOrExpiredCode);
        };

        let outcome = self.ledger.validate(challenge.id, code, None).await?;
        if !outcome.is_accepted() {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        self.store.mark_email_verified(identity.id).await?;
        info!(identity_id = %identity.id, "email verified");
        Ok(())
    }

    /// Issue a fresh verification code for a not-yet-verified account.
    ///
    /// # Errors
    ///
    /// [`AuthError::RateLimited`] inside the resend interval,
    /// [`AuthError::DeliveryUnavailable`] when the send fails.
    pub async fn resend_verification(&self, email: &str) -> Result<ResendOutcome, AuthError> {
        let email = normalize_email(email);
        let Some(identity) = self.store.lookup_identity_by_email(&email).await? else {
            return Ok(ResendOutcome::Unknown);
        };
        if identity.email_verified {
            return Ok(ResendOutcome::Unknown);
        }

        self.send_verification(&identity).await?;
        Ok(ResendOutcome::Sent)
    }

    async fn send_verification(&self, identity: &Identity) -> Result<(), AuthError> {
        let opened = self
            .ledger
            .open(identity.id, Purpose::EmailVerify, None)
            .await?;
        let ttl = (opened.challenge.expires_at - opened.challenge.issued_at).num_seconds();

        if let Err(err) = self
            .delivery
            .send_code(&identity.email, &Purpose::EmailVerify, &opened.code, ttl)
            .await
        {
            // The challenge stands; a resend can still deliver it a sibling.
            warn!(identity_id = %identity.id, "verification code delivery failed");
            return Err(err);
        }
        Ok(())
    }
}
