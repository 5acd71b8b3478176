//! Step-up verification for sensitive operations.
//!
//! An authenticated session is not enough for the operations listed in
//! [`Operation`]; each execution needs a fresh code round-trip. The proof is
//! an operation grant: single-use, short-lived, and scoped to exactly the
//! (session, operation) pair that earned it.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::challenge::codes::{generate_token, hash_token};
use crate::challenge::{Challenge, ChallengeLedger, Operation, Purpose, ValidationOutcome};
use crate::config::AuthConfig;
use crate::delivery::CodeSender;
use crate::error::AuthError;
use crate::session::Session;
use crate::store::{GrantStore, IdentityStore, NewGrant, StoreError};

const MINT_ATTEMPTS: usize = 3;

/// A single-use authorization for one operation by one session.
#[derive(Debug, Clone)]
pub struct Grant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub operation: Operation,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for Grant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let operation: String = row.try_get("operation")?;
        let operation = Operation::parse(&operation).ok_or_else(|| {
            sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid grant operation value: {operation}"),
            )))
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            operation,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            consumed_at: row.try_get("consumed_at")?,
        })
    }
}

/// A freshly minted grant with its bearer token; the token is shown to the
/// client once.
pub struct MintedGrant {
    pub grant: Grant,
    pub token: String,
}

pub struct StepUpAuthorizer {
    grants: Arc<dyn GrantStore>,
    identities: Arc<dyn IdentityStore>,
    ledger: Arc<ChallengeLedger>,
    delivery: Arc<dyn CodeSender>,
    config: AuthConfig,
}

impl StepUpAuthorizer {
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantStore>,
        identities: Arc<dyn IdentityStore>,
        ledger: Arc<ChallengeLedger>,
        delivery: Arc<dyn CodeSender>,
        config: AuthConfig,
    ) -> Self {
        Self {
            grants,
            identities,
            ledger,
            delivery,
            config,
        }
    }

    /// Open a session-bound challenge for an operation and deliver its code.
    ///
    /// Re-requiring supersedes the previous challenge once the resend
    /// interval has passed.
    ///
    /// # Errors
    ///
    /// [`AuthError::RateLimited`] inside the interval,
    /// [`AuthError::DeliveryUnavailable`] when the send fails (the challenge
    /// stays open).
    pub async fn require(
        &self,
        session: &Session,
        operation: Operation,
    ) -> Result<Challenge, AuthError> {
        let Some(identity) = self.identities.lookup_identity(session.identity_id).await? else {
            return Err(AuthError::Internal(anyhow::anyhow!(
                "session references unknown identity"
            )));
        };

        let purpose = Purpose::Operation(operation);
        let opened = self
            .ledger
            .open(session.identity_id, purpose, Some(session.id))
            .await?;
        let ttl = (opened.challenge.expires_at - opened.challenge.issued_at).num_seconds();

        self.delivery
            .send_code(&identity.email, &purpose, &opened.code, ttl)
            .await?;
        info!(
            session_id = %session.id,
            operation = operation.as_str(),
            "step-up required"
        );
        Ok(opened.challenge)
    }

    /// Redeem a step-up code for an operation grant.
    ///
    /// The grant is scoped to the session that owned the challenge; a code
    /// presented from any other session is rejected without consuming it.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidOrExpiredCode`] for every validation failure.
    pub async fn confirm(
        &self,
        session: &Session,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<MintedGrant, AuthError> {
        let outcome = self
            .ledger
            .validate(challenge_id, code, Some(session.id))
            .await?;
        let challenge = match outcome {
            ValidationOutcome::Accepted(challenge) => challenge,
            _ => return Err(AuthError::InvalidOrExpiredCode),
        };
        let Purpose::Operation(operation) = challenge.purpose else {
            // A correct code for some other flow was pushed through step-up;
            // it is consumed now and authorizes nothing.
            warn!(challenge_id = %challenge.id, "non-operation challenge in step-up confirm");
            return Err(AuthError::InvalidOrExpiredCode);
        };

        let minted = self.mint_grant(session.id, operation).await?;
        info!(
            session_id = %session.id,
            grant_id = %minted.grant.id,
            operation = operation.as_str(),
            "operation grant minted"
        );
        Ok(minted)
    }

    /// Spend a grant ahead of executing its operation.
    ///
    /// # Errors
    ///
    /// [`AuthError::GrantInvalid`] unless a live grant matches the exact
    /// (session, operation) scope; a mismatch leaves the grant intact.
    pub async fn consume_grant(
        &self,
        session: &Session,
        operation: Operation,
        grant_token: &str,
    ) -> Result<(), AuthError> {
        let grant_token = grant_token.trim();
        if grant_token.is_empty() {
            return Err(AuthError::GrantInvalid);
        }
        let consumed = self
            .grants
            .consume_grant(&hash_token(grant_token), session.id, operation)
            .await?;
        if !consumed {
            return Err(AuthError::GrantInvalid);
        }
        info!(
            session_id = %session.id,
            operation = operation.as_str(),
            "operation grant consumed"
        );
        Ok(())
    }

    async fn mint_grant(
        &self,
        session_id: Uuid,
        operation: Operation,
    ) -> Result<MintedGrant, AuthError> {
        for _ in 0..MINT_ATTEMPTS {
            let token = generate_token()?;
            let new = NewGrant {
                id: Uuid::new_v4(),
                session_id,
                operation,
                token_hash: hash_token(&token),
                ttl_seconds: self.config.grant_ttl_seconds(),
            };
            match self.grants.insert_grant(new).await {
                Ok(grant) => return Ok(MintedGrant { grant, token }),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AuthError::Internal(anyhow::anyhow!(
            "exhausted grant token attempts"
        )))
    }
}
