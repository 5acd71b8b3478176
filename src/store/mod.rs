//! Persistence boundary.
//!
//! The engine behind these traits is interchangeable; what is not negotiable
//! is atomicity. `open_challenge`, `consume_challenge`, and `consume_grant`
//! are compare-and-set operations: of any number of concurrent callers, at
//! most one wins. [`memory::MemoryStore`] serves development and tests,
//! [`postgres::PgStore`] production.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::challenge::{Challenge, Operation, Purpose};
use crate::identity::Identity;
use crate::session::Session;
use crate::stepup::Grant;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint hit (duplicate email, token digest collision).
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for crate::error::AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            // Callers that expect a conflict match on it before converting;
            // reaching this arm means a read path hit one.
            StoreError::Conflict => Self::Internal(anyhow::anyhow!("unexpected store conflict")),
            StoreError::Other(err) => Self::Internal(err),
        }
    }
}

/// Insert payload for a new identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
}

/// Insert payload for a new challenge. The store stamps `issued_at` and
/// derives `expires_at` from `ttl_seconds` so its own clock is authoritative.
#[derive(Debug, Clone)]
pub struct NewChallenge {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub purpose: Purpose,
    pub code_hash: String,
    pub ttl_seconds: i64,
    /// Minimum interval since the previous challenge for the same
    /// (identity, purpose) tuple; violating it yields [`OpenOutcome::Throttled`].
    pub min_interval_seconds: i64,
    pub bound_session_id: Option<Uuid>,
}

/// Insert payload for a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub token_hash: Vec<u8>,
    pub ttl_seconds: i64,
}

/// Insert payload for a new operation grant.
#[derive(Debug, Clone)]
pub struct NewGrant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub operation: Operation,
    pub token_hash: Vec<u8>,
    pub ttl_seconds: i64,
}

/// Result of an atomic challenge-open request.
#[derive(Debug)]
pub enum OpenOutcome {
    Opened(Challenge),
    /// Issuance refused; the prior challenge remains the sole active one.
    Throttled,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Returns [`StoreError::Conflict`] when the email is already registered.
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError>;

    /// Lookup by already-normalized email.
    async fn lookup_identity_by_email(&self, email: &str)
        -> Result<Option<Identity>, StoreError>;

    async fn lookup_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Atomically, in one step: refuse when a challenge for the same
    /// (identity, purpose) was issued within `min_interval_seconds`, otherwise
    /// mark every active challenge for the tuple consumed (supersession) and
    /// insert the new one. Concurrent opens for the same tuple serialize; at
    /// most one challenge is left active.
    async fn open_challenge(&self, new: NewChallenge) -> Result<OpenOutcome, StoreError>;

    /// Increment `attempt_count` and return the post-increment record.
    /// `None` when the id is unknown. Runs before any other validation check
    /// so every attempt is counted, whatever its outcome.
    async fn record_attempt(&self, id: Uuid) -> Result<Option<Challenge>, StoreError>;

    /// Set `consumed_at` if, and only if, it is unset and the challenge is
    /// unexpired. Returns whether this call did the consuming.
    async fn consume_challenge(&self, id: Uuid) -> Result<bool, StoreError>;

    /// The at-most-one active (unconsumed, unexpired) challenge for the
    /// (identity, purpose) tuple.
    async fn find_active_challenge(
        &self,
        identity_id: Uuid,
        purpose: &Purpose,
    ) -> Result<Option<Challenge>, StoreError>;

    /// Drop terminal (consumed or expired) challenges older than the
    /// retention window. Returns the number purged.
    async fn purge_challenges(&self, retention_seconds: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns [`StoreError::Conflict`] on a token digest collision so the
    /// caller can regenerate.
    async fn insert_session(&self, new: NewSession) -> Result<Session, StoreError>;

    /// Unexpired session by token digest; a pure read.
    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<Session>, StoreError>;

    /// Idempotent; deleting an unknown digest is not an error.
    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError>;

    async fn purge_sessions(&self, retention_seconds: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn insert_grant(&self, new: NewGrant) -> Result<Grant, StoreError>;

    /// Consume the grant if, and only if, the digest matches an unconsumed,
    /// unexpired grant bound to exactly this (session, operation) pair. A
    /// mismatched presentation returns `false` and leaves the grant intact.
    async fn consume_grant(
        &self,
        token_hash: &[u8],
        session_id: Uuid,
        operation: Operation,
    ) -> Result<bool, StoreError>;

    async fn purge_grants(&self, retention_seconds: i64) -> Result<u64, StoreError>;
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }
}
