//! Postgres-backed store.
//!
//! Compare-and-set semantics live in the statements themselves: consumption
//! is a conditional `UPDATE ... RETURNING`, and `open_challenge` serializes
//! per (identity, purpose) with a transaction-scoped advisory lock so two
//! concurrent opens cannot both pass the rate check.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE identities (
//!     id             UUID PRIMARY KEY,
//!     email          TEXT NOT NULL UNIQUE,
//!     password_hash  TEXT NOT NULL,
//!     email_verified BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE challenges (
//!     id               UUID PRIMARY KEY,
//!     identity_id      UUID NOT NULL REFERENCES identities (id),
//!     purpose          TEXT NOT NULL,
//!     code_hash        TEXT NOT NULL,
//!     issued_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     expires_at       TIMESTAMPTZ NOT NULL,
//!     consumed_at      TIMESTAMPTZ,
//!     attempt_count    INTEGER NOT NULL DEFAULT 0,
//!     bound_session_id UUID
//! );
//! CREATE INDEX challenges_tuple_idx
//!     ON challenges (identity_id, purpose, issued_at DESC);
//!
//! CREATE TABLE sessions (
//!     id            UUID PRIMARY KEY,
//!     identity_id   UUID NOT NULL REFERENCES identities (id),
//!     token_hash    BYTEA NOT NULL UNIQUE,
//!     created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     mfa_satisfied BOOLEAN NOT NULL,
//!     expires_at    TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE operation_grants (
//!     id          UUID PRIMARY KEY,
//!     session_id  UUID NOT NULL REFERENCES sessions (id),
//!     operation   TEXT NOT NULL,
//!     token_hash  BYTEA NOT NULL UNIQUE,
//!     issued_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     expires_at  TIMESTAMPTZ NOT NULL,
//!     consumed_at TIMESTAMPTZ
//! );
//! ```

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use crate::challenge::{Challenge, Operation, Purpose};
use crate::identity::Identity;
use crate::session::Session;
use crate::stepup::Grant;

use super::{
    is_unique_violation, ChallengeStore, GrantStore, IdentityStore, NewChallenge, NewGrant,
    NewIdentity, NewSession, OpenOutcome, SessionStore, StoreError,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn query_span(operation: &str, statement: &str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let query = r"
            INSERT INTO identities (id, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, email_verified, created_at
        ";
        let result = sqlx::query_as::<_, Identity>(query)
            .bind(new.id)
            .bind(&new.email)
            .bind(&new.password_hash)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(identity) => Ok(identity),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert identity")
                .into()),
        }
    }

    async fn lookup_identity_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let query = r"
            SELECT id, email, password_hash, email_verified, created_at
            FROM identities
            WHERE email = $1
            LIMIT 1
        ";
        let identity = sqlx::query_as::<_, Identity>(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup identity by email")?;
        Ok(identity)
    }

    async fn lookup_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let query = r"
            SELECT id, email, password_hash, email_verified, created_at
            FROM identities
            WHERE id = $1
            LIMIT 1
        ";
        let identity = sqlx::query_as::<_, Identity>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup identity")?;
        Ok(identity)
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), StoreError> {
        let query = "UPDATE identities SET email_verified = TRUE WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn open_challenge(&self, new: NewChallenge) -> Result<OpenOutcome, StoreError> {
        let purpose = new.purpose.to_db();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin open-challenge transaction")?;

        // Serialize concurrent opens for the same (identity, purpose) tuple;
        // the lock is released on commit/rollback.
        let query = "SELECT pg_advisory_xact_lock(hashtextextended($1 || ':' || $2, 0))";
        sqlx::query(query)
            .bind(new.identity_id.to_string())
            .bind(&purpose)
            .execute(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to take challenge open lock")?;

        let query = r"
            SELECT 1
            FROM challenges
            WHERE identity_id = $1
              AND purpose = $2
              AND issued_at > NOW() - ($3 * INTERVAL '1 second')
            LIMIT 1
        ";
        let recent = sqlx::query(query)
            .bind(new.identity_id)
            .bind(&purpose)
            .bind(new.min_interval_seconds)
            .fetch_optional(&mut *tx)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check challenge issue interval")?;

        if recent.is_some() {
            tx.commit().await.context("commit throttled open")?;
            return Ok(OpenOutcome::Throttled);
        }

        // Supersession: close out any still-active challenge for the tuple.
        let query = r"
            UPDATE challenges
            SET consumed_at = NOW()
            WHERE identity_id = $1
              AND purpose = $2
              AND consumed_at IS NULL
        ";
        sqlx::query(query)
            .bind(new.identity_id)
            .bind(&purpose)
            .execute(&mut *tx)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to supersede active challenges")?;

        let query = r"
            INSERT INTO challenges
                (id, identity_id, purpose, code_hash, expires_at, bound_session_id)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'), $6)
            RETURNING id, identity_id, purpose, code_hash, issued_at, expires_at,
                      consumed_at, attempt_count, bound_session_id
        ";
        let challenge = sqlx::query_as::<_, Challenge>(query)
            .bind(new.id)
            .bind(new.identity_id)
            .bind(&purpose)
            .bind(&new.code_hash)
            .bind(new.ttl_seconds)
            .bind(new.bound_session_id)
            .fetch_one(&mut *tx)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to insert challenge")?;

        tx.commit().await.context("commit open challenge")?;
        Ok(OpenOutcome::Opened(challenge))
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<Challenge>, StoreError> {
        let query = r"
            UPDATE challenges
            SET attempt_count = attempt_count + 1
            WHERE id = $1
            RETURNING id, identity_id, purpose, code_hash, issued_at, expires_at,
                      consumed_at, attempt_count, bound_session_id
        ";
        let challenge = sqlx::query_as::<_, Challenge>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to record validation attempt")?;
        Ok(challenge)
    }

    async fn consume_challenge(&self, id: Uuid) -> Result<bool, StoreError> {
        // The predicate is the whole point: only one caller can move
        // consumed_at from NULL.
        let query = r"
            UPDATE challenges
            SET consumed_at = NOW()
            WHERE id = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume challenge")?;
        Ok(row.is_some())
    }

    async fn find_active_challenge(
        &self,
        identity_id: Uuid,
        purpose: &Purpose,
    ) -> Result<Option<Challenge>, StoreError> {
        let query = r"
            SELECT id, identity_id, purpose, code_hash, issued_at, expires_at,
                   consumed_at, attempt_count, bound_session_id
            FROM challenges
            WHERE identity_id = $1
              AND purpose = $2
              AND consumed_at IS NULL
              AND expires_at > NOW()
            ORDER BY issued_at DESC
            LIMIT 1
        ";
        let challenge = sqlx::query_as::<_, Challenge>(query)
            .bind(identity_id)
            .bind(purpose.to_db())
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to find active challenge")?;
        Ok(challenge)
    }

    async fn purge_challenges(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        // Terminal moment is consumption, or expiry for never-consumed rows.
        let query = r"
            DELETE FROM challenges
            WHERE COALESCE(consumed_at, expires_at) < NOW() - ($1 * INTERVAL '1 second')
        ";
        let result = sqlx::query(query)
            .bind(retention_seconds)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge challenges")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, new: NewSession) -> Result<Session, StoreError> {
        let query = r"
            INSERT INTO sessions (id, identity_id, token_hash, mfa_satisfied, expires_at)
            VALUES ($1, $2, $3, TRUE, NOW() + ($4 * INTERVAL '1 second'))
            RETURNING id, identity_id, created_at, mfa_satisfied, expires_at
        ";
        let result = sqlx::query_as::<_, Session>(query)
            .bind(new.id)
            .bind(new.identity_id)
            .bind(&new.token_hash)
            .bind(new.ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(session) => Ok(session),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert session")
                .into()),
        }
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT id, identity_id, created_at, mfa_satisfied, expires_at
            FROM sessions
            WHERE token_hash = $1
              AND mfa_satisfied
              AND expires_at > NOW()
            LIMIT 1
        ";
        let session = sqlx::query_as::<_, Session>(query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        Ok(session)
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        // Logout is idempotent; it's fine if no rows are deleted.
        let query = "DELETE FROM sessions WHERE token_hash = $1";
        sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(())
    }

    async fn purge_sessions(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let query = r"
            DELETE FROM sessions
            WHERE expires_at < NOW() - ($1 * INTERVAL '1 second')
        ";
        let result = sqlx::query(query)
            .bind(retention_seconds)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl GrantStore for PgStore {
    async fn insert_grant(&self, new: NewGrant) -> Result<Grant, StoreError> {
        let query = r"
            INSERT INTO operation_grants (id, session_id, operation, token_hash, expires_at)
            VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
            RETURNING id, session_id, operation, issued_at, expires_at, consumed_at
        ";
        let result = sqlx::query_as::<_, Grant>(query)
            .bind(new.id)
            .bind(new.session_id)
            .bind(new.operation.as_str())
            .bind(&new.token_hash)
            .bind(new.ttl_seconds)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await;

        match result {
            Ok(grant) => Ok(grant),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict),
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert operation grant")
                .into()),
        }
    }

    async fn consume_grant(
        &self,
        token_hash: &[u8],
        session_id: Uuid,
        operation: Operation,
    ) -> Result<bool, StoreError> {
        // Scope is part of the predicate: a mismatched presentation matches
        // no row and leaves the grant intact.
        let query = r"
            UPDATE operation_grants
            SET consumed_at = NOW()
            WHERE token_hash = $1
              AND session_id = $2
              AND operation = $3
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(token_hash)
            .bind(session_id)
            .bind(operation.as_str())
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to consume operation grant")?;
        Ok(row.is_some())
    }

    async fn purge_grants(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let query = r"
            DELETE FROM operation_grants
            WHERE COALESCE(consumed_at, expires_at) < NOW() - ($1 * INTERVAL '1 second')
        ";
        let result = sqlx::query(query)
            .bind(retention_seconds)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to purge operation grants")?;
        Ok(result.rows_affected())
    }
}
