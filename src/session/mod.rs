//! Bearer-token sessions.
//!
//! A session exists only after the full login ceremony, so `mfa_satisfied`
//! is structurally true for every stored row; the column is still checked on
//! every resolve as a second lock on the invariant. Tokens are random 256-bit
//! values handed to the client once, stored only as SHA-256 digests.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::challenge::codes::{generate_token, hash_token};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::{NewSession, SessionStore, StoreError};

// Token digest collisions are practically impossible; the retry exists so
// the insert's unique index never turns one into a user-visible failure.
const MINT_ATTEMPTS: usize = 3;

/// An authenticated session, as stored. The token digest never leaves the
/// store layer.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Always true for stored sessions; checked again on resolve.
    pub mfa_satisfied: bool,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Session {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            created_at: row.try_get("created_at")?,
            mfa_satisfied: row.try_get("mfa_satisfied")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// A freshly minted session with its bearer token.
///
/// The token is returned to the client once and not recoverable afterwards.
pub struct MintedSession {
    pub session: Session,
    pub token: String,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: AuthConfig,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: AuthConfig) -> Self {
        Self { store, config }
    }

    /// Mint a session for an identity that completed the login ceremony.
    ///
    /// # Errors
    ///
    /// [`AuthError::Internal`] on store failure or exhausted digest retries.
    pub async fn mint(&self, identity_id: Uuid) -> Result<MintedSession, AuthError> {
        for _ in 0..MINT_ATTEMPTS {
            let token = generate_token()?;
            let new = NewSession {
                id: Uuid::new_v4(),
                identity_id,
                token_hash: hash_token(&token),
                ttl_seconds: self.config.session_ttl_seconds(),
            };
            match self.store.insert_session(new).await {
                Ok(session) => {
                    info!(session_id = %session.id, identity_id = %identity_id, "session minted");
                    return Ok(MintedSession { session, token });
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AuthError::Internal(anyhow::anyhow!(
            "exhausted session token attempts"
        )))
    }

    /// Resolve a presented bearer token to its session.
    ///
    /// Pure read: resolving does not extend or touch the session.
    ///
    /// # Errors
    ///
    /// [`AuthError::SessionInvalid`] for unknown, expired, or empty tokens.
    pub async fn resolve(&self, token: &str) -> Result<Session, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::SessionInvalid);
        }
        self.store
            .lookup_session(&hash_token(token))
            .await?
            .ok_or(AuthError::SessionInvalid)
    }

    /// Delete the session behind a token. Idempotent: unknown tokens are a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// [`AuthError::Internal`] on store failure only.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }
        self.store.delete_session(&hash_token(token)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(config: AuthConfig) -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn mint_and_resolve_round_trip() -> anyhow::Result<()> {
        let manager = manager(AuthConfig::new());
        let identity_id = Uuid::new_v4();

        let minted = manager.mint(identity_id).await?;
        let resolved = manager.resolve(&minted.token).await?;

        assert_eq!(resolved.id, minted.session.id);
        assert_eq!(resolved.identity_id, identity_id);
        assert!(resolved.mfa_satisfied);
        assert!(resolved.expires_at > Utc::now());
        Ok(())
    }

    #[tokio::test]
    async fn resolve_rejects_unknown_and_empty_tokens() -> anyhow::Result<()> {
        let manager = manager(AuthConfig::new());
        manager.mint(Uuid::new_v4()).await?;

        assert!(matches!(
            manager.resolve("definitely-not-a-token").await,
            Err(AuthError::SessionInvalid)
        ));
        assert!(matches!(
            manager.resolve("  ").await,
            Err(AuthError::SessionInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn expired_session_does_not_resolve() -> anyhow::Result<()> {
        let manager = manager(AuthConfig::new().with_session_ttl_seconds(0));

        let minted = manager.mint(Uuid::new_v4()).await?;
        assert!(matches!(
            manager.resolve(&minted.token).await,
            Err(AuthError::SessionInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn logout_is_idempotent() -> anyhow::Result<()> {
        let manager = manager(AuthConfig::new());

        let minted = manager.mint(Uuid::new_v4()).await?;
        manager.logout(&minted.token).await?;
        assert!(matches!(
            manager.resolve(&minted.token).await,
            Err(AuthError::SessionInvalid)
        ));

        // Second logout and unknown-token logout are quiet no-ops.
        manager.logout(&minted.token).await?;
        manager.logout("never-was-a-token").await?;
        Ok(())
    }

    #[tokio::test]
    async fn tokens_are_unique_per_mint() -> anyhow::Result<()> {
        let manager = manager(AuthConfig::new());

        let first = manager.mint(Uuid::new_v4()).await?;
        let second = manager.mint(Uuid::new_v4()).await?;
        assert_ne!(first.token, second.token);
        Ok(())
    }
}
