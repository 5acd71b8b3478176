//! In-memory store for development and tests.
//!
//! Every operation takes the map lock for the whole check-and-set section,
//! which is what makes the compare-and-set contracts hold here.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::challenge::{Challenge, Operation, Purpose};
use crate::identity::Identity;
use crate::session::Session;
use crate::stepup::Grant;

use super::{
    ChallengeStore, GrantStore, IdentityStore, NewChallenge, NewGrant, NewIdentity, NewSession,
    OpenOutcome, SessionStore, StoreError,
};

#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<HashMap<Uuid, Identity>>,
    challenges: Mutex<HashMap<Uuid, Challenge>>,
    // Sessions and grants are keyed by token digest, the only lookup path.
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
    grants: Mutex<HashMap<Vec<u8>, Grant>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn insert_identity(&self, new: NewIdentity) -> Result<Identity, StoreError> {
        let mut identities = self.identities.lock().await;
        if identities.values().any(|i| i.email == new.email) {
            return Err(StoreError::Conflict);
        }
        let identity = Identity {
            id: new.id,
            email: new.email,
            password_hash: new.password_hash,
            email_verified: false,
            created_at: Utc::now(),
        };
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }

    async fn lookup_identity_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.lock().await;
        Ok(identities.values().find(|i| i.email == email).cloned())
    }

    async fn lookup_identity(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        let identities = self.identities.lock().await;
        Ok(identities.get(&id).cloned())
    }

    async fn mark_email_verified(&self, id: Uuid) -> Result<(), StoreError> {
        let mut identities = self.identities.lock().await;
        if let Some(identity) = identities.get_mut(&id) {
            identity.email_verified = true;
        }
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for MemoryStore {
    async fn open_challenge(&self, new: NewChallenge) -> Result<OpenOutcome, StoreError> {
        let now = Utc::now();
        let mut challenges = self.challenges.lock().await;

        let floor = now - Duration::seconds(new.min_interval_seconds);
        let throttled = challenges.values().any(|c| {
            c.identity_id == new.identity_id && c.purpose == new.purpose && c.issued_at > floor
        });
        if throttled {
            return Ok(OpenOutcome::Throttled);
        }

        // Supersession: any still-active challenge for the tuple becomes
        // consumed-without-use before the replacement appears.
        for challenge in challenges.values_mut() {
            if challenge.identity_id == new.identity_id
                && challenge.purpose == new.purpose
                && challenge.consumed_at.is_none()
            {
                challenge.consumed_at = Some(now);
            }
        }

        let challenge = Challenge {
            id: new.id,
            identity_id: new.identity_id,
            purpose: new.purpose,
            code_hash: new.code_hash,
            issued_at: now,
            expires_at: now + Duration::seconds(new.ttl_seconds),
            consumed_at: None,
            attempt_count: 0,
            bound_session_id: new.bound_session_id,
        };
        challenges.insert(challenge.id, challenge.clone());
        Ok(OpenOutcome::Opened(challenge))
    }

    async fn record_attempt(&self, id: Uuid) -> Result<Option<Challenge>, StoreError> {
        let mut challenges = self.challenges.lock().await;
        Ok(challenges.get_mut(&id).map(|challenge| {
            challenge.attempt_count += 1;
            challenge.clone()
        }))
    }

    async fn consume_challenge(&self, id: Uuid) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut challenges = self.challenges.lock().await;
        match challenges.get_mut(&id) {
            Some(challenge) if challenge.consumed_at.is_none() && challenge.expires_at > now => {
                challenge.consumed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_active_challenge(
        &self,
        identity_id: Uuid,
        purpose: &Purpose,
    ) -> Result<Option<Challenge>, StoreError> {
        let now = Utc::now();
        let challenges = self.challenges.lock().await;
        Ok(challenges
            .values()
            .find(|c| {
                c.identity_id == identity_id
                    && c.purpose == *purpose
                    && c.consumed_at.is_none()
                    && c.expires_at > now
            })
            .cloned())
    }

    async fn purge_challenges(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(retention_seconds);
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        // Terminal moment is consumption, or expiry for never-consumed rows.
        challenges.retain(|_, c| c.consumed_at.unwrap_or(c.expires_at) > cutoff);
        Ok((before - challenges.len()) as u64)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, new: NewSession) -> Result<Session, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&new.token_hash) {
            return Err(StoreError::Conflict);
        }
        let session = Session {
            id: new.id,
            identity_id: new.identity_id,
            created_at: now,
            mfa_satisfied: true,
            expires_at: now + Duration::seconds(new.ttl_seconds),
        };
        sessions.insert(new.token_hash, session.clone());
        Ok(session)
    }

    async fn lookup_session(&self, token_hash: &[u8]) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .get(token_hash)
            .filter(|s| s.mfa_satisfied && s.expires_at > now)
            .cloned())
    }

    async fn delete_session(&self, token_hash: &[u8]) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(token_hash);
        Ok(())
    }

    async fn purge_sessions(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(retention_seconds);
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > cutoff);
        Ok((before - sessions.len()) as u64)
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn insert_grant(&self, new: NewGrant) -> Result<Grant, StoreError> {
        let now = Utc::now();
        let mut grants = self.grants.lock().await;
        if grants.contains_key(&new.token_hash) {
            return Err(StoreError::Conflict);
        }
        let grant = Grant {
            id: new.id,
            session_id: new.session_id,
            operation: new.operation,
            issued_at: now,
            expires_at: now + Duration::seconds(new.ttl_seconds),
            consumed_at: None,
        };
        grants.insert(new.token_hash, grant.clone());
        Ok(grant)
    }

    async fn consume_grant(
        &self,
        token_hash: &[u8],
        session_id: Uuid,
        operation: Operation,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut grants = self.grants.lock().await;
        match grants.get_mut(token_hash) {
            Some(grant)
                if grant.session_id == session_id
                    && grant.operation == operation
                    && grant.consumed_at.is_none()
                    && grant.expires_at > now =>
            {
                grant.consumed_at = Some(now);
                Ok(true)
            }
            // Mismatches leave the grant untouched so the rightful holder
            // can still redeem it.
            _ => Ok(false),
        }
    }

    async fn purge_grants(&self, retention_seconds: i64) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - Duration::seconds(retention_seconds);
        let mut grants = self.grants.lock().await;
        let before = grants.len();
        grants.retain(|_, g| g.consumed_at.unwrap_or(g.expires_at) > cutoff);
        Ok((before - grants.len()) as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::challenge::Purpose;

    fn new_challenge(identity_id: Uuid, purpose: Purpose) -> NewChallenge {
        NewChallenge {
            id: Uuid::new_v4(),
            identity_id,
            purpose,
            code_hash: "$argon2id$stub".to_string(),
            ttl_seconds: 300,
            min_interval_seconds: 0,
            bound_session_id: None,
        }
    }

    fn opened(outcome: OpenOutcome) -> Challenge {
        match outcome {
            OpenOutcome::Opened(challenge) => challenge,
            OpenOutcome::Throttled => panic!("expected Opened, got Throttled"),
        }
    }

    #[tokio::test]
    async fn open_supersedes_active_challenge() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity_id = Uuid::new_v4();

        let first = opened(
            store
                .open_challenge(new_challenge(identity_id, Purpose::Login))
                .await?,
        );
        let second = opened(
            store
                .open_challenge(new_challenge(identity_id, Purpose::Login))
                .await?,
        );

        // The first challenge is terminal; it can no longer be consumed.
        assert!(!store.consume_challenge(first.id).await?);
        assert!(store.consume_challenge(second.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn open_throttles_within_interval() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity_id = Uuid::new_v4();

        let mut first = new_challenge(identity_id, Purpose::Login);
        first.min_interval_seconds = 60;
        let first = opened(store.open_challenge(first).await?);

        let mut second = new_challenge(identity_id, Purpose::Login);
        second.min_interval_seconds = 60;
        assert!(matches!(
            store.open_challenge(second).await?,
            OpenOutcome::Throttled
        ));

        // The throttled attempt must not have superseded the active one.
        assert!(store.consume_challenge(first.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn throttle_is_per_purpose() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity_id = Uuid::new_v4();

        let mut login = new_challenge(identity_id, Purpose::Login);
        login.min_interval_seconds = 60;
        opened(store.open_challenge(login).await?);

        let mut operation = new_challenge(
            identity_id,
            Purpose::Operation(Operation::TransferInternal),
        );
        operation.min_interval_seconds = 60;
        assert!(matches!(
            store.open_challenge(operation).await?,
            OpenOutcome::Opened(_)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn record_attempt_increments_and_reports_unknown() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let challenge = opened(
            store
                .open_challenge(new_challenge(Uuid::new_v4(), Purpose::Login))
                .await?,
        );

        let first = store.record_attempt(challenge.id).await?.unwrap();
        let second = store.record_attempt(challenge.id).await?.unwrap();
        assert_eq!(first.attempt_count, 1);
        assert_eq!(second.attempt_count, 2);

        assert!(store.record_attempt(Uuid::new_v4()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn consume_challenge_is_single_shot() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let challenge = opened(
            store
                .open_challenge(new_challenge(Uuid::new_v4(), Purpose::Login))
                .await?,
        );

        let (first, second) = tokio::join!(
            store.consume_challenge(challenge.id),
            store.consume_challenge(challenge.id)
        );
        let consumed = [first?, second?];
        assert_eq!(consumed.iter().filter(|c| **c).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn consume_challenge_refuses_expired() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let mut new = new_challenge(Uuid::new_v4(), Purpose::Login);
        new.ttl_seconds = 0;
        let challenge = opened(store.open_challenge(new).await?);

        assert!(!store.consume_challenge(challenge.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn identity_email_is_unique() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let new = NewIdentity {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            password_hash: "hash".to_string(),
        };
        store.insert_identity(new.clone()).await?;

        let duplicate = NewIdentity {
            id: Uuid::new_v4(),
            ..new
        };
        assert!(matches!(
            store.insert_identity(duplicate).await,
            Err(StoreError::Conflict)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn mark_email_verified_flips_flag() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity = store
            .insert_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: "a@example.com".to_string(),
                password_hash: "hash".to_string(),
            })
            .await?;
        assert!(!identity.email_verified);

        store.mark_email_verified(identity.id).await?;
        let reloaded = store.lookup_identity(identity.id).await?.unwrap();
        assert!(reloaded.email_verified);
        Ok(())
    }

    #[tokio::test]
    async fn session_lookup_honors_expiry() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let hash = b"digest".to_vec();
        store
            .insert_session(NewSession {
                id: Uuid::new_v4(),
                identity_id: Uuid::new_v4(),
                token_hash: hash.clone(),
                ttl_seconds: 0,
            })
            .await?;

        assert!(store.lookup_session(&hash).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn session_delete_is_idempotent() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let hash = b"digest".to_vec();
        store
            .insert_session(NewSession {
                id: Uuid::new_v4(),
                identity_id: Uuid::new_v4(),
                token_hash: hash.clone(),
                ttl_seconds: 60,
            })
            .await?;

        store.delete_session(&hash).await?;
        store.delete_session(&hash).await?;
        assert!(store.lookup_session(&hash).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn grant_consume_requires_exact_scope() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let session_id = Uuid::new_v4();
        let hash = b"grant-digest".to_vec();
        store
            .insert_grant(NewGrant {
                id: Uuid::new_v4(),
                session_id,
                operation: Operation::TransferExternal,
                token_hash: hash.clone(),
                ttl_seconds: 60,
            })
            .await?;

        // Wrong session, then wrong operation: neither burns the grant.
        assert!(
            !store
                .consume_grant(&hash, Uuid::new_v4(), Operation::TransferExternal)
                .await?
        );
        assert!(
            !store
                .consume_grant(&hash, session_id, Operation::TransferInternal)
                .await?
        );

        assert!(
            store
                .consume_grant(&hash, session_id, Operation::TransferExternal)
                .await?
        );
        assert!(
            !store
                .consume_grant(&hash, session_id, Operation::TransferExternal)
                .await?
        );
        Ok(())
    }

    #[tokio::test]
    async fn purge_drops_terminal_rows_only() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let identity_id = Uuid::new_v4();

        let mut stale = new_challenge(identity_id, Purpose::Login);
        stale.ttl_seconds = 0;
        opened(store.open_challenge(stale).await?);

        let active = opened(
            store
                .open_challenge(new_challenge(
                    identity_id,
                    Purpose::Operation(Operation::CreateAccount),
                ))
                .await?,
        );

        // Supersession consumed nothing across purposes; only the expired
        // login challenge is past retention.
        assert_eq!(store.purge_challenges(0).await?, 1);
        assert!(store.consume_challenge(active.id).await?);
        Ok(())
    }
}
