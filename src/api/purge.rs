//! Background purge of expired rows.
//!
//! Consumed and expired challenges, sessions, and grants are kept for a
//! retention window so operators can audit recent activity, then deleted by
//! this task. Validation never depends on it: expiry and consumption are
//! checked per request, so a late purge only costs storage.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use crate::store::{ChallengeStore, GrantStore, SessionStore, StoreError};

const PURGE_INTERVAL_SECONDS: u64 = 300;

/// Spawn a background task that deletes rows older than the retention window.
pub(crate) fn spawn_purge_worker(
    challenges: Arc<dyn ChallengeStore>,
    sessions: Arc<dyn SessionStore>,
    grants: Arc<dyn GrantStore>,
    retention_seconds: i64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match purge_once(&*challenges, &*sessions, &*grants, retention_seconds).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired rows"),
                Err(err) => error!("purge pass failed: {err}"),
            }

            sleep(Duration::from_secs(PURGE_INTERVAL_SECONDS)).await;
        }
    })
}

async fn purge_once(
    challenges: &dyn ChallengeStore,
    sessions: &dyn SessionStore,
    grants: &dyn GrantStore,
    retention_seconds: i64,
) -> Result<u64, StoreError> {
    let mut removed = challenges.purge_challenges(retention_seconds).await?;
    removed += sessions.purge_sessions(retention_seconds).await?;
    removed += grants.purge_grants(retention_seconds).await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::Purpose;
    use crate::store::{MemoryStore, NewChallenge, OpenOutcome};
    use uuid::Uuid;

    #[tokio::test]
    async fn purge_once_sweeps_expired_rows() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        // ttl 0 makes the challenge terminal the moment it exists.
        let opened = store
            .open_challenge(NewChallenge {
                id: Uuid::new_v4(),
                identity_id: Uuid::new_v4(),
                purpose: Purpose::Login,
                code_hash: "hash".to_string(),
                ttl_seconds: 0,
                min_interval_seconds: 0,
                bound_session_id: None,
            })
            .await?;
        assert!(matches!(opened, OpenOutcome::Opened(_)));

        let removed = purge_once(&*store, &*store, &*store, 0).await?;
        assert_eq!(removed, 1);

        // A second pass finds nothing left.
        let removed = purge_once(&*store, &*store, &*store, 0).await?;
        assert_eq!(removed, 0);
        Ok(())
    }
}
