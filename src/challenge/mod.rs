//! One-time-code challenges.
//!
//! A [`Challenge`] records one outstanding verification attempt for an
//! identity and a purpose. The plaintext code is delivered out-of-band and
//! never stored; only its peppered Argon2id hash survives issuance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

pub mod codes;
pub mod ledger;

pub use codes::{CodeGenerator, IssuedCode};
pub use ledger::ChallengeLedger;

/// Sensitive operations that require step-up verification before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateAccount,
    TransferInternal,
    TransferExternal,
}

impl Operation {
    /// Parse the wire form used in routes and persisted purpose strings.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create_account" => Some(Self::CreateAccount),
            "transfer_internal" => Some(Self::TransferInternal),
            "transfer_external" => Some(Self::TransferExternal),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAccount => "create_account",
            Self::TransferInternal => "transfer_internal",
            Self::TransferExternal => "transfer_external",
        }
    }

    /// Human-readable name used in delivery messages.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::CreateAccount => "Account creation",
            Self::TransferInternal => "Internal transfer",
            Self::TransferExternal => "External transfer",
        }
    }
}

/// What a challenge proves once its code is redeemed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// Second factor of primary login.
    Login,
    /// Proof of mailbox ownership after registration.
    EmailVerify,
    /// Step-up verification for one sensitive operation.
    Operation(Operation),
}

impl Purpose {
    /// Persisted textual form; also the uniqueness key for supersession.
    #[must_use]
    pub fn to_db(&self) -> String {
        match self {
            Self::Login => "login".to_string(),
            Self::EmailVerify => "email_verify".to_string(),
            Self::Operation(op) => format!("operation:{}", op.as_str()),
        }
    }

    /// Parse the persisted purpose value back into a typed enum.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "login" => Ok(Self::Login),
            "email_verify" => Ok(Self::EmailVerify),
            other => other
                .strip_prefix("operation:")
                .and_then(Operation::parse)
                .map(Self::Operation)
                .ok_or_else(|| {
                    sqlx::Error::Decode(Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid challenge purpose value: {value}"),
                    )))
                }),
        }
    }

    /// Human-readable label included in delivery messages.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Login => "Login",
            Self::EmailVerify => "Email verification",
            Self::Operation(op) => op.title(),
        }
    }

    /// Only operation challenges are bound to the requesting session.
    #[must_use]
    pub fn requires_session_binding(&self) -> bool {
        matches!(self, Self::Operation(_))
    }
}

/// A single issued challenge, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub purpose: Purpose,
    /// Argon2id PHC string of the one-time code; plaintext is never stored.
    pub code_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set at most once; a consumed challenge is terminal.
    pub consumed_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    /// Session that requested the challenge, for operation purposes.
    pub bound_session_id: Option<Uuid>,
}

impl Challenge {
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl<'r> FromRow<'r, PgRow> for Challenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: String = row.try_get("purpose")?;
        Ok(Self {
            id: row.try_get("id")?,
            identity_id: row.try_get("identity_id")?,
            purpose: Purpose::from_db(&purpose)?,
            code_hash: row.try_get("code_hash")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            consumed_at: row.try_get("consumed_at")?,
            attempt_count: row.try_get("attempt_count")?,
            bound_session_id: row.try_get("bound_session_id")?,
        })
    }
}

/// Result of validating a presented code against one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Code matched and this caller won the consumption race. Carries the
    /// challenge as read during validation so callers can act on its
    /// identity, purpose, and session binding.
    Accepted(Challenge),
    /// Also returned for unknown challenge ids so existence never leaks.
    WrongCode,
    Expired,
    AlreadyConsumed,
    /// Attempt ceiling reached; the challenge is dead regardless of the code.
    Locked,
    /// Operation challenge presented from a session other than the requester.
    SessionMismatch,
}

impl ValidationOutcome {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// Stable label for logs; outcomes are collapsed before reaching clients.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::WrongCode => "wrong_code",
            Self::Expired => "expired",
            Self::AlreadyConsumed => "already_consumed",
            Self::Locked => "locked",
            Self::SessionMismatch => "session_mismatch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Challenge, Operation, Purpose, ValidationOutcome};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[test]
    fn operation_parse_round_trip() {
        for op in [
            Operation::CreateAccount,
            Operation::TransferInternal,
            Operation::TransferExternal,
        ] {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operation::parse("withdraw_everything"), None);
    }

    #[test]
    fn purpose_db_round_trip() {
        for purpose in [
            Purpose::Login,
            Purpose::EmailVerify,
            Purpose::Operation(Operation::TransferExternal),
        ] {
            let text = purpose.to_db();
            let parsed = Purpose::from_db(&text).unwrap();
            assert_eq!(parsed, purpose);
        }
    }

    #[test]
    fn purpose_from_db_rejects_unknown() {
        assert!(Purpose::from_db("operation:withdraw_everything").is_err());
        assert!(Purpose::from_db("totp").is_err());
    }

    #[test]
    fn only_operations_bind_sessions() {
        assert!(!Purpose::Login.requires_session_binding());
        assert!(!Purpose::EmailVerify.requires_session_binding());
        assert!(Purpose::Operation(Operation::CreateAccount).requires_session_binding());
    }

    fn login_challenge(expires_at: chrono::DateTime<Utc>) -> Challenge {
        Challenge {
            id: Uuid::new_v4(),
            identity_id: Uuid::new_v4(),
            purpose: Purpose::Login,
            code_hash: String::new(),
            issued_at: expires_at - Duration::seconds(60),
            expires_at,
            consumed_at: None,
            attempt_count: 0,
            bound_session_id: None,
        }
    }

    #[test]
    fn challenge_expiry_is_inclusive() {
        let now = Utc::now();
        let challenge = login_challenge(now);
        // A challenge expiring exactly now is no longer redeemable.
        assert!(challenge.is_expired(now));
        assert!(!challenge.is_expired(now - Duration::seconds(1)));
        assert!(!challenge.is_consumed());
    }

    #[test]
    fn outcome_labels_are_stable() {
        let accepted = ValidationOutcome::Accepted(login_challenge(Utc::now()));
        assert_eq!(accepted.label(), "accepted");
        assert!(accepted.is_accepted());
        assert_eq!(ValidationOutcome::SessionMismatch.label(), "session_mismatch");
        assert!(!ValidationOutcome::Locked.is_accepted());
    }
}
