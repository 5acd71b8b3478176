//! # Konfirmo (MFA & Step-Up Verification)
//!
//! `konfirmo` issues and validates short-lived verification challenges: email
//! confirmation on signup, one-time codes as the second login factor, and
//! step-up confirmation for sensitive operations.
//!
//! ## Challenge Model
//!
//! Every code lives in a **challenge ledger** keyed by `(identity, purpose)`.
//! At most one challenge per pair is active at a time; requesting a new code
//! supersedes the previous one. Codes are stored as peppered `Argon2id` hashes,
//! never in clear.
//!
//! - **Attempt accounting:** the attempt counter is bumped before the code is
//!   checked, so a validation that dies mid-flight still costs an attempt.
//! - **Lockout:** a challenge that exhausts its attempt budget locks; the right
//!   code is worthless afterwards.
//! - **Single use:** consumption is a compare-and-swap, so two racing
//!   validations cannot both win.
//!
//! ## Login Ceremony
//!
//! A correct password never mints a session on its own. It opens a `Login`
//! challenge and returns a `login_id`; only the matching one-time code turns
//! that into a session token. Unknown address, wrong password, and unverified
//! email all collapse into the same reply so accounts cannot be enumerated.
//!
//! ## Step-Up Grants
//!
//! Sensitive operations (`create_account`, `transfer_internal`,
//! `transfer_external`) require a fresh challenge bound to the session that
//! asked for it. Confirming the challenge mints a **single-use grant** scoped
//! to exactly that operation; executing the operation consumes the grant
//! atomically.
//!
//! ## Storage
//!
//! State lives in `PostgreSQL` (via `sqlx`) or, for development, in process
//! memory. Session and grant tokens are stored as `SHA-256` digests only;
//! terminal rows are swept by a background purge task.

pub mod api;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod login;
pub mod session;
pub mod stepup;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
