//! Auth handlers.
//!
//! Registration, email verification, the two-step login ceremony, and session
//! endpoints. Handlers stay thin: they parse the wire types, call into the
//! domain services, and map [`crate::error::AuthError`] onto statuses.

pub(crate) mod login;
pub(crate) mod register;
pub(crate) mod session;
pub(crate) mod types;
pub(crate) mod verification;
