//! One-time code and opaque token generation.
//!
//! Codes are short secrets delivered out-of-band and stored only as
//! Argon2id hashes keyed with a server-side pepper, so a copied database
//! yields nothing redeemable. Bearer tokens (sessions, operation grants)
//! are 32 random bytes; stores keep their SHA-256 digest.

use anyhow::{anyhow, Context, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use base64::Engine;
use rand::{rngs::OsRng, Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::config::AuthConfig;

/// A freshly issued code: plaintext for delivery, hash for storage.
///
/// The plaintext leaves the process exactly once, through the delivery
/// gateway.
#[derive(Debug)]
pub struct IssuedCode {
    pub plaintext: String,
    pub hash: String,
}

/// Generates and verifies one-time codes under a fixed policy and pepper.
pub struct CodeGenerator {
    length: usize,
    alphabet: Vec<char>,
    pepper: SecretString,
}

impl CodeGenerator {
    #[must_use]
    pub fn new(config: &AuthConfig, pepper: SecretString) -> Self {
        Self {
            length: config.otp_length(),
            alphabet: config.otp_alphabet().chars().collect(),
            pepper,
        }
    }

    /// Issue a new one-time code.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured alphabet is empty or hashing fails.
    pub fn issue(&self) -> Result<IssuedCode> {
        if self.alphabet.is_empty() || self.length == 0 {
            return Err(anyhow!("code alphabet and length must be non-empty"));
        }

        let mut rng = OsRng;
        let mut plaintext = String::with_capacity(self.length);
        for _ in 0..self.length {
            let idx = rng.gen_range(0..self.alphabet.len());
            plaintext.push(self.alphabet[idx]);
        }

        let hash = self.hash_code(&plaintext)?;
        Ok(IssuedCode { plaintext, hash })
    }

    /// Verify a presented code against a stored hash.
    ///
    /// Comparison runs through Argon2id verification, which is constant-time
    /// with respect to the code contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored hash cannot be parsed; a mismatching
    /// code is `Ok(false)`, not an error.
    pub fn verify(&self, presented: &str, stored_hash: &str) -> Result<bool> {
        let parsed =
            PasswordHash::new(stored_hash).map_err(|_| anyhow!("invalid stored code hash"))?;
        let argon2 = self.argon2()?;
        Ok(argon2
            .verify_password(presented.trim().as_bytes(), &parsed)
            .is_ok())
    }

    fn hash_code(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = self.argon2()?;
        let hash = argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|_| anyhow!("failed to hash one-time code"))?
            .to_string();
        Ok(hash)
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.pepper.expose_secret().as_bytes(),
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::default(),
        )
        .map_err(|_| anyhow!("failed to initialize Argon2id"))
    }
}

/// Create an opaque bearer token (challenge handle, session, grant).
///
/// The raw value is only ever returned to the client; stores keep a digest.
///
/// # Errors
///
/// Returns an error if the OS random source fails.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a bearer token so raw values never touch the store.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
