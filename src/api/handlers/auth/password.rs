//! Adaptive hashing for passwords and one-time codes.
//!
//! Argon2id with a generated salt; values are never looked up by hash
//! equality, only compared after fetching the stored PHC string.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::rngs::OsRng;

/// Hashed when `forgot_password` finds no account, so the response takes
/// the same time either way.
pub(super) const TIMING_PLACEHOLDER: &str = "placeholder-credential";

/// Hash a password or one-time code.
///
/// # Errors
///
/// Returns an error if hashing fails (unusable parameters).
pub(super) fn hash(value: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(value.as_bytes(), &salt)
        .map_err(|_| anyhow!("failed to hash credential"))?
        .to_string();
    Ok(hash)
}

/// Compare a candidate value against a stored hash.
///
/// Unparseable stored hashes count as a mismatch rather than an error, so
/// a corrupt row cannot be told apart from a wrong credential.
pub(super) fn verify(value: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(value.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let hash = hash("Aa1!aaaa")?;
        assert!(verify("Aa1!aaaa", &hash));
        assert!(!verify("Aa1!aaab", &hash));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        assert_ne!(hash("same-input")?, hash("same-input")?);
        Ok(())
    }

    #[test]
    fn garbage_stored_hash_is_a_mismatch() {
        assert!(!verify("anything", "not-a-phc-string"));
    }
}
