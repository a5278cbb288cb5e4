//! Credential storage: per-entity repository traits and record types.
//!
//! All coordination state for the auth flows lives behind these traits so
//! the handlers never touch a database driver directly. `PostgresStore` is
//! the production implementation; `MemoryStore` backs tests and local
//! development without a running database.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::token::VerificationKind;

/// Identity record. At most one row per email is ever verified; unverified
/// rows are disposable and replaced by a fresh signup.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ephemeral one-time code. At most one live row per (`user_id`, `kind`).
#[derive(Debug, Clone)]
pub struct CodeRecord {
    pub user_id: Uuid,
    pub kind: VerificationKind,
    pub code_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CodeRecord {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Long-lived session credential. Only the SHA-256 hash of the raw token is
/// stored; rotation deactivates the row instead of deleting it so replay of
/// a consumed token can be detected.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Outcome when attempting to create a new user + confirmation code.
#[derive(Debug)]
pub enum SignupOutcome {
    Created(UserRecord),
    Conflict,
}

/// Outcome of a cooldown-guarded code replacement.
#[derive(Debug, PartialEq, Eq)]
pub enum ResendOutcome {
    Replaced,
    Cooldown,
    Missing,
}

/// Outcome of presenting a refresh token for rotation.
#[derive(Debug, PartialEq, Eq)]
pub enum RotateOutcome {
    Rotated { user_id: Uuid },
    Theft { user_id: Uuid },
    Invalid,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by normalized email, verified accounts only.
    async fn find_verified_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>>;

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait VerificationCodeStore: Send + Sync {
    /// Fetch the current code for (`user_id`, `kind`), expired or not;
    /// callers decide how to report expiry.
    async fn find_code(&self, user_id: Uuid, kind: VerificationKind) -> Result<Option<CodeRecord>>;

    /// Delete any prior code of this kind and create a fresh one, as a
    /// single atomic step.
    async fn replace_code(
        &self,
        user_id: Uuid,
        kind: VerificationKind,
        code_hash: &str,
        ttl_seconds: i64,
    ) -> Result<()>;

    /// Cooldown check plus delete-then-create as one serialized step, so
    /// two racing resends leave at most one fresh code behind.
    async fn replace_code_after_cooldown(
        &self,
        user_id: Uuid,
        kind: VerificationKind,
        code_hash: &str,
        ttl_seconds: i64,
        cooldown_seconds: i64,
    ) -> Result<ResendOutcome>;

    /// Consume (delete) codes of this kind for the user.
    async fn delete_codes(&self, user_id: Uuid, kind: VerificationKind) -> Result<()>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_token(&self, user_id: Uuid, token_hash: &[u8], ttl_seconds: i64) -> Result<()>;

    async fn count_active(&self, user_id: Uuid) -> Result<i64>;

    /// Session-cap eviction: delete the single oldest active token, by id.
    /// Racing signins may overshoot the cap by one; that is acceptable.
    async fn delete_oldest_active(&self, user_id: Uuid) -> Result<()>;

    /// Delete by hash; returns whether a row matched. Missing rows are not
    /// an error so signout stays idempotent.
    async fn delete_by_hash(&self, token_hash: &[u8]) -> Result<bool>;

    /// One-shot rotation. Consumes the presented token and inserts its
    /// replacement atomically; presenting an already-consumed token marks
    /// every token of that user inactive inside the same transaction.
    async fn rotate(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<RotateOutcome>;
}

/// Full credential store: the per-entity repositories plus the two
/// operations that must mutate several entities in one transaction.
#[async_trait]
pub trait CredentialStore: UserStore + VerificationCodeStore + RefreshTokenStore {
    /// Signup transaction: a verified duplicate is a conflict; a stale
    /// unverified duplicate is cascade-deleted before the new user and its
    /// confirmation code are created.
    async fn create_account(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        code_hash: &str,
        code_ttl_seconds: i64,
    ) -> Result<SignupOutcome>;

    /// Password-reset transaction: swap the password hash, delete every
    /// refresh token (force re-login everywhere), purge remaining reset
    /// codes.
    async fn reset_credentials(&self, user_id: Uuid, new_password_hash: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{ResendOutcome, RotateOutcome, SignupOutcome};
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn resend_outcome_debug_names() {
        assert_eq!(format!("{:?}", ResendOutcome::Replaced), "Replaced");
        assert_eq!(format!("{:?}", ResendOutcome::Cooldown), "Cooldown");
        assert_eq!(format!("{:?}", ResendOutcome::Missing), "Missing");
    }

    #[test]
    fn rotate_outcome_carries_user() {
        let user_id = Uuid::nil();
        assert_eq!(
            RotateOutcome::Rotated { user_id },
            RotateOutcome::Rotated { user_id }
        );
        assert_ne!(RotateOutcome::Invalid, RotateOutcome::Theft { user_id });
    }
}
