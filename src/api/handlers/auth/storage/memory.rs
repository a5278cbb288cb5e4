//! In-memory credential store for tests and local development.
//!
//! A single mutex guards all three entity sets, so every trait method is a
//! serialized critical section and the transactional store operations keep
//! the same all-or-nothing behavior as the Postgres implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::token::VerificationKind;

use super::{
    CodeRecord, CredentialStore, RefreshTokenRecord, RefreshTokenStore, ResendOutcome,
    RotateOutcome, SignupOutcome, UserRecord, UserStore, VerificationCodeStore,
};

#[derive(Default)]
struct Inner {
    users: Vec<UserRecord>,
    codes: Vec<CodeRecord>,
    tokens: Vec<RefreshTokenRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    writes: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn note_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of mutating store operations that actually changed state.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub async fn user_by_email(&self, email: &str) -> Option<UserRecord> {
        let inner = self.inner.lock().await;
        inner.users.iter().find(|user| user.email == email).cloned()
    }

    pub async fn active_token_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner
            .tokens
            .iter()
            .filter(|token| token.user_id == user_id && token.is_active)
            .count()
    }

    pub async fn token_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.lock().await;
        inner
            .tokens
            .iter()
            .filter(|token| token.user_id == user_id)
            .count()
    }

    /// Shift a code's `created_at` into the past (cooldown tests).
    pub async fn backdate_code(&self, user_id: Uuid, kind: VerificationKind, seconds: i64) {
        let mut inner = self.inner.lock().await;
        for code in &mut inner.codes {
            if code.user_id == user_id && code.kind == kind {
                code.created_at -= Duration::seconds(seconds);
            }
        }
    }

    /// Force a code past its expiry (expiry tests).
    pub async fn expire_code(&self, user_id: Uuid, kind: VerificationKind) {
        let mut inner = self.inner.lock().await;
        for code in &mut inner.codes {
            if code.user_id == user_id && code.kind == kind {
                code.expires_at = Utc::now() - Duration::seconds(1);
            }
        }
    }

    /// Force a refresh token past its expiry.
    pub async fn expire_token(&self, token_hash: &[u8]) {
        let mut inner = self.inner.lock().await;
        for token in &mut inner.tokens {
            if token.token_hash == token_hash {
                token.expires_at = Utc::now() - Duration::seconds(1);
            }
        }
    }
}

fn new_token(user_id: Uuid, token_hash: &[u8], ttl_seconds: i64) -> RefreshTokenRecord {
    let now = Utc::now();
    RefreshTokenRecord {
        id: Uuid::new_v4(),
        user_id,
        token_hash: token_hash.to_vec(),
        expires_at: now + Duration::seconds(ttl_seconds),
        is_active: true,
        created_at: now,
    }
}

fn new_code(
    user_id: Uuid,
    kind: VerificationKind,
    code_hash: &str,
    ttl_seconds: i64,
) -> CodeRecord {
    let now = Utc::now();
    CodeRecord {
        user_id,
        kind,
        code_hash: code_hash.to_string(),
        created_at: now,
        expires_at: now + Duration::seconds(ttl_seconds),
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_verified_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .iter()
            .find(|user| user.email == email && user.email_verified)
            .cloned())
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|user| user.id == user_id).cloned())
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for user in &mut inner.users {
            if user.id == user_id && !user.email_verified {
                user.email_verified = true;
                user.updated_at = Utc::now();
                self.note_write();
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VerificationCodeStore for MemoryStore {
    async fn find_code(&self, user_id: Uuid, kind: VerificationKind) -> Result<Option<CodeRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .codes
            .iter()
            .filter(|code| code.user_id == user_id && code.kind == kind)
            .max_by_key(|code| code.created_at)
            .cloned())
    }

    async fn replace_code(
        &self,
        user_id: Uuid,
        kind: VerificationKind,
        code_hash: &str,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .codes
            .retain(|code| !(code.user_id == user_id && code.kind == kind));
        inner.codes.push(new_code(user_id, kind, code_hash, ttl_seconds));
        self.note_write();
        Ok(())
    }

    async fn replace_code_after_cooldown(
        &self,
        user_id: Uuid,
        kind: VerificationKind,
        code_hash: &str,
        ttl_seconds: i64,
        cooldown_seconds: i64,
    ) -> Result<ResendOutcome> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let Some((created_at, expires_at)) = inner
            .codes
            .iter()
            .filter(|code| code.user_id == user_id && code.kind == kind)
            .max_by_key(|code| code.created_at)
            .map(|code| (code.created_at, code.expires_at))
        else {
            return Ok(ResendOutcome::Missing);
        };

        if expires_at < now {
            return Ok(ResendOutcome::Missing);
        }
        if created_at + Duration::seconds(cooldown_seconds) > now {
            return Ok(ResendOutcome::Cooldown);
        }

        inner
            .codes
            .retain(|code| !(code.user_id == user_id && code.kind == kind));
        inner.codes.push(new_code(user_id, kind, code_hash, ttl_seconds));
        self.note_write();
        Ok(ResendOutcome::Replaced)
    }

    async fn delete_codes(&self, user_id: Uuid, kind: VerificationKind) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let before = inner.codes.len();
        inner
            .codes
            .retain(|code| !(code.user_id == user_id && code.kind == kind));
        if inner.codes.len() != before {
            self.note_write();
        }
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_token(&self, user_id: Uuid, token_hash: &[u8], ttl_seconds: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.push(new_token(user_id, token_hash, ttl_seconds));
        self.note_write();
        Ok(())
    }

    async fn count_active(&self, user_id: Uuid) -> Result<i64> {
        let inner = self.inner.lock().await;
        let count = inner
            .tokens
            .iter()
            .filter(|token| token.user_id == user_id && token.is_active)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn delete_oldest_active(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let oldest = inner
            .tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| token.user_id == user_id && token.is_active)
            .min_by_key(|(index, token)| (token.created_at, *index))
            .map(|(index, _)| index);
        if let Some(index) = oldest {
            inner.tokens.remove(index);
            self.note_write();
        }
        Ok(())
    }

    async fn delete_by_hash(&self, token_hash: &[u8]) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let before = inner.tokens.len();
        inner.tokens.retain(|token| token.token_hash != token_hash);
        let deleted = inner.tokens.len() != before;
        if deleted {
            self.note_write();
        }
        Ok(deleted)
    }

    async fn rotate(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<RotateOutcome> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        let Some(position) = inner
            .tokens
            .iter()
            .position(|token| token.token_hash == presented_hash)
        else {
            return Ok(RotateOutcome::Invalid);
        };

        if inner.tokens[position].expires_at < now {
            return Ok(RotateOutcome::Invalid);
        }

        let user_id = inner.tokens[position].user_id;
        if !inner.tokens[position].is_active {
            // Replay of a consumed token: sweep every token of this user in
            // the same critical section that detected the reuse.
            for token in &mut inner.tokens {
                if token.user_id == user_id {
                    token.is_active = false;
                }
            }
            self.note_write();
            return Ok(RotateOutcome::Theft { user_id });
        }

        inner.tokens[position].is_active = false;
        inner
            .tokens
            .push(new_token(user_id, replacement_hash, ttl_seconds));
        self.note_write();
        Ok(RotateOutcome::Rotated { user_id })
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_account(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        code_hash: &str,
        code_ttl_seconds: i64,
    ) -> Result<SignupOutcome> {
        let mut inner = self.inner.lock().await;

        let existing = inner
            .users
            .iter()
            .find(|user| user.email == email)
            .map(|user| (user.id, user.email_verified));
        if let Some((stale_id, email_verified)) = existing {
            if email_verified {
                return Ok(SignupOutcome::Conflict);
            }
            inner.tokens.retain(|token| token.user_id != stale_id);
            inner.codes.retain(|code| code.user_id != stale_id);
            inner.users.retain(|user| user.id != stale_id);
        }

        let now = Utc::now();
        let user = UserRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            email_verified: false,
            created_at: now,
            updated_at: now,
        };
        inner.users.push(user.clone());
        inner.codes.push(new_code(
            user.id,
            VerificationKind::ConfirmEmail,
            code_hash,
            code_ttl_seconds,
        ));
        self.note_write();
        Ok(SignupOutcome::Created(user))
    }

    async fn reset_credentials(&self, user_id: Uuid, new_password_hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        for user in &mut inner.users {
            if user.id == user_id {
                user.password_hash = new_password_hash.to_string();
                user.updated_at = Utc::now();
            }
        }
        inner.tokens.retain(|token| token.user_id != user_id);
        inner.codes.retain(|code| {
            !(code.user_id == user_id && code.kind == VerificationKind::PasswordReset)
        });
        self.note_write();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rotation_is_one_shot_and_replay_revokes_all() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.insert_token(user_id, b"first", 60).await?;

        let outcome = store.rotate(b"first", b"second", 60).await?;
        assert_eq!(outcome, RotateOutcome::Rotated { user_id });
        assert_eq!(store.active_token_count(user_id).await, 1);

        // Replay of the consumed token trips the sweep.
        let outcome = store.rotate(b"first", b"third", 60).await?;
        assert_eq!(outcome, RotateOutcome::Theft { user_id });
        assert_eq!(store.active_token_count(user_id).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_invalid_not_theft() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.insert_token(user_id, b"stale", 60).await?;
        store.expire_token(b"stale").await;

        let outcome = store.rotate(b"stale", b"next", 60).await?;
        assert_eq!(outcome, RotateOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn oldest_active_token_is_evicted_first() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.insert_token(user_id, b"one", 60).await?;
        store.insert_token(user_id, b"two", 60).await?;
        store.insert_token(user_id, b"three", 60).await?;

        store.delete_oldest_active(user_id).await?;
        assert_eq!(store.active_token_count(user_id).await, 2);
        assert!(!store.delete_by_hash(b"one").await?, "oldest already gone");
        assert!(store.delete_by_hash(b"two").await?);
        Ok(())
    }

    #[tokio::test]
    async fn resend_respects_cooldown_window() -> Result<()> {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        store
            .replace_code(user_id, VerificationKind::PasswordReset, "hash-1", 900)
            .await?;

        let outcome = store
            .replace_code_after_cooldown(user_id, VerificationKind::PasswordReset, "hash-2", 900, 60)
            .await?;
        assert_eq!(outcome, ResendOutcome::Cooldown);

        store
            .backdate_code(user_id, VerificationKind::PasswordReset, 61)
            .await;
        let outcome = store
            .replace_code_after_cooldown(user_id, VerificationKind::PasswordReset, "hash-2", 900, 60)
            .await?;
        assert_eq!(outcome, ResendOutcome::Replaced);
        Ok(())
    }

    #[tokio::test]
    async fn stale_unverified_signup_is_superseded() -> Result<()> {
        let store = MemoryStore::new();
        let first = store
            .create_account("Ann", "ann@x.com", "hash-a", "code-a", 900)
            .await?;
        let SignupOutcome::Created(first) = first else {
            panic!("expected created");
        };
        store.insert_token(first.id, b"orphan", 60).await?;

        let second = store
            .create_account("Ann", "ann@x.com", "hash-b", "code-b", 900)
            .await?;
        let SignupOutcome::Created(second) = second else {
            panic!("expected created");
        };
        assert_ne!(first.id, second.id);
        assert_eq!(store.token_count(first.id).await, 0);

        store.mark_email_verified(second.id).await?;
        let third = store
            .create_account("Ann", "ann@x.com", "hash-c", "code-c", 900)
            .await?;
        assert!(matches!(third, SignupOutcome::Conflict));
        Ok(())
    }
}
