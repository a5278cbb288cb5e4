//! Postgres-backed credential store.
//!
//! Raw queries wrapped in `db.query` spans; every multi-row step runs in a
//! single transaction with a row lock on the contended record.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::token::VerificationKind;

use super::{
    CodeRecord, CredentialStore, RefreshTokenStore, ResendOutcome, RotateOutcome, SignupOutcome,
    UserRecord, UserStore, VerificationCodeStore,
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> UserRecord {
    UserRecord {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        email_verified: row.get("email_verified"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn code_from_row(row: &sqlx::postgres::PgRow) -> Result<CodeRecord> {
    let kind: String = row.get("kind");
    let kind = VerificationKind::parse(&kind)
        .ok_or_else(|| anyhow!("unknown verification kind: {kind}"))?;
    Ok(CodeRecord {
        user_id: row.get("user_id"),
        kind,
        code_hash: row.get("code_hash"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    })
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_verified_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, name, email, password_hash, email_verified, created_at, updated_at
            FROM users
            WHERE email = $1 AND email_verified
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>> {
        let query = r"
            SELECT id, name, email, password_hash, email_verified, created_at, updated_at
            FROM users
            WHERE id = $1
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup user by id")?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn mark_email_verified(&self, user_id: Uuid) -> Result<()> {
        let query = r"
            UPDATE users
            SET email_verified = TRUE,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to mark email verified")?;
        Ok(())
    }
}

#[async_trait]
impl VerificationCodeStore for PostgresStore {
    async fn find_code(&self, user_id: Uuid, kind: VerificationKind) -> Result<Option<CodeRecord>> {
        let query = r"
            SELECT user_id, kind, code_hash, created_at, expires_at
            FROM verification_codes
            WHERE user_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup verification code")?;
        row.as_ref().map(code_from_row).transpose()
    }

    async fn replace_code(
        &self,
        user_id: Uuid,
        kind: VerificationKind,
        code_hash: &str,
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin replace-code")?;
        delete_codes_tx(&mut tx, user_id, kind).await?;
        insert_code_tx(&mut tx, user_id, kind, code_hash, ttl_seconds).await?;
        tx.commit().await.context("commit replace-code")?;
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
        let mut tx = self.pool.begin().await.context("begin resend")?;

        // Lock the current code row so two racing resends serialize here.
        let query = r"
            SELECT created_at, expires_at
            FROM verification_codes
            WHERE user_id = $1 AND kind = $2
            ORDER BY created_at DESC
            LIMIT 1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .bind(kind.as_str())
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock verification code")?;

        let Some(row) = row else {
            tx.rollback().await.context("rollback resend missing")?;
            return Ok(ResendOutcome::Missing);
        };

        let now = Utc::now();
        let created_at: chrono::DateTime<Utc> = row.get("created_at");
        let expires_at: chrono::DateTime<Utc> = row.get("expires_at");
        if expires_at < now {
            tx.rollback().await.context("rollback resend expired")?;
            return Ok(ResendOutcome::Missing);
        }
        if created_at + chrono::Duration::seconds(cooldown_seconds) > now {
            tx.rollback().await.context("rollback resend cooldown")?;
            return Ok(ResendOutcome::Cooldown);
        }

        delete_codes_tx(&mut tx, user_id, kind).await?;
        insert_code_tx(&mut tx, user_id, kind, code_hash, ttl_seconds).await?;
        tx.commit().await.context("commit resend")?;
        Ok(ResendOutcome::Replaced)
    }

    async fn delete_codes(&self, user_id: Uuid, kind: VerificationKind) -> Result<()> {
        let query = "DELETE FROM verification_codes WHERE user_id = $1 AND kind = $2";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete verification codes")?;
        Ok(())
    }
}

#[async_trait]
impl RefreshTokenStore for PostgresStore {
    async fn insert_token(&self, user_id: Uuid, token_hash: &[u8], ttl_seconds: i64) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn count_active(&self, user_id: Uuid) -> Result<i64> {
        let query = r"
            SELECT COUNT(*) AS active
            FROM refresh_tokens
            WHERE user_id = $1 AND is_active
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count active refresh tokens")?;
        Ok(row.get("active"))
    }

    async fn delete_oldest_active(&self, user_id: Uuid) -> Result<()> {
        // Target a concrete row id fetched just before deletion; a cap
        // overshoot under racing signins is tolerated.
        let query = r"
            SELECT id
            FROM refresh_tokens
            WHERE user_id = $1 AND is_active
            ORDER BY created_at ASC
            LIMIT 1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to find oldest refresh token")?;

        let Some(row) = row else {
            return Ok(());
        };
        let token_id: Uuid = row.get("id");

        let query = "DELETE FROM refresh_tokens WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to evict oldest refresh token")?;
        Ok(())
    }

    async fn delete_by_hash(&self, token_hash: &[u8]) -> Result<bool> {
        let query = "DELETE FROM refresh_tokens WHERE token_hash = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete refresh token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate(
        &self,
        presented_hash: &[u8],
        replacement_hash: &[u8],
        ttl_seconds: i64,
    ) -> Result<RotateOutcome> {
        let mut tx = self.pool.begin().await.context("begin rotation")?;

        // Lock the presented row: of two racing rotations exactly one wins
        // the consume step, the other observes is_active = FALSE below.
        let query = r"
            SELECT id, user_id, expires_at, is_active
            FROM refresh_tokens
            WHERE token_hash = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(presented_hash)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lock refresh token")?;

        let Some(row) = row else {
            tx.rollback().await.context("rollback rotation missing")?;
            return Ok(RotateOutcome::Invalid);
        };

        let token_id: Uuid = row.get("id");
        let user_id: Uuid = row.get("user_id");
        let expires_at: chrono::DateTime<Utc> = row.get("expires_at");
        let is_active: bool = row.get("is_active");

        if expires_at < Utc::now() {
            tx.rollback().await.context("rollback rotation expired")?;
            return Ok(RotateOutcome::Invalid);
        }

        if !is_active {
            // Replay of a consumed token: revoke everything for this user
            // inside the transaction that detected the reuse.
            let query = "UPDATE refresh_tokens SET is_active = FALSE WHERE user_id = $1";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(user_id)
                .execute(&mut *tx)
                .instrument(span)
                .await
                .context("failed to revoke refresh tokens")?;
            tx.commit().await.context("commit theft revocation")?;
            return Ok(RotateOutcome::Theft { user_id });
        }

        let query = "UPDATE refresh_tokens SET is_active = FALSE WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to consume refresh token")?;

        let query = r"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(replacement_hash)
            .bind(ttl_seconds)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert rotated refresh token")?;

        tx.commit().await.context("commit rotation")?;
        Ok(RotateOutcome::Rotated { user_id })
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn create_account(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        code_hash: &str,
        code_ttl_seconds: i64,
    ) -> Result<SignupOutcome> {
        let mut tx = self.pool.begin().await.context("begin signup")?;

        let query = r"
            SELECT id, email_verified
            FROM users
            WHERE email = $1
            FOR UPDATE
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let existing = sqlx::query(query)
            .bind(email)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to lookup existing user")?;

        if let Some(row) = existing {
            let email_verified: bool = row.get("email_verified");
            if email_verified {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            // Stale unverified registration: cascade-delete its tokens and
            // codes, then the user row, so the email can be retried.
            let existing_id: Uuid = row.get("id");
            for query in [
                "DELETE FROM refresh_tokens WHERE user_id = $1",
                "DELETE FROM verification_codes WHERE user_id = $1",
                "DELETE FROM users WHERE id = $1",
            ] {
                let span = tracing::info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "DELETE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(existing_id)
                    .execute(&mut *tx)
                    .instrument(span)
                    .await
                    .context("failed to remove stale registration")?;
            }
        }

        let query = r"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, password_hash, email_verified, created_at, updated_at
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(name)
            .bind(email)
            .bind(password_hash)
            .fetch_one(&mut *tx)
            .instrument(span)
            .await;

        let user = match row {
            Ok(row) => user_from_row(&row),
            Err(err) => {
                // A concurrent signup for the same email lost the race.
                if is_unique_violation(&err) {
                    let _ = tx.rollback().await;
                    return Ok(SignupOutcome::Conflict);
                }
                return Err(err).context("failed to insert user");
            }
        };

        insert_code_tx(
            &mut tx,
            user.id,
            VerificationKind::ConfirmEmail,
            code_hash,
            code_ttl_seconds,
        )
        .await?;

        tx.commit().await.context("commit signup")?;
        Ok(SignupOutcome::Created(user))
    }

    async fn reset_credentials(&self, user_id: Uuid, new_password_hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin password reset")?;

        let query = r"
            UPDATE users
            SET password_hash = $2,
                updated_at = NOW()
            WHERE id = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(new_password_hash)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to update password")?;

        let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to revoke sessions after reset")?;

        delete_codes_tx(&mut tx, user_id, VerificationKind::PasswordReset).await?;

        tx.commit().await.context("commit password reset")?;
        Ok(())
    }
}

async fn insert_code_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    kind: VerificationKind,
    code_hash: &str,
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO verification_codes (user_id, kind, code_hash, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(kind.as_str())
        .bind(code_hash)
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert verification code")?;
    Ok(())
}

async fn delete_codes_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    kind: VerificationKind,
) -> Result<()> {
    let query = "DELETE FROM verification_codes WHERE user_id = $1 AND kind = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(kind.as_str())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete verification codes")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::is_unique_violation;

    #[test]
    fn is_unique_violation_ignores_non_database_errors() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
