//! Database repository for single-use emailed tokens.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::tokens,
    db::{
        errors::{DbError, Result},
        models::user_tokens::{TokenPurpose, UserTokenDBResponse},
    },
    types::{UserId, UserTokenId, abbrev_uuid},
};

const USER_TOKEN_COLUMNS: &str = "id, user_id, purpose, new_email, expires_at, used_at, created_at";

pub struct UserTokens<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> UserTokens<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Issue a token for `purpose`, invalidating earlier unused ones of the same purpose.
    ///
    /// Returns the raw token (to be emailed) together with the stored record.
    #[instrument(skip(self, new_email), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn create_for_user(
        &mut self,
        user_id: UserId,
        purpose: TokenPurpose,
        ttl: Duration,
        new_email: Option<&str>,
    ) -> Result<(String, UserTokenDBResponse)> {
        self.invalidate_for_user(user_id, purpose).await?;

        let raw_token = tokens::generate_token();
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).map_err(|e| DbError::Other(anyhow::anyhow!("token lifetime out of range: {e}")))?;

        let token = sqlx::query_as::<_, UserTokenDBResponse>(&format!(
            r#"
            INSERT INTO user_tokens (id, user_id, purpose, token_hash, new_email, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {USER_TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(purpose)
        .bind(tokens::hash_token(&raw_token))
        .bind(new_email)
        .bind(now + ttl)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok((raw_token, token))
    }

    /// Find an unused, unexpired token of the given purpose
    #[instrument(skip(self, raw_token), err)]
    pub async fn find_valid(&mut self, raw_token: &str, purpose: TokenPurpose) -> Result<Option<UserTokenDBResponse>> {
        let token = sqlx::query_as::<_, UserTokenDBResponse>(&format!(
            "SELECT {USER_TOKEN_COLUMNS} FROM user_tokens \
             WHERE token_hash = ? AND purpose = ? AND used_at IS NULL AND expires_at > ?"
        ))
        .bind(tokens::hash_token(raw_token.trim()))
        .bind(purpose)
        .bind(Utc::now())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Mark a token used. Returns false if it was used in the meantime.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_used(&mut self, id: UserTokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE user_tokens SET used_at = ? WHERE id = ? AND used_at IS NULL")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Invalidate all outstanding tokens of a purpose for a user
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn invalidate_for_user(&mut self, user_id: UserId, purpose: TokenPurpose) -> Result<u64> {
        let result = sqlx::query("UPDATE user_tokens SET used_at = ? WHERE user_id = ? AND purpose = ? AND used_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .bind(purpose)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Remove tokens that expired before `cutoff`, used or not
    #[instrument(skip(self), err)]
    pub async fn delete_expired(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE expires_at < ?")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_pool, insert_test_user};

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_create_and_redeem() {
        let (pool, _dir) = create_test_pool().await;
        let user = insert_test_user(&pool, "anna@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserTokens::new(&mut conn);

        let (raw, token) = repo
            .create_for_user(user.id, TokenPurpose::PasswordReset, HOUR, None)
            .await
            .unwrap();
        assert_eq!(token.purpose, TokenPurpose::PasswordReset);
        assert!(token.used_at.is_none());

        // wrong purpose does not match
        assert!(repo.find_valid(&raw, TokenPurpose::EmailVerification).await.unwrap().is_none());

        let found = repo.find_valid(&raw, TokenPurpose::PasswordReset).await.unwrap().unwrap();
        assert_eq!(found.id, token.id);

        assert!(repo.mark_used(found.id).await.unwrap());
        assert!(!repo.mark_used(found.id).await.unwrap());
        assert!(repo.find_valid(&raw, TokenPurpose::PasswordReset).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_token_invalidates_previous() {
        let (pool, _dir) = create_test_pool().await;
        let user = insert_test_user(&pool, "anna@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserTokens::new(&mut conn);

        let (first, _) = repo
            .create_for_user(user.id, TokenPurpose::EmailVerification, HOUR, None)
            .await
            .unwrap();
        let (reset, _) = repo
            .create_for_user(user.id, TokenPurpose::PasswordReset, HOUR, None)
            .await
            .unwrap();
        let (second, _) = repo
            .create_for_user(user.id, TokenPurpose::EmailVerification, HOUR, None)
            .await
            .unwrap();

        assert!(repo.find_valid(&first, TokenPurpose::EmailVerification).await.unwrap().is_none());
        assert!(repo.find_valid(&second, TokenPurpose::EmailVerification).await.unwrap().is_some());
        // other purposes are untouched
        assert!(repo.find_valid(&reset, TokenPurpose::PasswordReset).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_token_rejected_and_purged() {
        let (pool, _dir) = create_test_pool().await;
        let user = insert_test_user(&pool, "anna@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserTokens::new(&mut conn);

        let (raw, _) = repo
            .create_for_user(user.id, TokenPurpose::EmailChange, Duration::ZERO, Some("new@example.com"))
            .await
            .unwrap();
        assert!(repo.find_valid(&raw, TokenPurpose::EmailChange).await.unwrap().is_none());

        let purged = repo.delete_expired(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn test_email_change_keeps_new_address() {
        let (pool, _dir) = create_test_pool().await;
        let user = insert_test_user(&pool, "anna@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = UserTokens::new(&mut conn);

        let (raw, _) = repo
            .create_for_user(user.id, TokenPurpose::EmailChange, HOUR, Some("anna@new.example"))
            .await
            .unwrap();
        let token = repo.find_valid(&raw, TokenPurpose::EmailChange).await.unwrap().unwrap();
        assert_eq!(token.new_email.as_deref(), Some("anna@new.example"));
        assert_eq!(token.user_id, user.id);
    }
}
