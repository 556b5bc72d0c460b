//! Database repository for refresh tokens (login sessions).

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::Result,
        models::refresh_tokens::{RefreshTokenCreateDBRequest, RefreshTokenDBResponse},
    },
    types::{RefreshTokenId, UserId, abbrev_uuid},
};

const REFRESH_TOKEN_COLUMNS: &str = "id, user_id, token_hash, user_agent, expires_at, revoked_at, created_at";

pub struct RefreshTokens<'c> {
    db: &'c mut SqliteConnection,
}

impl<'c> RefreshTokens<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&request.user_id)), err)]
    pub async fn create(&mut self, request: &RefreshTokenCreateDBRequest) -> Result<RefreshTokenDBResponse> {
        let token = sqlx::query_as::<_, RefreshTokenDBResponse>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, user_agent, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING {REFRESH_TOKEN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(request.user_id)
        .bind(&request.token_hash)
        .bind(&request.user_agent)
        .bind(request.expires_at)
        .bind(Utc::now())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Find a token by hash regardless of its state; callers decide what revoked or expired means
    #[instrument(skip_all, err)]
    pub async fn find_by_hash(&mut self, token_hash: &str) -> Result<Option<RefreshTokenDBResponse>> {
        let token = sqlx::query_as::<_, RefreshTokenDBResponse>(&format!(
            "SELECT {REFRESH_TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = ?"
        ))
        .bind(token_hash)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(token)
    }

    /// Revoke a single token. Returns false if it was already revoked, which lets
    /// concurrent refreshes of the same token detect each other.
    #[instrument(skip(self), fields(token_id = %abbrev_uuid(&id)), err)]
    pub async fn revoke(&mut self, id: RefreshTokenId) -> Result<bool> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Revoke every active session of a user
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn revoke_all_for_user(&mut self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Number of sessions that are neither revoked nor expired
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn count_active_for_user(&mut self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ? AND revoked_at IS NULL AND expires_at > ?")
                .bind(user_id)
                .bind(Utc::now())
                .fetch_one(&mut *self.db)
                .await?;

        Ok(count)
    }

    /// Remove tokens that expired before `cutoff`
    #[instrument(skip(self), err)]
    pub async fn delete_expired(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < ?")
            .bind(cutoff)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
