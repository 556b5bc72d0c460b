//! Database models for refresh tokens (login sessions).

use chrono::{DateTime, Utc};

use crate::types::{RefreshTokenId, UserId};

#[derive(Debug, Clone)]
pub struct RefreshTokenCreateDBRequest {
    pub user_id: UserId,
    /// SHA-256 digest of the raw token
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenDBResponse {
    pub id: RefreshTokenId,
    pub user_id: UserId,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenDBResponse {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
