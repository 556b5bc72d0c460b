//! Database models for single-use emailed tokens.

use chrono::{DateTime, Utc};

use crate::types::{UserId, UserTokenId};

/// What a one-time token may be redeemed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerification,
    PasswordReset,
    EmailChange,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserTokenDBResponse {
    pub id: UserTokenId,
    pub user_id: UserId,
    pub purpose: TokenPurpose,
    /// Pending address for `email_change` tokens
    pub new_email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
