//! Database models for users.

use chrono::{DateTime, Utc};

use crate::api::models::users::{Language, Theme};
use crate::types::UserId;

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    /// Normalized (trimmed, lower-cased) address
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub email_verified: bool,
}

/// Database request for updating a user; `None` leaves a column unchanged
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: Option<bool>,
    pub currency: Option<String>,
    pub language: Option<Language>,
    pub theme: Option<Theme>,
    /// `Some(None)` clears the secret
    pub two_factor_secret: Option<Option<String>>,
    pub two_factor_enabled: Option<bool>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserUpdateDBRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.password_hash.is_none()
            && self.email_verified.is_none()
            && self.currency.is_none()
            && self.language.is_none()
            && self.theme.is_none()
            && self.two_factor_secret.is_none()
            && self.two_factor_enabled.is_none()
            && self.last_login.is_none()
    }
}

/// Database response for a user
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub email_verified: bool,
    pub currency: String,
    pub language: Language,
    pub theme: Theme,
    pub two_factor_secret: Option<String>,
    pub two_factor_enabled: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
