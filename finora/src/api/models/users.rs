//! API request/response models for users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::users::UserDBResponse;
use crate::errors::{Error, Result};
use crate::types::UserId;

/// The authenticated caller, taken from the access token.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
}

/// UI language preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    En,
}

/// UI theme preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct Preferences {
    /// ISO 4217 currency code, e.g. `EUR`
    pub currency: String,
    pub language: Language,
    pub theme: Theme,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub two_factor_enabled: bool,
    pub preferences: Preferences,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            email: db.email,
            name: db.name,
            email_verified: db.email_verified,
            two_factor_enabled: db.two_factor_enabled,
            preferences: Preferences {
                currency: db.currency,
                language: db.language,
                theme: db.theme,
            },
            last_login: db.last_login,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangeEmailRequest {
    pub new_email: String,
    /// Current password, to confirm the change
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmEmailChangeRequest {
    pub token: String,
}

/// Partial update; omitted fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePreferencesRequest {
    pub currency: Option<String>,
    pub language: Option<Language>,
    pub theme: Option<Theme>,
}

impl UpdatePreferencesRequest {
    /// Returns the normalized (upper-cased) currency code, if one was given.
    pub fn normalized_currency(&self) -> Result<Option<String>> {
        let Some(currency) = &self.currency else {
            return Ok(None);
        };
        let currency = currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(Error::validation(
                "currency",
                "Die Währung muss ein dreistelliger ISO-4217-Code sein (z. B. EUR).",
            ));
        }
        Ok(Some(currency))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorSetupResponse {
    /// Base32 secret for manual entry
    pub secret: String,
    /// `otpauth://` URI for QR codes
    pub otpauth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DisableTwoFactorRequest {
    pub password: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// Validate and normalize a display name.
pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("name", "Bitte gib einen Namen ein."));
    }
    if name.chars().count() > 100 {
        return Err(Error::validation("name", "Der Name darf höchstens 100 Zeichen lang sein."));
    }
    Ok(name.to_string())
}

/// Validate and normalize (trim, lower-case) an email address.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    email
        .parse::<lettre::Address>()
        .map_err(|_| Error::validation("email", "Bitte gib eine gültige E-Mail-Adresse ein."))?;
    Ok(email)
}
