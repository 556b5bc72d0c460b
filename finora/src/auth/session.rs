//! JWT access token creation and verification.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{api::models::users::CurrentUser, config::Config, errors::Error, types::UserId};

/// JWT access token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,   // Subject (user ID)
    pub email: String, // User email
    pub exp: i64,      // Expiration time
    pub iat: i64,      // Issued at
    pub jti: Uuid,     // Token ID
}

impl AccessClaims {
    /// Create new access claims for a user
    pub fn new(user: &CurrentUser, config: &Config) -> Self {
        let now = Utc::now();
        let exp = now + config.auth.access_token_expiry;

        Self {
            sub: user.id,
            email: user.email.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4(),
        }
    }
}

impl From<AccessClaims> for CurrentUser {
    fn from(claims: AccessClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
        }
    }
}

fn secret_key(config: &Config) -> Result<&str, Error> {
    config.secret_key.as_deref().ok_or_else(|| Error::Internal {
        operation: "JWT access tokens: secret_key is required".to_string(),
    })
}

/// Create a signed access token for a user
pub fn create_access_token(user: &CurrentUser, config: &Config) -> Result<String, Error> {
    let claims = AccessClaims::new(user, config);
    let key = EncodingKey::from_secret(secret_key(config)?.as_bytes());
    encode(&Header::default(), &claims, &key).map_err(|e| Error::Internal {
        operation: format!("create JWT: {e}"),
    })
}

/// Verify and decode an access token
pub fn verify_access_token(token: &str, config: &Config) -> Result<CurrentUser, Error> {
    let key = DecodingKey::from_secret(secret_key(config)?.as_bytes());
    let validation = Validation::default();

    let token_data = decode::<AccessClaims>(token, &key, &validation).map_err(|e| match e.kind() {
        // Client errors (401) - malformed tokens, invalid claims, expired tokens
        jsonwebtoken::errors::ErrorKind::InvalidToken
        | jsonwebtoken::errors::ErrorKind::InvalidSignature
        | jsonwebtoken::errors::ErrorKind::ExpiredSignature
        | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
        | jsonwebtoken::errors::ErrorKind::InvalidIssuer
        | jsonwebtoken::errors::ErrorKind::InvalidAudience
        | jsonwebtoken::errors::ErrorKind::InvalidSubject
        | jsonwebtoken::errors::ErrorKind::ImmatureSignature
        | jsonwebtoken::errors::ErrorKind::Base64(_)
        | jsonwebtoken::errors::ErrorKind::Json(_)
        | jsonwebtoken::errors::ErrorKind::Utf8(_)
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => {
            let message = if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                "Deine Sitzung ist abgelaufen. Bitte melde dich erneut an."
            } else {
                "Ungültiges Zugriffstoken."
            };
            Error::Unauthenticated {
                message: Some(message.to_string()),
            }
        }

        // Server errors (500) - key issues, internal failures
        jsonwebtoken::errors::ErrorKind::InvalidEcdsaKey
        | jsonwebtoken::errors::ErrorKind::InvalidRsaKey(_)
        | jsonwebtoken::errors::ErrorKind::RsaFailedSigning
        | jsonwebtoken::errors::ErrorKind::InvalidAlgorithmName
        | jsonwebtoken::errors::ErrorKind::InvalidKeyFormat
        | jsonwebtoken::errors::ErrorKind::MissingAlgorithm
        | jsonwebtoken::errors::ErrorKind::Crypto(_) => Error::Internal {
            operation: format!("JWT verification: {e}"),
        },

        // Catch-all for any future error variants (default to server error for safety)
        _ => Error::Internal {
            operation: format!("JWT verification (unknown error): {e}"),
        },
    })?;

    Ok(CurrentUser::from(token_data.claims))
}
