use crate::db::errors::DbError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use utoipa::ToSchema;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Request data failed validation
    #[error("Validation failed: {message}")]
    Validation { message: String, field: Option<String> },

    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Password was correct but the account has two-factor authentication enabled
    #[error("Two-factor code required")]
    TwoFactorRequired,

    /// Authenticated, but the action is not allowed in the account's current state
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`
    pub success: bool,
    /// Machine-readable error code, e.g. `VALIDATION_ERROR`
    pub code: String,
    /// User-facing message (German)
    pub message: String,
    /// Offending request field for validation errors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Set on login when a TOTP code must be supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub two_factor_required: Option<bool>,
}

impl Error {
    /// Shorthand for a validation error on a single field.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Unauthenticated { .. } | Error::TwoFactorRequired => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    /// Machine-readable code sent alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "VALIDATION_ERROR",
            Error::Unauthenticated { .. } => "UNAUTHENTICATED",
            Error::TwoFactorRequired => "TWO_FACTOR_REQUIRED",
            Error::Forbidden { .. } => "FORBIDDEN",
            Error::BadRequest { .. } => "BAD_REQUEST",
            Error::NotFound { .. } | Error::Database(DbError::NotFound) => "NOT_FOUND",
            Error::Conflict { .. } | Error::Database(DbError::UniqueViolation { .. }) => "CONFLICT",
            Error::Database(DbError::ForeignKeyViolation { .. } | DbError::CheckViolation { .. }) => "BAD_REQUEST",
            Error::Internal { .. } | Error::Database(DbError::Other(_)) | Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation { message, .. } => message.clone(),
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Bitte melde dich an.".to_string()),
            Error::TwoFactorRequired => "Bitte gib den Code aus deiner Authenticator-App ein.".to_string(),
            Error::Forbidden { message } => message.clone(),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, .. } => format!("{resource} wurde nicht gefunden."),
            Error::Internal { .. } => "Ein interner Fehler ist aufgetreten. Bitte versuche es später erneut.".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Der Eintrag wurde nicht gefunden.".to_string(),
                DbError::UniqueViolation { table, column, .. } => match (table.as_deref(), column.as_deref()) {
                    (Some("users"), Some("email")) => "Diese E-Mail-Adresse ist bereits registriert.".to_string(),
                    _ => "Der Eintrag existiert bereits.".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Ungültiger Verweis auf einen verknüpften Eintrag.".to_string(),
                DbError::CheckViolation { .. } => "Ungültige Daten.".to_string(),
                DbError::Other(_) => "Ein Datenbankfehler ist aufgetreten.".to_string(),
            },
            Error::Other(_) => "Ein interner Fehler ist aufgetreten. Bitte versuche es später erneut.".to_string(),
            Error::Conflict { message } => message.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::TwoFactorRequired | Error::Forbidden { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Validation { .. } | Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let body = ErrorResponse {
            success: false,
            code: self.code().to_string(),
            message: self.user_message(),
            field: match &self {
                Error::Validation { field, .. } => field.clone(),
                _ => None,
            },
            two_factor_required: matches!(self, Error::TwoFactorRequired).then_some(true),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("email", "x").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(Error::TwoFactorRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::Forbidden { message: "x".into() }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(Error::Database(DbError::NotFound).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Database(DbError::CheckViolation { message: "x".into() }).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_unique_email_violation_message() {
        let err = Error::Database(DbError::UniqueViolation {
            table: Some("users".into()),
            column: Some("email".into()),
            message: "UNIQUE constraint failed: users.email".into(),
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
        assert!(err.user_message().contains("bereits registriert"));
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err = Error::Internal {
            operation: "decrypt secret with key abc".into(),
        };
        assert!(!err.user_message().contains("abc"));
        let err = Error::Other(anyhow::anyhow!("connection refused to 10.0.0.1"));
        assert!(!err.user_message().contains("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = Error::validation("amount", "Der Betrag muss positiv sein.").into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.success);
        assert_eq!(body.code, "VALIDATION_ERROR");
        assert_eq!(body.field.as_deref(), Some("amount"));
        assert_eq!(body.two_factor_required, None);
    }

    #[tokio::test]
    async fn test_two_factor_body_flag() {
        let response = Error::TwoFactorRequired.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.two_factor_required, Some(true));
        assert_eq!(body.code, "TWO_FACTOR_REQUIRED");
    }
}
