use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::models::users::UserResponse;

/// Request to register a new user
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Display name
    pub name: String,
    /// Email address (must be unique)
    pub email: String,
    /// Password (will be hashed)
    pub password: String,
}

/// Request to login
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Six-digit code, required when two-factor authentication is enabled
    #[serde(default)]
    pub totp_code: Option<String>,
}

/// Access/refresh token pair issued at login and refresh
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthTokens {
    /// Short-lived JWT for the `Authorization: Bearer` header
    pub access_token: String,
    /// Opaque token for `/api/auth/refresh` (also set as HttpOnly cookie)
    pub refresh_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Response after successful login
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub success: bool,
    pub user: UserResponse,
    #[serde(flatten)]
    pub tokens: AuthTokens,
}

/// Response after successful registration
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
}

/// Refresh token supplied in the body; browser clients may send the cookie instead
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

/// One-time token from an emailed link
#[derive(Debug, Serialize, Deserialize, ToSchema, IntoParams)]
pub struct TokenRequest {
    pub token: String,
}

/// Request carrying only an email address (password reset, resend verification)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EmailRequest {
    pub email: String,
}

/// Request to confirm password reset with token
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    /// Reset token from email
    pub token: String,
    /// New password
    pub password: String,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

fn cookie_headers(cookie: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            headers.insert(header::SET_COOKIE, value);
        }
        Err(e) => tracing::error!("Refusing to send malformed Set-Cookie header: {e}"),
    }
    headers
}

/// Structured response for successful login
pub struct LoginResponse {
    pub auth_response: AuthResponse,
    pub cookie: String,
}

impl IntoResponse for LoginResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, cookie_headers(&self.cookie), Json(self.auth_response)).into_response()
    }
}

/// Structured response for a token refresh or any other reissue of a session
pub struct TokensResponse {
    pub tokens: AuthTokens,
    pub cookie: String,
}

impl IntoResponse for TokensResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, cookie_headers(&self.cookie), Json(self.tokens)).into_response()
    }
}

/// Structured response for successful logout
pub struct LogoutResponse {
    pub message: MessageResponse,
    pub cookie: String,
}

impl IntoResponse for LogoutResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, cookie_headers(&self.cookie), Json(self.message)).into_response()
    }
}
