use axum::{
    Json,
    extract::{Query, State},
    http::{
        HeaderMap, StatusCode,
        header::{COOKIE, USER_AGENT},
    },
};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, AuthTokens, EmailRequest, LoginRequest, LoginResponse, LogoutResponse, MessageResponse, RefreshRequest,
            RegisterRequest, RegisterResponse, ResetPasswordRequest, TokenRequest, TokensResponse,
        },
        users::{CurrentUser, UserResponse, validate_email, validate_name},
    },
    auth::{password, session, tokens, totp},
    config::Config,
    db::{
        self,
        handlers::{RefreshTokens, Repository, UserTokens, Users},
        models::{
            refresh_tokens::RefreshTokenCreateDBRequest,
            user_tokens::TokenPurpose,
            users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
        },
    },
    email::EmailService,
    errors::Error,
    types::abbrev_uuid,
};

const INVALID_CREDENTIALS: &str = "E-Mail-Adresse oder Passwort ist falsch.";
const INVALID_REFRESH_TOKEN: &str = "Deine Sitzung ist ungültig oder abgelaufen. Bitte melde dich erneut an.";
const INVALID_VERIFICATION_LINK: &str = "Der Bestätigungslink ist ungültig oder abgelaufen.";
const INVALID_RESET_LINK: &str = "Der Link zum Zurücksetzen ist ungültig oder abgelaufen.";

/// Check a new password against the configured length limits
pub(crate) fn validate_password(password: &str, field: &str, config: &Config) -> Result<(), Error> {
    let limits = &config.auth.password;
    let length = password.chars().count();
    if length < limits.min_length {
        return Err(Error::validation(
            field,
            format!("Das Passwort muss mindestens {} Zeichen lang sein.", limits.min_length),
        ));
    }
    if length > limits.max_length {
        return Err(Error::validation(
            field,
            format!("Das Passwort darf höchstens {} Zeichen lang sein.", limits.max_length),
        ));
    }
    Ok(())
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(|ua| ua.chars().take(255).collect())
}

/// Create a refresh token row and a fresh access token for `user`
pub(crate) async fn issue_session(
    conn: &mut SqliteConnection,
    user: &CurrentUser,
    user_agent: Option<String>,
    config: &Config,
) -> Result<AuthTokens, Error> {
    let access_token = session::create_access_token(user, config)?;
    let refresh_token = tokens::generate_token();

    RefreshTokens::new(conn)
        .create(&RefreshTokenCreateDBRequest {
            user_id: user.id,
            token_hash: tokens::hash_token(&refresh_token),
            user_agent,
            expires_at: chrono::Utc::now() + config.auth.refresh_token_expiry,
        })
        .await?;

    Ok(AuthTokens {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: config.auth.access_token_expiry.as_secs() as i64,
    })
}

fn same_site(config: &Config) -> &'static str {
    match config.auth.refresh_cookie.same_site.to_lowercase().as_str() {
        "lax" => "Lax",
        "none" => "None",
        _ => "Strict",
    }
}

pub(crate) fn refresh_cookie(token: &str, config: &Config) -> String {
    let cookie = &config.auth.refresh_cookie;
    format!(
        "{}={}; Path={}; HttpOnly; SameSite={}; Max-Age={}{}",
        cookie.name,
        token,
        cookie.path,
        same_site(config),
        config.auth.refresh_token_expiry.as_secs(),
        if cookie.secure { "; Secure" } else { "" }
    )
}

pub(crate) fn clear_refresh_cookie(config: &Config) -> String {
    let cookie = &config.auth.refresh_cookie;
    format!(
        "{}=; Path={}; HttpOnly; SameSite={}; Max-Age=0{}",
        cookie.name,
        cookie.path,
        same_site(config),
        if cookie.secure { "; Secure" } else { "" }
    )
}

/// Refresh token from the JSON body, falling back to the refresh cookie
fn presented_refresh_token(headers: &HeaderMap, body: Option<RefreshRequest>, config: &Config) -> Option<String> {
    if let Some(token) = body.and_then(|b| b.refresh_token).filter(|t| !t.trim().is_empty()) {
        return Some(token.trim().to_string());
    }

    let cookie_name = &config.auth.refresh_cookie.name;
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name.as_str() && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub(crate) fn current_user(user: &UserDBResponse) -> CurrentUser {
    CurrentUser {
        id: user.id,
        email: user.email.clone(),
    }
}

/// Register a new user account
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created, verification email sent", body = RegisterResponse),
        (status = 403, description = "Registration is disabled"),
        (status = 409, description = "Email already registered"),
        (status = 422, description = "Invalid input"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let config = &state.config;
    if !config.auth.allow_registration {
        return Err(Error::Forbidden {
            message: "Die Registrierung ist derzeit deaktiviert.".to_string(),
        });
    }

    let name = validate_name(&request.name)?;
    let email = validate_email(&request.email)?;
    validate_password(&request.password, "password", config)?;
    let email_service = EmailService::new(config)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if Users::new(&mut conn).get_user_by_email(&email).await?.is_some() {
        return Err(Error::Conflict {
            message: "Diese E-Mail-Adresse ist bereits registriert.".to_string(),
        });
    }
    drop(conn);

    let password_hash = password::hash_password(request.password, config.auth.password.argon2_params()).await?;
    let require_verification = config.auth.require_email_verification;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut tx)
        .create(&UserCreateDBRequest {
            email,
            name,
            password_hash,
            email_verified: !require_verification,
        })
        .await?;

    let verification_token = if require_verification {
        let (raw, _) = UserTokens::new(&mut tx)
            .create_for_user(user.id, TokenPurpose::EmailVerification, config.auth.email_verification_expiry, None)
            .await?;
        Some(raw)
    } else {
        None
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(user_id = %abbrev_uuid(&user.id), "User registered");

    let message = if let Some(token) = verification_token {
        if let Err(e) = email_service
            .send_verification_email(&user.email, &user.name, &token, config.auth.email_verification_expiry)
            .await
        {
            warn!("Failed to send verification email: {}", e);
        }
        "Registrierung erfolgreich. Bitte bestätige deine E-Mail-Adresse über den Link in der E-Mail, die wir dir gesendet haben."
    } else {
        "Registrierung erfolgreich. Du kannst dich jetzt anmelden."
    };

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            message: message.to_string(),
            user: UserResponse::from(user),
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful; refresh token also set as cookie", body = AuthResponse),
        (status = 401, description = "Invalid credentials, or a two-factor code is required"),
        (status = 403, description = "Email address not verified yet"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, headers: HeaderMap, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let config = &state.config;
    let invalid_credentials = || Error::Unauthenticated {
        message: Some(INVALID_CREDENTIALS.to_string()),
    };

    let email = request.email.trim().to_lowercase();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_user_by_email(&email).await?.ok_or_else(invalid_credentials)?;
    drop(conn);

    if !password::verify_password(request.password, user.password_hash.clone()).await? {
        return Err(invalid_credentials());
    }

    if config.auth.require_email_verification && !user.email_verified {
        return Err(Error::Forbidden {
            message: "Bitte bestätige zuerst deine E-Mail-Adresse.".to_string(),
        });
    }

    if user.two_factor_enabled {
        let code = request.totp_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let Some(code) = code else {
            return Err(Error::TwoFactorRequired);
        };
        let secret = user.two_factor_secret.as_deref().ok_or_else(|| Error::Internal {
            operation: "load two-factor secret: enabled without a secret".to_string(),
        })?;
        if !totp::verify_code_now(secret, code)? {
            return Err(Error::Unauthenticated {
                message: Some("Der Bestätigungscode ist ungültig.".to_string()),
            });
        }
    }

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut tx)
        .update(
            user.id,
            &UserUpdateDBRequest {
                last_login: Some(chrono::Utc::now()),
                ..Default::default()
            },
        )
        .await?;
    let tokens = issue_session(&mut tx, &current_user(&user), user_agent(&headers), config).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let cookie = refresh_cookie(&tokens.refresh_token, config);
    Ok(LoginResponse {
        auth_response: AuthResponse {
            success: true,
            user: UserResponse::from(user),
            tokens,
        },
        cookie,
    })
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    tag = "auth",
    responses(
        (status = 200, description = "New token pair", body = AuthTokens),
        (status = 401, description = "Refresh token missing, invalid, expired or already used"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<TokensResponse, Error> {
    let config = &state.config;
    let rejected = || Error::Unauthenticated {
        message: Some(INVALID_REFRESH_TOKEN.to_string()),
    };

    let raw_token = presented_refresh_token(&headers, body.map(|Json(b)| b), config).ok_or_else(rejected)?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let mut refresh_tokens = RefreshTokens::new(&mut tx);
    let stored = refresh_tokens
        .find_by_hash(&tokens::hash_token(&raw_token))
        .await?
        .ok_or_else(rejected)?;

    if stored.is_revoked() {
        let revoked = refresh_tokens.revoke_all_for_user(stored.user_id).await?;
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        warn!(
            user_id = %abbrev_uuid(&stored.user_id),
            revoked,
            "Revoked refresh token presented again, all sessions revoked"
        );
        return Err(rejected());
    }
    if stored.is_expired(chrono::Utc::now()) {
        return Err(rejected());
    }

    let user = Users::new(&mut tx).get_by_id(stored.user_id).await?.ok_or_else(rejected)?;
    let user = current_user(&user);

    let tokens = if config.auth.rotate_refresh_tokens {
        if !RefreshTokens::new(&mut tx).revoke(stored.id).await? {
            // Lost a race with another refresh of the same token
            RefreshTokens::new(&mut tx).revoke_all_for_user(user.id).await?;
            tx.commit().await.map_err(|e| Error::Database(e.into()))?;
            return Err(rejected());
        }
        issue_session(&mut tx, &user, user_agent(&headers), config).await?
    } else {
        AuthTokens {
            access_token: session::create_access_token(&user, config)?,
            refresh_token: raw_token,
            token_type: "Bearer".to_string(),
            expires_in: config.auth.access_token_expiry.as_secs() as i64,
        }
    };
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    let cookie = refresh_cookie(&tokens.refresh_token, config);
    Ok(TokensResponse { tokens, cookie })
}

/// Logout (revoke the presented refresh token)
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body(content = RefreshRequest, description = "Optional when the refresh cookie is sent"),
    tag = "auth",
    responses(
        (status = 200, description = "Logged out; refresh cookie cleared", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<LogoutResponse, Error> {
    if let Some(raw_token) = presented_refresh_token(&headers, body.map(|Json(b)| b), &state.config) {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut refresh_tokens = RefreshTokens::new(&mut conn);
        if let Some(stored) = refresh_tokens.find_by_hash(&tokens::hash_token(&raw_token)).await? {
            refresh_tokens.revoke(stored.id).await?;
        }
    }

    Ok(LogoutResponse {
        message: MessageResponse::new("Du wurdest erfolgreich abgemeldet."),
        cookie: clear_refresh_cookie(&state.config),
    })
}

/// Revoke every session of the current user
#[utoipa::path(
    post,
    path = "/api/auth/logout-all",
    tag = "auth",
    responses(
        (status = 200, description = "All sessions revoked", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn logout_all(State(state): State<AppState>, current_user: CurrentUser) -> Result<LogoutResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let revoked = RefreshTokens::new(&mut conn).revoke_all_for_user(current_user.id).await?;
    info!(revoked, "Revoked all sessions");

    Ok(LogoutResponse {
        message: MessageResponse::new("Du wurdest auf allen Geräten abgemeldet."),
        cookie: clear_refresh_cookie(&state.config),
    })
}

/// Get the authenticated user
#[utoipa::path(
    get,
    path = "/api/auth/me",
    tag = "auth",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn me(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .get_by_id(current_user.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Benutzer".to_string(),
            id: current_user.id.to_string(),
        })?;
    Ok(Json(UserResponse::from(user)))
}

async fn apply_email_verification(state: &AppState, raw_token: &str) -> Result<MessageResponse, Error> {
    let invalid = || Error::BadRequest {
        message: INVALID_VERIFICATION_LINK.to_string(),
    };

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let mut user_tokens = UserTokens::new(&mut tx);
    let token = user_tokens
        .find_valid(raw_token, TokenPurpose::EmailVerification)
        .await?
        .ok_or_else(invalid)?;
    if !user_tokens.mark_used(token.id).await? {
        return Err(invalid());
    }

    Users::new(&mut tx)
        .update(
            token.user_id,
            &UserUpdateDBRequest {
                email_verified: Some(true),
                ..Default::default()
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(user_id = %abbrev_uuid(&token.user_id), "Email verified");

    Ok(MessageResponse::new(
        "Deine E-Mail-Adresse wurde bestätigt. Du kannst dich jetzt anmelden.",
    ))
}

/// Verify an email address with the token from the verification mail
#[utoipa::path(
    post,
    path = "/api/auth/verify-email",
    request_body = TokenRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Token invalid, used or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(State(state): State<AppState>, Json(request): Json<TokenRequest>) -> Result<Json<MessageResponse>, Error> {
    Ok(Json(apply_email_verification(&state, &request.token).await?))
}

/// Verify an email address straight from the link
#[utoipa::path(
    get,
    path = "/api/auth/verify-email",
    params(TokenRequest),
    tag = "auth",
    responses(
        (status = 200, description = "Email verified", body = MessageResponse),
        (status = 400, description = "Token invalid, used or expired"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email_link(State(state): State<AppState>, Query(request): Query<TokenRequest>) -> Result<Json<MessageResponse>, Error> {
    Ok(Json(apply_email_verification(&state, &request.token).await?))
}

/// Send a new verification mail
#[utoipa::path(
    post,
    path = "/api/auth/resend-verification",
    request_body = EmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Mail sent if an unverified account exists", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend_verification(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    let config = &state.config;
    let response = MessageResponse::new(
        "Falls ein unbestätigtes Konto mit dieser E-Mail-Adresse existiert, haben wir dir eine neue Bestätigungs-E-Mail gesendet.",
    );
    let email_service = EmailService::new(config)?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let Some(user) = Users::new(&mut tx).get_user_by_email(&request.email).await? else {
        return Ok(Json(response));
    };
    if user.email_verified {
        return Ok(Json(response));
    }

    let (token, _) = UserTokens::new(&mut tx)
        .create_for_user(user.id, TokenPurpose::EmailVerification, config.auth.email_verification_expiry, None)
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Err(e) = email_service
        .send_verification_email(&user.email, &user.name, &token, config.auth.email_verification_expiry)
        .await
    {
        warn!("Failed to send verification email: {}", e);
    }

    Ok(Json(response))
}

/// Request a password reset mail
#[utoipa::path(
    post,
    path = "/api/auth/forgot-password",
    request_body = EmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Mail sent if the account exists", body = MessageResponse),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn forgot_password(State(state): State<AppState>, Json(request): Json<EmailRequest>) -> Result<Json<MessageResponse>, Error> {
    let config = &state.config;
    let response = MessageResponse::new(
        "Falls ein Konto mit dieser E-Mail-Adresse existiert, haben wir dir einen Link zum Zurücksetzen des Passworts gesendet.",
    );
    let email_service = EmailService::new(config)?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let Some(user) = Users::new(&mut tx).get_user_by_email(&request.email).await? else {
        return Ok(Json(response));
    };

    let (token, _) = UserTokens::new(&mut tx)
        .create_for_user(user.id, TokenPurpose::PasswordReset, config.auth.password_reset_expiry, None)
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Err(e) = email_service
        .send_password_reset_email(&user.email, &user.name, &token, config.auth.password_reset_expiry)
        .await
    {
        warn!("Failed to send password reset email: {}", e);
    }

    Ok(Json(response))
}

/// Set a new password with the token from the reset mail
#[utoipa::path(
    post,
    path = "/api/auth/reset-password",
    request_body = ResetPasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password changed, all sessions revoked", body = MessageResponse),
        (status = 400, description = "Token invalid, used or expired"),
        (status = 422, description = "Password does not meet the requirements"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let config = &state.config;
    let invalid = || Error::BadRequest {
        message: INVALID_RESET_LINK.to_string(),
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let token = UserTokens::new(&mut conn)
        .find_valid(&request.token, TokenPurpose::PasswordReset)
        .await?
        .ok_or_else(invalid)?;
    drop(conn);

    validate_password(&request.password, "password", config)?;
    let password_hash = password::hash_password(request.password, config.auth.password.argon2_params()).await?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let mut user_tokens = UserTokens::new(&mut tx);
    if !user_tokens.mark_used(token.id).await? {
        return Err(invalid());
    }
    user_tokens.invalidate_for_user(token.user_id, TokenPurpose::PasswordReset).await?;

    Users::new(&mut tx)
        .update(
            token.user_id,
            &UserUpdateDBRequest {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;
    RefreshTokens::new(&mut tx).revoke_all_for_user(token.user_id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(user_id = %abbrev_uuid(&token.user_id), "Password reset");

    Ok(Json(MessageResponse::new(
        "Dein Passwort wurde geändert. Bitte melde dich mit dem neuen Passwort an.",
    )))
}
