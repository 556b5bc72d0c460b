//! HTTP handlers for the authenticated user's own account: profile,
//! preferences, credentials, two-factor authentication and deletion.

use axum::{Json, extract::State, http::HeaderMap};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::{
    AppState,
    api::{
        handlers::auth::{
            clear_refresh_cookie, current_user as session_user, issue_session, refresh_cookie, user_agent, validate_password,
        },
        models::{
            auth::{AuthTokens, LogoutResponse, MessageResponse, TokensResponse},
            users::{
                ChangeEmailRequest, ChangePasswordRequest, ConfirmEmailChangeRequest, CurrentUser, DeleteAccountRequest,
                DisableTwoFactorRequest, Preferences, TwoFactorCodeRequest, TwoFactorSetupResponse, UpdatePreferencesRequest,
                UpdateProfileRequest, UserResponse, validate_email, validate_name,
            },
        },
    },
    auth::{password, totp},
    db::{
        self,
        handlers::{RefreshTokens, Repository, UserTokens, Users},
        models::{
            user_tokens::TokenPurpose,
            users::{UserDBResponse, UserUpdateDBRequest},
        },
    },
    email::EmailService,
    errors::Error,
    types::abbrev_uuid,
};

const INVALID_EMAIL_CHANGE_LINK: &str = "Der Bestätigungslink ist ungültig oder abgelaufen.";
const EMAIL_TAKEN: &str = "Diese E-Mail-Adresse ist bereits registriert.";

async fn load_user(conn: &mut SqliteConnection, current_user: &CurrentUser) -> Result<UserDBResponse, Error> {
    Users::new(conn).get_by_id(current_user.id).await?.ok_or_else(|| Error::NotFound {
        resource: "Benutzer".to_string(),
        id: current_user.id.to_string(),
    })
}

/// Verify a password re-entered to confirm a sensitive change
async fn confirm_password(user: &UserDBResponse, password: String, field: &str) -> Result<(), Error> {
    if password::verify_password(password, user.password_hash.clone()).await? {
        Ok(())
    } else {
        Err(Error::validation(field, "Das Passwort ist falsch."))
    }
}

fn confirm_totp(user: &UserDBResponse, code: &str) -> Result<(), Error> {
    let secret = user.two_factor_secret.as_deref().ok_or_else(|| Error::BadRequest {
        message: "Bitte richte die Zwei-Faktor-Authentifizierung zuerst ein.".to_string(),
    })?;
    if totp::verify_code_now(secret, code)? {
        Ok(())
    } else {
        Err(Error::validation("code", "Der Bestätigungscode ist ungültig."))
    }
}

/// Get the current user's profile
#[utoipa::path(
    get,
    path = "/api/users/profile",
    tag = "users",
    responses(
        (status = 200, description = "Profile", body = UserResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn get_profile(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    Ok(Json(UserResponse::from(user)))
}

/// Update the display name
#[utoipa::path(
    put,
    path = "/api/users/profile",
    tag = "users",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid name"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn update_profile(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, Error> {
    let name = validate_name(&request.name)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn)
        .update(
            current_user.id,
            &UserUpdateDBRequest {
                name: Some(name),
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(UserResponse::from(user)))
}

/// Change the password; all existing sessions are revoked and a new one is issued
#[utoipa::path(
    put,
    path = "/api/users/password",
    tag = "users",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed, new token pair", body = AuthTokens),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Current password wrong or new password invalid"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn change_password(
    State(state): State<AppState>,
    current_user: CurrentUser,
    headers: HeaderMap,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<TokensResponse, Error> {
    let config = &state.config;
    validate_password(&request.new_password, "new_password", config)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    drop(conn);

    confirm_password(&user, request.current_password, "current_password").await?;
    let password_hash = password::hash_password(request.new_password, config.auth.password.argon2_params()).await?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut tx)
        .update(
            user.id,
            &UserUpdateDBRequest {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        )
        .await?;
    let revoked = RefreshTokens::new(&mut tx).revoke_all_for_user(user.id).await?;
    UserTokens::new(&mut tx)
        .invalidate_for_user(user.id, TokenPurpose::PasswordReset)
        .await?;
    // Claims come from the stored row; the presented token may carry an old email
    let tokens = issue_session(&mut tx, &session_user(&user), user_agent(&headers), config).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(revoked, "Password changed");

    let cookie = refresh_cookie(&tokens.refresh_token, config);
    Ok(TokensResponse { tokens, cookie })
}

/// Request an email change; a confirmation link is sent to the new address
#[utoipa::path(
    post,
    path = "/api/users/email",
    tag = "users",
    request_body = ChangeEmailRequest,
    responses(
        (status = 200, description = "Confirmation mail sent", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Address already registered"),
        (status = 422, description = "Invalid address or wrong password"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn request_email_change(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ChangeEmailRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let config = &state.config;
    let new_email = validate_email(&request.new_email).map_err(|e| match e {
        Error::Validation { message, .. } => Error::validation("new_email", message),
        other => other,
    })?;
    let email_service = EmailService::new(config)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    if user.email == new_email {
        return Err(Error::validation("new_email", "Das ist bereits deine aktuelle E-Mail-Adresse."));
    }
    if Users::new(&mut conn).get_user_by_email(&new_email).await?.is_some() {
        return Err(Error::Conflict {
            message: EMAIL_TAKEN.to_string(),
        });
    }
    drop(conn);

    confirm_password(&user, request.password, "password").await?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let (token, _) = UserTokens::new(&mut tx)
        .create_for_user(user.id, TokenPurpose::EmailChange, config.auth.email_change_expiry, Some(&new_email))
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    if let Err(e) = email_service
        .send_email_change_email(&new_email, &user.name, &token, config.auth.email_change_expiry)
        .await
    {
        warn!("Failed to send email change confirmation: {}", e);
    }

    Ok(Json(MessageResponse::new(
        "Wir haben dir einen Bestätigungslink an die neue E-Mail-Adresse gesendet.",
    )))
}

/// Apply a pending email change with the token from the confirmation mail
#[utoipa::path(
    post,
    path = "/api/users/email/confirm",
    tag = "users",
    request_body = ConfirmEmailChangeRequest,
    responses(
        (status = 200, description = "Email address changed", body = MessageResponse),
        (status = 400, description = "Token invalid, used or expired"),
        (status = 409, description = "Address registered in the meantime"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn confirm_email_change(
    State(state): State<AppState>,
    Json(request): Json<ConfirmEmailChangeRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let invalid = || Error::BadRequest {
        message: INVALID_EMAIL_CHANGE_LINK.to_string(),
    };

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let mut user_tokens = UserTokens::new(&mut tx);
    let token = user_tokens
        .find_valid(&request.token, TokenPurpose::EmailChange)
        .await?
        .ok_or_else(invalid)?;
    let new_email = token.new_email.clone().ok_or_else(invalid)?;

    if Users::new(&mut tx).get_user_by_email(&new_email).await?.is_some() {
        return Err(Error::Conflict {
            message: EMAIL_TAKEN.to_string(),
        });
    }
    if !UserTokens::new(&mut tx).mark_used(token.id).await? {
        return Err(invalid());
    }

    Users::new(&mut tx)
        .update(
            token.user_id,
            &UserUpdateDBRequest {
                email: Some(new_email),
                email_verified: Some(true),
                ..Default::default()
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!(user_id = %abbrev_uuid(&token.user_id), "Email address changed");

    Ok(Json(MessageResponse::new("Deine E-Mail-Adresse wurde geändert.")))
}

/// Get display preferences
#[utoipa::path(
    get,
    path = "/api/users/preferences",
    tag = "users",
    responses(
        (status = 200, description = "Preferences", body = Preferences),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn get_preferences(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<Preferences>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    Ok(Json(UserResponse::from(user).preferences))
}

/// Update currency, language and theme; omitted fields stay unchanged
#[utoipa::path(
    put,
    path = "/api/users/preferences",
    tag = "users",
    request_body = UpdatePreferencesRequest,
    responses(
        (status = 200, description = "Updated preferences", body = Preferences),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid currency"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn update_preferences(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<Preferences>, Error> {
    let update = UserUpdateDBRequest {
        currency: request.normalized_currency()?,
        language: request.language,
        theme: request.theme,
        ..Default::default()
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = if update.is_empty() {
        load_user(&mut conn, &current_user).await?
    } else {
        Users::new(&mut conn).update(current_user.id, &update).await?
    };
    Ok(Json(UserResponse::from(user).preferences))
}

/// Start two-factor setup: generate and store a secret, not yet enabled
#[utoipa::path(
    post,
    path = "/api/users/2fa/setup",
    tag = "users",
    responses(
        (status = 200, description = "Secret and otpauth URI for the authenticator app", body = TwoFactorSetupResponse),
        (status = 400, description = "Two-factor authentication already enabled"),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn setup_two_factor(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> Result<Json<TwoFactorSetupResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    if user.two_factor_enabled {
        return Err(Error::BadRequest {
            message: "Die Zwei-Faktor-Authentifizierung ist bereits aktiviert.".to_string(),
        });
    }

    let secret = totp::generate_secret();
    Users::new(&mut conn)
        .update(
            user.id,
            &UserUpdateDBRequest {
                two_factor_secret: Some(Some(secret.clone())),
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(TwoFactorSetupResponse {
        otpauth_url: totp::provisioning_uri(&state.config.auth.totp_issuer, &user.email, &secret),
        secret,
    }))
}

/// Enable two-factor authentication by confirming a code from the app
#[utoipa::path(
    post,
    path = "/api/users/2fa/enable",
    tag = "users",
    request_body = TwoFactorCodeRequest,
    responses(
        (status = 200, description = "Enabled", body = MessageResponse),
        (status = 400, description = "Setup not started or already enabled"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid code"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn enable_two_factor(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<TwoFactorCodeRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    if user.two_factor_enabled {
        return Err(Error::BadRequest {
            message: "Die Zwei-Faktor-Authentifizierung ist bereits aktiviert.".to_string(),
        });
    }
    confirm_totp(&user, &request.code)?;

    Users::new(&mut conn)
        .update(
            user.id,
            &UserUpdateDBRequest {
                two_factor_enabled: Some(true),
                ..Default::default()
            },
        )
        .await?;
    info!("Two-factor authentication enabled");

    Ok(Json(MessageResponse::new("Die Zwei-Faktor-Authentifizierung wurde aktiviert.")))
}

/// Disable two-factor authentication; requires password and a current code
#[utoipa::path(
    post,
    path = "/api/users/2fa/disable",
    tag = "users",
    request_body = DisableTwoFactorRequest,
    responses(
        (status = 200, description = "Disabled", body = MessageResponse),
        (status = 400, description = "Not enabled"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Wrong password or invalid code"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn disable_two_factor(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<DisableTwoFactorRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    drop(conn);
    if !user.two_factor_enabled {
        return Err(Error::BadRequest {
            message: "Die Zwei-Faktor-Authentifizierung ist nicht aktiviert.".to_string(),
        });
    }
    confirm_password(&user, request.password, "password").await?;
    confirm_totp(&user, &request.code)?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Users::new(&mut conn)
        .update(
            user.id,
            &UserUpdateDBRequest {
                two_factor_enabled: Some(false),
                two_factor_secret: Some(None),
                ..Default::default()
            },
        )
        .await?;
    info!("Two-factor authentication disabled");

    Ok(Json(MessageResponse::new("Die Zwei-Faktor-Authentifizierung wurde deaktiviert.")))
}

/// Permanently delete the account with all transactions and sessions
#[utoipa::path(
    delete,
    path = "/api/users/account",
    tag = "users",
    request_body = DeleteAccountRequest,
    responses(
        (status = 200, description = "Account deleted; refresh cookie cleared", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Wrong password"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn delete_account(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<DeleteAccountRequest>,
) -> Result<LogoutResponse, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = load_user(&mut conn, &current_user).await?;
    drop(conn);
    confirm_password(&user, request.password, "password").await?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Users::new(&mut conn).delete(user.id).await? {
        return Err(Error::NotFound {
            resource: "Benutzer".to_string(),
            id: user.id.to_string(),
        });
    }
    info!("Account deleted");

    Ok(LogoutResponse {
        message: MessageResponse::new("Dein Konto wurde gelöscht."),
        cookie: clear_refresh_cookie(&state.config),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{StatusCode, header::SET_COOKIE};
    use serde_json::json;

    use super::*;
    use crate::{
        api::models::auth::AuthResponse,
        auth::session,
        db::models::transactions::TransactionFilter,
        db::handlers::Transactions,
        errors::ErrorResponse,
        test_utils::{access_token_for, create_test_app, insert_test_user, sent_email_count},
    };

    const PASSWORD: &str = "correct horse battery";

    async fn login(server: &axum_test::TestServer, email: &str, password: &str) -> AuthTokens {
        let response = server
            .post("/api/auth/login")
            .json(&json!({ "email": email, "password": password }))
            .await;
        response.assert_status_ok();
        response.json::<AuthResponse>().tokens
    }

    #[tokio::test]
    async fn test_profile_read_and_update() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        let profile: UserResponse = server.get("/api/users/profile").authorization_bearer(&token).await.json();
        assert_eq!(profile.email, "anna@example.com");
        assert_eq!(profile.name, "anna");

        let response = server
            .put("/api/users/profile")
            .authorization_bearer(&token)
            .json(&json!({ "name": "  Anna Schmidt " }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<UserResponse>().name, "Anna Schmidt");

        let response = server
            .put("/api/users/profile")
            .authorization_bearer(&token)
            .json(&json!({ "name": "" }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<ErrorResponse>().field.as_deref(), Some("name"));

        server.get("/api/users/profile").await.assert_status_unauthorized();
    }

    #[tokio::test]
    async fn test_preferences() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        let defaults: Preferences = server.get("/api/users/preferences").authorization_bearer(&token).await.json();
        assert_eq!(defaults.currency, "EUR");
        assert_eq!(defaults.language, crate::api::models::users::Language::De);
        assert_eq!(defaults.theme, crate::api::models::users::Theme::System);

        let updated: Preferences = server
            .put("/api/users/preferences")
            .authorization_bearer(&token)
            .json(&json!({ "currency": "chf", "theme": "dark" }))
            .await
            .json();
        assert_eq!(updated.currency, "CHF");
        assert_eq!(updated.theme, crate::api::models::users::Theme::Dark);
        assert_eq!(updated.language, crate::api::models::users::Language::De);

        let unchanged: Preferences = server
            .put("/api/users/preferences")
            .authorization_bearer(&token)
            .json(&json!({}))
            .await
            .json();
        assert_eq!(unchanged, updated);

        server
            .put("/api/users/preferences")
            .authorization_bearer(&token)
            .json(&json!({ "currency": "Euro" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        server
            .put("/api/users/preferences")
            .authorization_bearer(&token)
            .json(&json!({ "language": "fr" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_change_password_revokes_sessions() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        let old_session = login(&server, "anna@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        let response = server
            .put("/api/users/password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": "wrong password", "new_password": "a brand new password" }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<ErrorResponse>().field.as_deref(), Some("current_password"));

        server
            .put("/api/users/password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": PASSWORD, "new_password": "short" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        let response = server
            .put("/api/users/password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": PASSWORD, "new_password": "a brand new password" }))
            .await;
        response.assert_status_ok();
        assert!(response.header(SET_COOKIE).to_str().unwrap().starts_with("finora_refresh="));
        let new_session: AuthTokens = response.json();

        let response = server
            .post("/api/auth/refresh")
            .json(&json!({ "refresh_token": new_session.refresh_token }))
            .await;
        response.assert_status_ok();
        let rotated: AuthTokens = response.json();

        // The pre-change session is revoked; presenting it again revokes everything
        server
            .post("/api/auth/refresh")
            .json(&json!({ "refresh_token": old_session.refresh_token }))
            .await
            .assert_status_unauthorized();
        server
            .post("/api/auth/refresh")
            .json(&json!({ "refresh_token": rotated.refresh_token }))
            .await
            .assert_status_unauthorized();

        login(&server, "anna@example.com", "a brand new password").await;
    }

    #[tokio::test]
    async fn test_change_password_issues_token_for_stored_email() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        // Access token minted before an email change
        let stale = CurrentUser {
            id: user.id,
            email: "anna.alt@example.com".to_string(),
        };
        let token = session::create_access_token(&stale, &state.config).unwrap();

        let response = server
            .put("/api/users/password")
            .authorization_bearer(&token)
            .json(&json!({ "current_password": PASSWORD, "new_password": "a brand new password" }))
            .await;
        response.assert_status_ok();
        let tokens: AuthTokens = response.json();

        let claims = session::verify_access_token(&tokens.access_token, &state.config).unwrap();
        assert_eq!(claims.id, user.id);
        assert_eq!(claims.email, "anna@example.com");
    }

    #[tokio::test]
    async fn test_email_change_flow() {
        let (server, state, dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        insert_test_user(&state.db, "ben@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        let response = server
            .post("/api/users/email")
            .authorization_bearer(&token)
            .json(&json!({ "new_email": "anna.neu@example.com", "password": "wrong password" }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<ErrorResponse>().field.as_deref(), Some("password"));

        server
            .post("/api/users/email")
            .authorization_bearer(&token)
            .json(&json!({ "new_email": "BEN@example.com", "password": PASSWORD }))
            .await
            .assert_status(StatusCode::CONFLICT);

        let response = server
            .post("/api/users/email")
            .authorization_bearer(&token)
            .json(&json!({ "new_email": "no-at-sign", "password": PASSWORD }))
            .await;
        assert_eq!(response.json::<ErrorResponse>().field.as_deref(), Some("new_email"));

        server
            .post("/api/users/email")
            .authorization_bearer(&token)
            .json(&json!({ "new_email": "Anna.Neu@example.com", "password": PASSWORD }))
            .await
            .assert_status_ok();
        assert_eq!(sent_email_count(&dir), 1);

        let mut conn = state.db.acquire().await.unwrap();
        let (raw, _) = UserTokens::new(&mut conn)
            .create_for_user(user.id, TokenPurpose::EmailChange, Duration::from_secs(3600), Some("anna.neu@example.com"))
            .await
            .unwrap();
        drop(conn);

        server
            .post("/api/users/email/confirm")
            .json(&json!({ "token": raw }))
            .await
            .assert_status_ok();
        server
            .post("/api/users/email/confirm")
            .json(&json!({ "token": raw }))
            .await
            .assert_status_bad_request();

        let profile: UserResponse = server.get("/api/users/profile").authorization_bearer(&token).await.json();
        assert_eq!(profile.email, "anna.neu@example.com");
        login(&server, "anna.neu@example.com", PASSWORD).await;
    }

    #[tokio::test]
    async fn test_email_change_conflict_on_confirm() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;

        let mut conn = state.db.acquire().await.unwrap();
        let (raw, _) = UserTokens::new(&mut conn)
            .create_for_user(user.id, TokenPurpose::EmailChange, Duration::from_secs(3600), Some("ben@example.com"))
            .await
            .unwrap();
        drop(conn);
        // someone registered the address after the request
        insert_test_user(&state.db, "ben@example.com", PASSWORD).await;

        server
            .post("/api/users/email/confirm")
            .json(&json!({ "token": raw }))
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_two_factor_lifecycle() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        server
            .post("/api/users/2fa/enable")
            .authorization_bearer(&token)
            .json(&json!({ "code": "123456" }))
            .await
            .assert_status_bad_request();

        let setup: TwoFactorSetupResponse = server.post("/api/users/2fa/setup").authorization_bearer(&token).await.json();
        assert!(setup.otpauth_url.starts_with("otpauth://totp/"));
        assert!(setup.otpauth_url.contains(&setup.secret));

        // setup alone does not enable it
        login(&server, "anna@example.com", PASSWORD).await;

        let response = server
            .post("/api/users/2fa/enable")
            .authorization_bearer(&token)
            .json(&json!({ "code": "abcdef" }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<ErrorResponse>().field.as_deref(), Some("code"));

        server
            .post("/api/users/2fa/enable")
            .authorization_bearer(&token)
            .json(&json!({ "code": totp::current_code(&setup.secret) }))
            .await
            .assert_status_ok();
        server
            .post("/api/users/2fa/setup")
            .authorization_bearer(&token)
            .await
            .assert_status_bad_request();

        let response = server
            .post("/api/auth/login")
            .json(&json!({ "email": "anna@example.com", "password": PASSWORD }))
            .await;
        assert_eq!(response.json::<ErrorResponse>().two_factor_required, Some(true));

        server
            .post("/api/users/2fa/disable")
            .authorization_bearer(&token)
            .json(&json!({ "password": "wrong password", "code": totp::current_code(&setup.secret) }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        server
            .post("/api/users/2fa/disable")
            .authorization_bearer(&token)
            .json(&json!({ "password": PASSWORD, "code": totp::current_code(&setup.secret) }))
            .await
            .assert_status_ok();

        let profile: UserResponse = server.get("/api/users/profile").authorization_bearer(&token).await.json();
        assert!(!profile.two_factor_enabled);
        login(&server, "anna@example.com", PASSWORD).await;
    }

    #[tokio::test]
    async fn test_delete_account_cascades() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", PASSWORD).await;
        let session = login(&server, "anna@example.com", PASSWORD).await;
        let token = access_token_for(&user);

        server
            .post("/api/transactions")
            .authorization_bearer(&token)
            .json(&json!({"amount": "10", "type": "expense", "category": "Kino", "description": "Film", "date": "2024-01-01"}))
            .await
            .assert_status(StatusCode::CREATED);

        server
            .delete("/api/users/account")
            .authorization_bearer(&token)
            .json(&json!({ "password": "wrong password" }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        let response = server
            .delete("/api/users/account")
            .authorization_bearer(&token)
            .json(&json!({ "password": PASSWORD }))
            .await;
        response.assert_status_ok();
        assert!(response.header(SET_COOKIE).to_str().unwrap().contains("Max-Age=0"));

        let mut conn = state.db.acquire().await.unwrap();
        assert!(Users::new(&mut conn).get_by_id(user.id).await.unwrap().is_none());
        assert_eq!(
            Transactions::new(&mut conn, user.id)
                .count(&TransactionFilter::default())
                .await
                .unwrap(),
            0
        );
        assert_eq!(RefreshTokens::new(&mut conn).count_active_for_user(user.id).await.unwrap(), 0);
        drop(conn);

        server
            .post("/api/auth/refresh")
            .json(&json!({ "refresh_token": session.refresh_token }))
            .await
            .assert_status_unauthorized();
        server.get("/api/users/profile").authorization_bearer(&token).await.assert_status_not_found();
    }
}
