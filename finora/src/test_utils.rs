//! Shared fixtures for unit and HTTP-level tests.

use axum_test::TestServer;
use sqlx::SqlitePool;
use std::time::Duration;
use tempfile::TempDir;

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::{password, session},
    config::{Config, DatabaseConfig, EmailTransportConfig, PasswordConfig},
    db::{
        self,
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
};

pub const TEST_SECRET_KEY: &str = "test-secret-key-for-testing-only-0123456789";

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("finora-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        secret_key: Some(TEST_SECRET_KEY.to_string()),
        enable_metrics: false,
        ..Default::default()
    };
    config.auth.password = PasswordConfig {
        argon2_memory_kib: 128,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config.token_cleanup.enabled = false;
    config
}

/// A migrated database in a fresh temp directory. Keep the `TempDir` alive for the test's duration.
pub async fn create_test_pool() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("finora.db").display()),
        max_connections: 4,
        acquire_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let pool = db::connect(&config).await.expect("Failed to open test database");
    crate::migrator().run(&pool).await.expect("Failed to run migrations");
    (pool, dir)
}

/// App state over a fresh database; emails land in `<tempdir>/emails`.
pub async fn create_test_state() -> (AppState, TempDir) {
    create_test_state_with(|_| {}).await
}

pub async fn create_test_state_with(configure: impl FnOnce(&mut Config)) -> (AppState, TempDir) {
    let (pool, dir) = create_test_pool().await;
    let mut config = create_test_config();
    config.email.transport = EmailTransportConfig::File {
        path: dir.path().join("emails").to_string_lossy().to_string(),
    };
    configure(&mut config);
    let state = AppState::builder().db(pool).config(config).build();
    (state, dir)
}

pub async fn create_test_app() -> (TestServer, AppState, TempDir) {
    create_test_app_with(|_| {}).await
}

pub async fn create_test_app_with(configure: impl FnOnce(&mut Config)) -> (TestServer, AppState, TempDir) {
    let (state, dir) = create_test_state_with(configure).await;
    let app = crate::Application::new_with_state(state.clone()).expect("Failed to create application");
    (app.into_test_server(), state, dir)
}

/// Insert a verified user whose password hash uses cheap test parameters
pub async fn insert_test_user(pool: &SqlitePool, email: &str, plain_password: &str) -> UserDBResponse {
    let params = create_test_config().auth.password.argon2_params();
    let password_hash = password::hash_string_with_params(plain_password, params).expect("Failed to hash password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or("Test").to_string(),
            password_hash,
            email_verified: true,
        })
        .await
        .expect("Failed to create test user")
}

pub fn access_token_for(user: &UserDBResponse) -> String {
    let current = CurrentUser {
        id: user.id,
        email: user.email.clone(),
    };
    session::create_access_token(&current, &create_test_config()).expect("Failed to create access token")
}

/// Number of mails written by the file transport of a test state
pub fn sent_email_count(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join("emails"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().is_some_and(|ext| ext == "eml"))
                .count()
        })
        .unwrap_or(0)
}
