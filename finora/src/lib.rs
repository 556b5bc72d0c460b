//! # finora: backend of the Finora expense tracker
//!
//! `finora` is a single-service JSON API for tracking personal income and
//! expenses. It covers the whole account lifecycle (registration with email
//! verification, login with optional TOTP two-factor authentication,
//! access/refresh token sessions, password reset, email change, account
//! deletion) and the user's transactions with filtering, statistics, a
//! dashboard summary and CSV/JSON export.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); persistence is
//! SQLite through SQLx with embedded migrations. A request flows linearly:
//!
//! ```text
//! router → CurrentUser extractor (bearer JWT) → handler → repository → SQLite
//! ```
//!
//! Handlers live in [`api::handlers`], request/response types in
//! [`api::models`], and all SQL in the repositories under [`db::handlers`],
//! which borrow a connection so the same code runs inside a transaction.
//!
//! ## Sessions
//!
//! Login issues a short-lived HS256 access token and an opaque refresh token.
//! Only the SHA-256 hash of a refresh token is stored. Refreshing revokes the
//! presented token and issues a new pair; presenting a revoked token again
//! revokes every session of that user. See [`auth`].
//!
//! ## Background work
//!
//! One task purges expired refresh and one-time tokens on an interval and
//! stops through a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! on shutdown.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
mod email;
pub mod errors;
mod maintenance;
mod openapi;
pub mod telemetry;
mod types;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Json, Router,
    http::{self, HeaderValue},
    routing::{delete, get, post, put},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use config::CorsOrigin;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{api::handlers, openapi::ApiDoc};

pub use types::{TransactionId, UserId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder().db(pool).config(config).build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
}

/// Get the finora database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the pool and bring the schema up to date
async fn setup_database(config: &Config) -> anyhow::Result<SqlitePool> {
    info!("Opening database at {}", config.database.url);
    let pool = db::connect(&config.database).await?;
    migrator().run(&pool).await?;
    Ok(pool)
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.auth.cors;
    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the origin without a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_credentials(cors_config.allow_credentials)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::CONTENT_DISPOSITION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// Routes are grouped by resource under `/api`; the OpenAPI UI is served at
/// `/api/docs` and Prometheus metrics at `/internal/metrics` when enabled.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/logout", post(handlers::auth::logout))
        .route("/logout-all", post(handlers::auth::logout_all))
        .route("/refresh", post(handlers::auth::refresh))
        .route("/me", get(handlers::auth::me))
        .route(
            "/verify-email",
            get(handlers::auth::verify_email_link).post(handlers::auth::verify_email),
        )
        .route("/resend-verification", post(handlers::auth::resend_verification))
        .route("/forgot-password", post(handlers::auth::forgot_password))
        .route("/reset-password", post(handlers::auth::reset_password));

    // Static segments (stats, summary, ...) take precedence over `{id}`
    let transaction_routes = Router::new()
        .route("/stats", get(handlers::transactions::transaction_stats))
        .route("/summary", get(handlers::transactions::transaction_summary))
        .route("/categories", get(handlers::transactions::list_categories))
        .route("/export", get(handlers::transactions::export_transactions))
        .route(
            "/{id}",
            get(handlers::transactions::get_transaction)
                .put(handlers::transactions::update_transaction)
                .patch(handlers::transactions::update_transaction)
                .delete(handlers::transactions::delete_transaction),
        );

    let user_routes = Router::new()
        .route(
            "/profile",
            get(handlers::users::get_profile).put(handlers::users::update_profile),
        )
        .route("/password", put(handlers::users::change_password))
        .route("/email", post(handlers::users::request_email_change))
        .route("/email/confirm", post(handlers::users::confirm_email_change))
        .route(
            "/preferences",
            get(handlers::users::get_preferences).put(handlers::users::update_preferences),
        )
        .route("/2fa/setup", post(handlers::users::setup_two_factor))
        .route("/2fa/enable", post(handlers::users::enable_two_factor))
        .route("/2fa/disable", post(handlers::users::disable_two_factor))
        .route("/account", delete(handlers::users::delete_account));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions)
                .post(handlers::transactions::create_transaction)
                .delete(handlers::transactions::bulk_delete_transactions),
        )
        .nest("/transactions", transaction_routes)
        .nest("/users", user_routes)
        .route("/docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running next to the HTTP server.
///
/// Dropping the struct cancels the shutdown token through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    /// Start the token cleanup task if enabled
    fn start(state: &AppState) -> Self {
        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();
        let mut background_tasks = Vec::new();

        if state.config.token_cleanup.enabled {
            background_tasks.push(tokio::spawn(maintenance::run_token_cleanup(
                state.config.token_cleanup.clone(),
                state.db.clone(),
                shutdown_token.clone(),
            )));
        } else {
            debug!("Token cleanup disabled");
        }

        Self {
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] opens the database, runs migrations and
///    starts background services
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, stops background tasks
///    and closes the pool
pub struct Application {
    router: Router,
    config: Config,
    pool: SqlitePool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting finora with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;
        let state = AppState::builder().db(pool).config(config).build();
        Self::new_with_state(state)
    }

    /// Build the application around an existing state (database already migrated)
    pub fn new_with_state(state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&state)?;
        let bg_services = BackgroundServices::start(&state);

        Ok(Self {
            router,
            config: state.config,
            pool: state.db,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Finora listening on http://{}, API docs at http://localhost:{}/api/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
