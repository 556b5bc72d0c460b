//! Server configuration.
//!
//! Values come from three layers, each overriding the one before:
//!
//! 1. the YAML file given by `-f`/`FINORA_CONFIG` (default `config.yaml`);
//! 2. `FINORA_`-prefixed environment variables, where `__` descends into a
//!    section (`FINORA_AUTH__ACCESS_TOKEN_EXPIRY=30m` sets
//!    `auth.access_token_expiry`);
//! 3. `DATABASE_URL`, which replaces `database.url`.
//!
//! Durations use humantime notation (`15m`, `7d`). Everything except
//! `secret_key` has a default; [`Config::validate`] runs after loading.
//!
//! ```bash
//! FINORA_SECRET_KEY="a-long-random-string-of-at-least-32-bytes"
//! DATABASE_URL="sqlite://finora.db?mode=rwc"
//! FINORA_EMAIL__TYPE=smtp
//! FINORA_EMAIL__HOST=smtp.example.com
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::auth::password::Argon2Params;
use crate::errors::Error;

/// Command line of the `finora` binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FINORA_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Load and check the configuration, then exit
    #[arg(long)]
    pub validate: bool,
}

/// Top-level configuration. Only `secret_key` has no usable default.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL of the web frontend, used for links in emails
    pub frontend_url: Url,
    pub database: DatabaseConfig,
    /// Secret used to sign access tokens. At least 32 bytes.
    pub secret_key: Option<String>,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Export traces via OTLP (configured through the standard `OTEL_*` variables)
    pub enable_otel_export: bool,
    pub auth: AuthConfig,
    pub email: EmailConfig,
    pub transactions: TransactionsConfig,
    pub token_cleanup: TokenCleanupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            frontend_url: Url::parse("http://localhost:5173").expect("static URL is valid"),
            database: DatabaseConfig::default(),
            secret_key: None,
            enable_metrics: true,
            enable_otel_export: false,
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            transactions: TransactionsConfig::default(),
            token_cleanup: TokenCleanupConfig::default(),
        }
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection URL, e.g. `sqlite://finora.db`. The file is created if missing.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long to wait for a free connection
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://finora.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Account and session settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Allow new accounts to be created through `/api/auth/register`
    pub allow_registration: bool,
    /// Refuse login until the email address has been confirmed
    pub require_email_verification: bool,
    /// Lifetime of JWT access tokens
    #[serde(with = "humantime_serde")]
    pub access_token_expiry: Duration,
    /// Lifetime of refresh tokens (login sessions)
    #[serde(with = "humantime_serde")]
    pub refresh_token_expiry: Duration,
    /// Issue a new refresh token on every refresh and revoke the old one
    pub rotate_refresh_tokens: bool,
    #[serde(with = "humantime_serde")]
    pub email_verification_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub password_reset_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub email_change_expiry: Duration,
    pub password: PasswordConfig,
    pub refresh_cookie: RefreshCookieConfig,
    pub cors: CorsConfig,
    /// Issuer shown in authenticator apps
    pub totp_issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_registration: true,
            require_email_verification: true,
            access_token_expiry: Duration::from_secs(15 * 60),
            refresh_token_expiry: Duration::from_secs(7 * 24 * 60 * 60),
            rotate_refresh_tokens: true,
            email_verification_expiry: Duration::from_secs(24 * 60 * 60),
            password_reset_expiry: Duration::from_secs(60 * 60),
            email_change_expiry: Duration::from_secs(60 * 60),
            password: PasswordConfig::default(),
            refresh_cookie: RefreshCookieConfig::default(),
            cors: CorsConfig::default(),
            totp_issuer: "Finora".to_string(),
        }
    }
}

/// Password requirements and hashing cost.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    pub min_length: usize,
    pub max_length: usize,
    /// Argon2 memory cost in KiB
    pub argon2_memory_kib: u32,
    /// Argon2 time cost (iterations)
    pub argon2_iterations: u32,
    /// Argon2 parallelism
    pub argon2_parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        let argon2 = Argon2Params::default();
        Self {
            min_length: 8,
            max_length: 128,
            argon2_memory_kib: argon2.memory_kib,
            argon2_iterations: argon2.iterations,
            argon2_parallelism: argon2.parallelism,
        }
    }
}

impl PasswordConfig {
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

/// Cookie carrying the refresh token for browser clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshCookieConfig {
    pub name: String,
    pub secure: bool,
    /// `strict`, `lax` or `none`
    pub same_site: String,
    pub path: String,
}

impl Default for RefreshCookieConfig {
    fn default() -> Self {
        Self {
            name: "finora_refresh".to_string(),
            secure: true,
            same_site: "strict".to_string(),
            path: "/api/auth".to_string(),
        }
    }
}

/// Which browser origins may call the API.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(Url::parse("http://localhost:5173").expect("static URL is valid"))],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

/// An entry of `auth.cors.allowed_origins`: `*` or an origin URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Email configuration for verification, password reset and email change mails.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// No deny_unknown_fields: it does not combine with the flattened transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::File {
                path: "./emails".to_string(),
            },
            from_email: "noreply@finora.local".to_string(),
            from_name: "Finora".to_string(),
        }
    }
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        /// Use STARTTLS
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

/// Limits for transaction endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransactionsConfig {
    /// Maximum number of rows written by a single export
    pub export_max_rows: i64,
}

impl Default for TransactionsConfig {
    fn default() -> Self {
        Self { export_max_rows: 10_000 }
    }
}

/// Periodic removal of expired refresh and one-time tokens.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenCleanupConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for TokenCleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Config {
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        match &self.secret_key {
            None => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key is not configured. \
                     Please set FINORA_SECRET_KEY environment variable or add secret_key to config file."
                        .to_string(),
                });
            }
            Some(key) if key.len() < 32 => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key must be at least 32 bytes long".to_string(),
                });
            }
            Some(_) => {}
        }

        let password = &self.auth.password;
        if password.min_length < 1 {
            return Err(Error::Internal {
                operation: "Config validation: Invalid password configuration: min_length must be at least 1".to_string(),
            });
        }
        if password.min_length > password.max_length {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                    password.min_length, password.max_length
                ),
            });
        }

        if self.auth.access_token_expiry < Duration::from_secs(60) || self.auth.access_token_expiry > Duration::from_secs(24 * 60 * 60) {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: access_token_expiry ({:?}) must be between 1 minute and 24 hours",
                    self.auth.access_token_expiry
                ),
            });
        }
        if self.auth.refresh_token_expiry <= self.auth.access_token_expiry {
            return Err(Error::Internal {
                operation: "Config validation: refresh_token_expiry must be longer than access_token_expiry".to_string(),
            });
        }
        if self.auth.refresh_token_expiry > Duration::from_secs(365 * 24 * 60 * 60) {
            return Err(Error::Internal {
                operation: "Config validation: refresh_token_expiry must not exceed 365 days".to_string(),
            });
        }

        if !matches!(self.auth.refresh_cookie.same_site.to_lowercase().as_str(), "strict" | "lax" | "none") {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: refresh_cookie.same_site must be one of strict, lax, none (got '{}')",
                    self.auth.refresh_cookie.same_site
                ),
            });
        }

        let cors = &self.auth.cors;
        if cors.allow_credentials && cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
            return Err(Error::Internal {
                operation: "Config validation: CORS wildcard origin cannot be combined with allow_credentials".to_string(),
            });
        }

        if self.transactions.export_max_rows < 1 {
            return Err(Error::Internal {
                operation: "Config validation: transactions.export_max_rows must be at least 1".to_string(),
            });
        }

        if self.token_cleanup.enabled && self.token_cleanup.interval.is_zero() {
            return Err(Error::Internal {
                operation: "Config validation: token_cleanup.interval must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables override specific values; FINORA_CONFIG is the CLI's own
            .merge(Env::prefixed("FINORA_").ignore(&["CONFIG"]).split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
