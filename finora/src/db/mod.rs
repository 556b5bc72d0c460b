//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with SQLite.
//! It follows the Repository pattern to provide clean abstractions over database operations.
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   SQLite    │
//! └─────────────┘
//! ```
//!
//! Repositories borrow a `&mut SqliteConnection`, so the same code runs on a
//! pooled connection or inside a transaction:
//!
//! ```ignore
//! let mut tx = begin_write(&pool).await?;
//! let user = Users::new(&mut tx).get_by_id(user_id).await?;
//! RefreshTokens::new(&mut tx).revoke_all_for_user(user_id).await?;
//! tx.commit().await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;

use std::str::FromStr;

use sqlx::{Sqlite, SqlitePool, Transaction};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::config::DatabaseConfig;

/// Open the connection pool, creating the database file if needed.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
}

/// Start a transaction that takes the write lock up front (`BEGIN IMMEDIATE`).
///
/// Every multi-statement write goes through here. A deferred transaction that
/// reads before writing fails with `SQLITE_BUSY_SNAPSHOT` once another
/// connection commits in between; an immediate one waits on `busy_timeout`
/// instead and then sees the committed state.
pub async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
    pool.begin_with("BEGIN IMMEDIATE").await
}
