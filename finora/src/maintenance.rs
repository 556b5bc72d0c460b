//! Periodic purge of expired refresh tokens and one-time tokens.

use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::TokenCleanupConfig;
use crate::db::{
    self,
    handlers::{RefreshTokens, UserTokens},
};
use crate::errors::Error;

/// Delete every token that expired before now. Returns (refresh tokens, one-time tokens) removed.
pub async fn purge_expired_tokens(pool: &SqlitePool) -> Result<(u64, u64), Error> {
    let cutoff = Utc::now();
    let mut tx = db::begin_write(pool).await.map_err(|e| Error::Database(e.into()))?;
    let refresh = RefreshTokens::new(&mut tx).delete_expired(cutoff).await?;
    let one_time = UserTokens::new(&mut tx).delete_expired(cutoff).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok((refresh, one_time))
}

pub async fn run_token_cleanup(config: TokenCleanupConfig, pool: SqlitePool, shutdown: CancellationToken) {
    tracing::info!(interval = ?config.interval, "Starting token cleanup");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Token cleanup shutting down");
                return;
            }
        }

        match purge_expired_tokens(&pool).await {
            Ok((0, 0)) => tracing::debug!("No expired tokens to remove"),
            Ok((refresh_tokens, one_time_tokens)) => {
                tracing::info!(refresh_tokens, one_time_tokens, "Removed expired tokens")
            }
            Err(e) => tracing::warn!(error = %e, "Failed to remove expired tokens"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::auth::tokens::{generate_token, hash_token};
    use crate::db::models::{refresh_tokens::RefreshTokenCreateDBRequest, user_tokens::TokenPurpose};
    use crate::test_utils::{create_test_pool, insert_test_user};

    #[test_log::test(tokio::test)]
    async fn test_purge_removes_only_expired_tokens() {
        let (pool, _dir) = create_test_pool().await;
        let user = insert_test_user(&pool, "anna@example.com", "password123").await;
        let mut conn = pool.acquire().await.unwrap();

        let mut refresh_tokens = RefreshTokens::new(&mut conn);
        for expires_at in [Utc::now() - chrono::Duration::hours(1), Utc::now() + chrono::Duration::days(7)] {
            refresh_tokens
                .create(&RefreshTokenCreateDBRequest {
                    user_id: user.id,
                    token_hash: hash_token(&generate_token()),
                    user_agent: None,
                    expires_at,
                })
                .await
                .unwrap();
        }
        let mut user_tokens = UserTokens::new(&mut conn);
        user_tokens
            .create_for_user(user.id, TokenPurpose::PasswordReset, Duration::ZERO, None)
            .await
            .unwrap();
        user_tokens
            .create_for_user(user.id, TokenPurpose::EmailVerification, Duration::from_secs(3600), None)
            .await
            .unwrap();
        drop(conn);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(purge_expired_tokens(&pool).await.unwrap(), (1, 1));
        assert_eq!(purge_expired_tokens(&pool).await.unwrap(), (0, 0));

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(RefreshTokens::new(&mut conn).count_active_for_user(user.id).await.unwrap(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_cleanup_stops_on_shutdown() {
        let (pool, _dir) = create_test_pool().await;
        let shutdown = CancellationToken::new();
        let config = TokenCleanupConfig {
            enabled: true,
            interval: Duration::from_secs(3600),
        };

        let handle = tokio::spawn(run_token_cleanup(config, pool, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("cleanup task did not stop")
            .unwrap();
    }
}
