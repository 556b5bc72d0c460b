//! Database repository for users.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{UserCreateDBRequest, UserDBResponse, UserUpdateDBRequest},
    },
    types::{UserId, abbrev_uuid},
};

const USER_COLUMNS: &str = "id, email, name, password_hash, email_verified, currency, language, theme, \
     two_factor_secret, two_factor_enabled, last_login, created_at, updated_at";

pub struct Users<'c> {
    db: &'c mut SqliteConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash, email_verified, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&request.email)
        .bind(&request.name)
        .bind(&request.password_hash)
        .bind(request.email_verified)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE users SET updated_at = ");
        query.push_bind(Utc::now());

        if let Some(name) = &request.name {
            query.push(", name = ").push_bind(name.clone());
        }
        if let Some(email) = &request.email {
            query.push(", email = ").push_bind(email.clone());
        }
        if let Some(password_hash) = &request.password_hash {
            query.push(", password_hash = ").push_bind(password_hash.clone());
        }
        if let Some(email_verified) = request.email_verified {
            query.push(", email_verified = ").push_bind(email_verified);
        }
        if let Some(currency) = &request.currency {
            query.push(", currency = ").push_bind(currency.clone());
        }
        if let Some(language) = request.language {
            query.push(", language = ").push_bind(language);
        }
        if let Some(theme) = request.theme {
            query.push(", theme = ").push_bind(theme);
        }
        if let Some(secret) = &request.two_factor_secret {
            query.push(", two_factor_secret = ").push_bind(secret.clone());
        }
        if let Some(enabled) = request.two_factor_enabled {
            query.push(", two_factor_enabled = ").push_bind(enabled);
        }
        if let Some(last_login) = request.last_login {
            query.push(", last_login = ").push_bind(last_login);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" RETURNING ").push(USER_COLUMNS);

        query
            .build_query_as::<UserDBResponse>()
            .fetch_optional(&mut *self.db)
            .await?
            .ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut SqliteConnection) -> Self {
        Self { db }
    }

    /// Look up a user by (case-insensitive) email address
    #[instrument(skip(self, email), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ? COLLATE NOCASE"
        ))
        .bind(email.trim())
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(user)
    }
}
