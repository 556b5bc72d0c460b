//! Database repository for transactions.
//!
//! The repository is scoped to one owner: every query carries `user_id = ?`,
//! so a transaction of another user behaves exactly like a missing one.

use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    api::models::transactions::{SortField, SortOrder, TransactionType},
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::transactions::{
            CategoryTotals, CategoryUsageRow, MonthTotals, TransactionCreateDBRequest, TransactionDBResponse, TransactionFilter,
            TransactionRow, TransactionUpdateDBRequest, TypeTotals,
        },
    },
    types::{TransactionId, UserId, abbrev_uuid},
};

const TRANSACTION_COLUMNS: &str =
    "id, user_id, amount_cents, transaction_type, category, description, date, notes, tags, created_at, updated_at";

/// SQL expressions summing income and expense separately
const TYPE_SUMS: &str = "COALESCE(SUM(CASE WHEN transaction_type = 'income' THEN amount_cents ELSE 0 END), 0) AS income_cents, \
     COALESCE(SUM(CASE WHEN transaction_type = 'expense' THEN amount_cents ELSE 0 END), 0) AS expense_cents";

pub struct Transactions<'c> {
    db: &'c mut SqliteConnection,
    user_id: UserId,
}

#[async_trait::async_trait]
impl<'c> Repository for Transactions<'c> {
    type CreateRequest = TransactionCreateDBRequest;
    type UpdateRequest = TransactionUpdateDBRequest;
    type Response = TransactionDBResponse;
    type Id = TransactionId;

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (id, user_id, amount_cents, transaction_type, category, description, date, notes, tags, search_text, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(self.user_id)
        .bind(request.amount_cents)
        .bind(request.transaction_type)
        .bind(&request.category)
        .bind(&request.description)
        .bind(request.date)
        .bind(&request.notes)
        .bind(Json(&request.tags))
        .bind(search_text(&request.category, &request.description, request.notes.as_deref()))
        .bind(now)
        .bind(now)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&self.user_id), transaction_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ? AND user_id = ?"
        ))
        .bind(id)
        .bind(self.user_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, request), fields(user_id = %abbrev_uuid(&self.user_id), transaction_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        // Rebuilding search_text needs the stored values of untouched text fields
        let new_search_text = if request.category.is_some() || request.description.is_some() || request.notes.is_some() {
            let current = self.get_by_id(id).await?.ok_or(DbError::NotFound)?;
            let category = request.category.as_deref().unwrap_or(&current.category);
            let description = request.description.as_deref().unwrap_or(&current.description);
            let notes = match &request.notes {
                Some(notes) => notes.as_deref(),
                None => current.notes.as_deref(),
            };
            Some(search_text(category, description, notes))
        } else {
            None
        };

        let mut query = QueryBuilder::<Sqlite>::new("UPDATE transactions SET updated_at = ");
        query.push_bind(Utc::now());

        if let Some(amount_cents) = request.amount_cents {
            query.push(", amount_cents = ").push_bind(amount_cents);
        }
        if let Some(transaction_type) = request.transaction_type {
            query.push(", transaction_type = ").push_bind(transaction_type);
        }
        if let Some(category) = &request.category {
            query.push(", category = ").push_bind(category.clone());
        }
        if let Some(description) = &request.description {
            query.push(", description = ").push_bind(description.clone());
        }
        if let Some(date) = request.date {
            query.push(", date = ").push_bind(date);
        }
        if let Some(notes) = &request.notes {
            query.push(", notes = ").push_bind(notes.clone());
        }
        if let Some(tags) = &request.tags {
            query.push(", tags = ").push_bind(Json(tags.clone()));
        }
        if let Some(text) = new_search_text {
            query.push(", search_text = ").push_bind(text);
        }

        query.push(" WHERE id = ").push_bind(id);
        query.push(" AND user_id = ").push_bind(self.user_id);
        query.push(" RETURNING ").push(TRANSACTION_COLUMNS);

        query
            .build_query_as::<TransactionRow>()
            .fetch_optional(&mut *self.db)
            .await?
            .map(Into::into)
            .ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&self.user_id), transaction_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(self.user_id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl<'c> Transactions<'c> {
    /// Repository restricted to the transactions of `user_id`
    pub fn new(db: &'c mut SqliteConnection, user_id: UserId) -> Self {
        Self { db, user_id }
    }

    /// Append the owner and filter conditions to a query ending in a WHERE clause
    fn push_conditions(&self, query: &mut QueryBuilder<'_, Sqlite>, filter: &TransactionFilter) {
        query.push(" user_id = ").push_bind(self.user_id);

        if let Some(transaction_type) = filter.transaction_type {
            query.push(" AND transaction_type = ").push_bind(transaction_type);
        }
        if let Some(category) = &filter.category {
            query.push(" AND category = ").push_bind(category.clone()).push(" COLLATE NOCASE");
        }
        if let Some(start_date) = filter.start_date {
            query.push(" AND date >= ").push_bind(start_date);
        }
        if let Some(end_date) = filter.end_date {
            query.push(" AND date <= ").push_bind(end_date);
        }
        if let Some(search) = &filter.search {
            // LIKE only folds ASCII, so both sides are lowercased in Rust
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            query
                .push(" AND search_text LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        if let Some(min) = filter.min_amount_cents {
            query.push(" AND amount_cents >= ").push_bind(min);
        }
        if let Some(max) = filter.max_amount_cents {
            query.push(" AND amount_cents <= ").push_bind(max);
        }
    }

    /// List transactions matching the filter, sorted and paginated
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&self.user_id), limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &TransactionFilter) -> Result<Vec<TransactionDBResponse>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE"));
        self.push_conditions(&mut query, filter);

        let column = match filter.sort {
            SortField::Date => "date",
            SortField::Amount => "amount_cents",
            SortField::CreatedAt => "created_at",
        };
        let direction = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        // created_at and id break ties so pages are stable
        query.push(format!(" ORDER BY {column} {direction}, created_at {direction}, id {direction}"));
        query.push(" LIMIT ").push_bind(filter.limit);
        query.push(" OFFSET ").push_bind(filter.skip);

        let rows = query.build_query_as::<TransactionRow>().fetch_all(&mut *self.db).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Count transactions matching the filter (ignores pagination)
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    pub async fn count(&mut self, filter: &TransactionFilter) -> Result<i64> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM transactions WHERE");
        self.push_conditions(&mut query, filter);

        let (count,): (i64,) = query.build_query_as().fetch_one(&mut *self.db).await?;
        Ok(count)
    }

    /// Delete several transactions at once; ids of other users are ignored
    #[instrument(skip(self, ids), fields(user_id = %abbrev_uuid(&self.user_id), count = ids.len()), err)]
    pub async fn delete_bulk(&mut self, ids: &[TransactionId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM transactions WHERE user_id = ");
        query.push_bind(self.user_id);
        query.push(" AND id IN (");
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&mut *self.db).await?;
        Ok(result.rows_affected())
    }

    /// Income and expense sums and counts for the filter
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    pub async fn totals(&mut self, filter: &TransactionFilter) -> Result<TypeTotals> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {TYPE_SUMS}, \
             COUNT(CASE WHEN transaction_type = 'income' THEN 1 END) AS income_count, \
             COUNT(CASE WHEN transaction_type = 'expense' THEN 1 END) AS expense_count \
             FROM transactions WHERE"
        ));
        self.push_conditions(&mut query, filter);

        let totals = query.build_query_as::<TypeTotals>().fetch_one(&mut *self.db).await?;
        Ok(totals)
    }

    /// Sums per (category, type), largest first
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    pub async fn category_totals(&mut self, filter: &TransactionFilter) -> Result<Vec<CategoryTotals>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT category, transaction_type, SUM(amount_cents) AS total_cents, COUNT(*) AS count FROM transactions WHERE",
        );
        self.push_conditions(&mut query, filter);
        query.push(" GROUP BY category, transaction_type ORDER BY total_cents DESC, category ASC");

        let rows = query.build_query_as::<CategoryTotals>().fetch_all(&mut *self.db).await?;
        Ok(rows)
    }

    /// Income/expense per calendar month, oldest first
    #[instrument(skip(self, filter), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    pub async fn monthly_totals(&mut self, filter: &TransactionFilter) -> Result<Vec<MonthTotals>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT substr(date, 1, 7) AS month, {TYPE_SUMS} FROM transactions WHERE"));
        self.push_conditions(&mut query, filter);
        query.push(" GROUP BY month ORDER BY month ASC");

        let rows = query.build_query_as::<MonthTotals>().fetch_all(&mut *self.db).await?;
        Ok(rows)
    }

    /// Distinct categories in use, most used first
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&self.user_id)), err)]
    pub async fn categories(&mut self, transaction_type: Option<TransactionType>) -> Result<Vec<CategoryUsageRow>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT category, COUNT(*) AS count, MAX(date) AS last_used FROM transactions WHERE user_id = ",
        );
        query.push_bind(self.user_id);
        if let Some(transaction_type) = transaction_type {
            query.push(" AND transaction_type = ").push_bind(transaction_type);
        }
        query.push(" GROUP BY category ORDER BY count DESC, category ASC");

        let rows = query.build_query_as::<CategoryUsageRow>().fetch_all(&mut *self.db).await?;
        Ok(rows)
    }
}

/// What the `search` filter matches: description, category and notes, lowercased
fn search_text(category: &str, description: &str, notes: Option<&str>) -> String {
    let mut text = format!("{description}\n{category}");
    if let Some(notes) = notes {
        text.push('\n');
        text.push_str(notes);
    }
    text.to_lowercase()
}

/// Escape LIKE wildcards so user input matches literally
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
