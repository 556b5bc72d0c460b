//! Database models for transactions.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;

use crate::api::models::transactions::{SortField, SortOrder, TransactionType};
use crate::types::{TransactionId, UserId};

/// Database request for creating a transaction. The owner comes from the repository scope.
#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub amount_cents: i64,
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub tags: Vec<String>,
}

/// Database request for updating a transaction; `None` leaves a column unchanged
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdateDBRequest {
    pub amount_cents: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    /// `Some(None)` clears the notes
    pub notes: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

/// Database response for a transaction
#[derive(Debug, Clone)]
pub struct TransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row as stored; tags are a JSON array in a TEXT column.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TransactionRow {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount_cents: i64,
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub tags: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionRow> for TransactionDBResponse {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            amount_cents: row.amount_cents,
            transaction_type: row.transaction_type,
            category: row.category,
            description: row.description,
            date: row.date,
            notes: row.notes,
            tags: row.tags.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Filter for listing, counting and aggregating a user's transactions
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    /// Case-insensitive exact match
    pub category: Option<String>,
    /// Inclusive
    pub start_date: Option<NaiveDate>,
    /// Inclusive
    pub end_date: Option<NaiveDate>,
    /// Substring of description, category or notes
    pub search: Option<String>,
    pub min_amount_cents: Option<i64>,
    pub max_amount_cents: Option<i64>,
    pub sort: SortField,
    pub order: SortOrder,
    pub skip: i64,
    pub limit: i64,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            transaction_type: None,
            category: None,
            start_date: None,
            end_date: None,
            search: None,
            min_amount_cents: None,
            max_amount_cents: None,
            sort: SortField::default(),
            order: SortOrder::default(),
            skip: 0,
            limit: i64::MAX,
        }
    }
}

impl TransactionFilter {
    /// Only transactions booked within `[start, end]`
    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Default::default()
        }
    }
}

/// Income/expense sums over a filter
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct TypeTotals {
    pub income_cents: i64,
    pub expense_cents: i64,
    pub income_count: i64,
    pub expense_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryTotals {
    pub category: String,
    pub transaction_type: TransactionType,
    pub total_cents: i64,
    pub count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonthTotals {
    /// `YYYY-MM`
    pub month: String,
    pub income_cents: i64,
    pub expense_cents: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryUsageRow {
    pub category: String,
    pub count: i64,
    pub last_used: NaiveDate,
}
