//! API request/response models for transactions.
//!
//! Amounts cross the API as decimal strings (e.g. `"12.50"`) and are stored
//! as integer cents.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::transactions::{
    CategoryTotals, CategoryUsageRow, MonthTotals, TransactionCreateDBRequest, TransactionDBResponse, TransactionFilter,
    TransactionUpdateDBRequest, TypeTotals,
};
use crate::errors::{Error, Result};
use crate::types::TransactionId;

/// Largest accepted amount: 1 billion in major units.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;
pub const MAX_CATEGORY_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Income => "income",
            TransactionType::Expense => "expense",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Date,
    Amount,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreate {
    /// Positive amount with at most two decimal places, sent as string to preserve precision
    #[schema(value_type = String, example = "12.50")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    /// Booking date (`YYYY-MM-DD`)
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TransactionCreate {
    pub fn into_db_request(self) -> Result<TransactionCreateDBRequest> {
        Ok(TransactionCreateDBRequest {
            amount_cents: amount_to_cents(self.amount)?,
            transaction_type: self.transaction_type,
            category: validate_text("category", &self.category, MAX_CATEGORY_LEN)?,
            description: validate_text("description", &self.description, MAX_DESCRIPTION_LEN)?,
            date: self.date,
            notes: validate_notes(self.notes.as_deref())?,
            tags: validate_tags(&self.tags)?,
        })
    }
}

/// Partial update; omitted fields are left unchanged. `notes: null` clears the notes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TransactionUpdate {
    #[schema(value_type = Option<String>, example = "12.50")]
    pub amount: Option<Decimal>,
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    #[serde(default, with = "::serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub notes: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl TransactionUpdate {
    pub fn into_db_request(self) -> Result<TransactionUpdateDBRequest> {
        Ok(TransactionUpdateDBRequest {
            amount_cents: self.amount.map(amount_to_cents).transpose()?,
            transaction_type: self.transaction_type,
            category: self
                .category
                .map(|c| validate_text("category", &c, MAX_CATEGORY_LEN))
                .transpose()?,
            description: self
                .description
                .map(|d| validate_text("description", &d, MAX_DESCRIPTION_LEN))
                .transpose()?,
            date: self.date,
            notes: self.notes.map(|n| validate_notes(n.as_deref())).transpose()?,
            tags: self.tags.map(|t| validate_tags(&t)).transpose()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.amount.is_none()
            && self.transaction_type.is_none()
            && self.category.is_none()
            && self.description.is_none()
            && self.date.is_none()
            && self.notes.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkDeleteRequest {
    #[schema(value_type = Vec<String>)]
    pub ids: Vec<TransactionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BulkDeleteResponse {
    pub deleted: u64,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    /// Amount (returned as string to preserve precision)
    #[schema(value_type = String, example = "12.50")]
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub category: String,
    pub description: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TransactionDBResponse> for TransactionResponse {
    fn from(db: TransactionDBResponse) -> Self {
        Self {
            id: db.id,
            amount: cents_to_decimal(db.amount_cents),
            transaction_type: db.transaction_type,
            category: db.category,
            description: db.description,
            date: db.date,
            notes: db.notes,
            tags: db.tags,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Filters shared by list, stats and export.
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct TransactionFilterQuery {
    /// `income` or `expense`
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
    /// Exact category match (case-insensitive)
    pub category: Option<String>,
    /// Inclusive lower bound (`YYYY-MM-DD`)
    pub start_date: Option<NaiveDate>,
    /// Inclusive upper bound (`YYYY-MM-DD`)
    pub end_date: Option<NaiveDate>,
    /// Substring search over description, category and notes
    pub search: Option<String>,
    #[param(value_type = Option<String>)]
    #[schema(value_type = Option<String>)]
    pub min_amount: Option<Decimal>,
    #[param(value_type = Option<String>)]
    #[schema(value_type = Option<String>)]
    pub max_amount: Option<Decimal>,
}

impl TransactionFilterQuery {
    /// Validate the query and convert it to a repository filter.
    pub fn to_filter(&self) -> Result<TransactionFilter> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(Error::validation("start_date", "Das Startdatum darf nicht nach dem Enddatum liegen."));
        }

        let min_amount_cents = self.min_amount.map(|a| filter_amount_to_cents("min_amount", a)).transpose()?;
        let max_amount_cents = self.max_amount.map(|a| filter_amount_to_cents("max_amount", a)).transpose()?;
        if let (Some(min), Some(max)) = (min_amount_cents, max_amount_cents)
            && min > max
        {
            return Err(Error::validation(
                "min_amount",
                "Der Mindestbetrag darf nicht größer als der Höchstbetrag sein.",
            ));
        }

        Ok(TransactionFilter {
            transaction_type: self.transaction_type,
            category: non_empty(self.category.as_deref()),
            start_date: self.start_date,
            end_date: self.end_date,
            search: non_empty(self.search.as_deref()),
            min_amount_cents,
            max_amount_cents,
            ..Default::default()
        })
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub filter: TransactionFilterQuery,

    /// Sort field (default: `date`)
    pub sort: Option<SortField>,
    /// Sort direction (default: `desc`)
    pub order: Option<SortOrder>,

    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ExportTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub filter: TransactionFilterQuery,

    /// `csv` (default) or `json`
    pub format: Option<ExportFormat>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct SummaryQuery {
    /// Reference day whose month is the "current" month (default: today)
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryBreakdown {
    pub category: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub count: i64,
    /// Share of this category within all transactions of the same type, in percent
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonthlyTotals {
    /// `YYYY-MM`
    pub month: String,
    #[schema(value_type = String)]
    pub income: Decimal,
    #[schema(value_type = String)]
    pub expense: Decimal,
    #[schema(value_type = String)]
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionStats {
    #[schema(value_type = String)]
    pub total_income: Decimal,
    #[schema(value_type = String)]
    pub total_expense: Decimal,
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub transaction_count: i64,
    pub income_count: i64,
    pub expense_count: i64,
    pub by_category: Vec<CategoryBreakdown>,
    pub by_month: Vec<MonthlyTotals>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PeriodSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[schema(value_type = String)]
    pub income: Decimal,
    #[schema(value_type = String)]
    pub expense: Decimal,
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionSummary {
    /// All-time balance (income minus expense)
    #[schema(value_type = String)]
    pub balance: Decimal,
    pub current_month: PeriodSummary,
    pub previous_month: PeriodSummary,
    /// Change of income against the previous month in percent; absent when the previous month had none
    pub income_change_percent: Option<f64>,
    pub expense_change_percent: Option<f64>,
    /// Largest expense categories of the current month
    pub top_expense_categories: Vec<CategoryBreakdown>,
    pub recent_transactions: Vec<TransactionResponse>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CategoriesQuery {
    /// Only categories used by `income` or `expense` transactions
    #[serde(rename = "type")]
    pub transaction_type: Option<TransactionType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryUsage {
    pub category: String,
    pub count: i64,
    pub last_used: NaiveDate,
}

impl From<CategoryUsageRow> for CategoryUsage {
    fn from(row: CategoryUsageRow) -> Self {
        Self {
            category: row.category,
            count: row.count,
            last_used: row.last_used,
        }
    }
}

impl From<MonthTotals> for MonthlyTotals {
    fn from(row: MonthTotals) -> Self {
        Self {
            month: row.month,
            income: cents_to_decimal(row.income_cents),
            expense: cents_to_decimal(row.expense_cents),
            balance: cents_to_decimal(row.income_cents - row.expense_cents),
        }
    }
}

impl CategoryBreakdown {
    /// Attach each category's share of its type's total
    pub fn from_totals(rows: Vec<CategoryTotals>, totals: &TypeTotals) -> Vec<Self> {
        rows.into_iter()
            .map(|row| {
                let whole = match row.transaction_type {
                    TransactionType::Income => totals.income_cents,
                    TransactionType::Expense => totals.expense_cents,
                };
                Self {
                    percentage: percentage(row.total_cents, whole),
                    category: row.category,
                    transaction_type: row.transaction_type,
                    total: cents_to_decimal(row.total_cents),
                    count: row.count,
                }
            })
            .collect()
    }
}

impl TransactionStats {
    pub fn new(totals: &TypeTotals, by_category: Vec<CategoryTotals>, by_month: Vec<MonthTotals>) -> Self {
        Self {
            total_income: cents_to_decimal(totals.income_cents),
            total_expense: cents_to_decimal(totals.expense_cents),
            balance: cents_to_decimal(totals.income_cents - totals.expense_cents),
            transaction_count: totals.income_count + totals.expense_count,
            income_count: totals.income_count,
            expense_count: totals.expense_count,
            by_category: CategoryBreakdown::from_totals(by_category, totals),
            by_month: by_month.into_iter().map(MonthlyTotals::from).collect(),
        }
    }
}

impl PeriodSummary {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, totals: &TypeTotals) -> Self {
        Self {
            start_date,
            end_date,
            income: cents_to_decimal(totals.income_cents),
            expense: cents_to_decimal(totals.expense_cents),
            balance: cents_to_decimal(totals.income_cents - totals.expense_cents),
            transaction_count: totals.income_count + totals.expense_count,
        }
    }
}

/// `part` as percentage of `whole`, rounded to two places
pub fn percentage(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let value = Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole);
    value.round_dp(2).to_f64().unwrap_or_default()
}

/// Relative change from `previous` to `current` in percent; `None` without a baseline
pub fn change_percent(current: i64, previous: i64) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    let value = Decimal::from(current - previous) * Decimal::ONE_HUNDRED / Decimal::from(previous);
    value.round_dp(2).to_f64()
}

// Conversions

pub fn cents_to_decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Exact conversion to cents for the value of `field`.
fn decimal_to_cents(field: &str, amount: Decimal) -> Result<i64> {
    if amount.normalize().scale() > 2 {
        return Err(Error::validation(field, "Der Betrag darf höchstens zwei Nachkommastellen haben."));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .filter(|cents| *cents <= MAX_AMOUNT_CENTS)
        .ok_or_else(|| Error::validation(field, "Der Betrag ist zu groß."))
}

pub fn amount_to_cents(amount: Decimal) -> Result<i64> {
    if amount <= Decimal::ZERO {
        return Err(Error::validation("amount", "Der Betrag muss größer als 0 sein."));
    }
    decimal_to_cents("amount", amount)
}

fn filter_amount_to_cents(field: &str, amount: Decimal) -> Result<i64> {
    if amount < Decimal::ZERO {
        return Err(Error::validation(field, "Der Betrag darf nicht negativ sein."));
    }
    decimal_to_cents(field, amount)
}

fn validate_text(field: &str, value: &str, max_len: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        let message = match field {
            "category" => "Bitte wähle eine Kategorie.".to_string(),
            "description" => "Bitte gib eine Beschreibung ein.".to_string(),
            _ => format!("Das Feld {field} darf nicht leer sein."),
        };
        return Err(Error::validation(field, message));
    }
    if value.chars().count() > max_len {
        return Err(Error::validation(field, format!("Höchstens {max_len} Zeichen erlaubt.")));
    }
    Ok(value.to_string())
}

fn validate_notes(notes: Option<&str>) -> Result<Option<String>> {
    match non_empty(notes) {
        Some(n) if n.chars().count() > MAX_NOTES_LEN => Err(Error::validation(
            "notes",
            format!("Notizen dürfen höchstens {MAX_NOTES_LEN} Zeichen lang sein."),
        )),
        other => Ok(other),
    }
}

/// Trims, drops empty entries and removes duplicates while keeping the first occurrence.
fn validate_tags(tags: &[String]) -> Result<Vec<String>> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || cleaned.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(Error::validation("tags", format!("Tags dürfen höchstens {MAX_TAG_LEN} Zeichen lang sein.")));
        }
        cleaned.push(tag.to_string());
    }
    if cleaned.len() > MAX_TAGS {
        return Err(Error::validation("tags", format!("Höchstens {MAX_TAGS} Tags erlaubt.")));
    }
    Ok(cleaned)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}
