//! HTTP handlers for transaction endpoints.
//!
//! Every query runs through [`Transactions`], which is scoped to the
//! authenticated owner: other users' transactions behave as if they did not exist.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{Datelike, Months, NaiveDate, Utc};
use serde::Serialize;

use crate::{
    AppState,
    api::models::{
        pagination::PaginatedResponse,
        transactions::{
            BulkDeleteRequest, BulkDeleteResponse, CategoriesQuery, CategoryBreakdown, CategoryUsage, ExportFormat,
            ExportTransactionsQuery, ListTransactionsQuery, PeriodSummary, SummaryQuery, TransactionCreate, TransactionFilterQuery,
            TransactionResponse, TransactionStats, TransactionSummary, TransactionType, TransactionUpdate, cents_to_decimal,
            change_percent,
        },
        users::CurrentUser,
    },
    db::{
        self,
        errors::DbError,
        handlers::{Repository, Transactions},
        models::transactions::{TransactionDBResponse, TransactionFilter},
    },
    errors::{Error, Result},
    types::{TransactionId, abbrev_uuid},
};

/// Most ids accepted by one bulk delete
const MAX_BULK_DELETE: usize = 500;
const TOP_EXPENSE_CATEGORIES: usize = 5;
const RECENT_TRANSACTIONS: i64 = 5;

fn not_found(id: TransactionId) -> Error {
    Error::NotFound {
        resource: "Transaktion".to_string(),
        id: id.to_string(),
    }
}

/// First and last day of the month containing `date`
fn month_bounds(date: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let invalid = || Error::validation("date", "Ungültiges Datum.");
    let first = date.with_day(1).ok_or_else(invalid)?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(invalid)?;
    Ok((first, last))
}

/// List the current user's transactions
#[utoipa::path(
    get,
    path = "/api/transactions",
    tag = "transactions",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Paginated transactions", body = PaginatedResponse<TransactionResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid filter"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn list_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<PaginatedResponse<TransactionResponse>>> {
    let (skip, limit) = query.pagination.params();
    let filter = TransactionFilter {
        sort: query.sort.unwrap_or_default(),
        order: query.order.unwrap_or_default(),
        skip,
        limit,
        ..query.filter.to_filter()?
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Transactions::new(&mut conn, current_user.id);
    let total_count = repo.count(&filter).await?;
    let transactions = repo.list(&filter).await?;

    Ok(Json(PaginatedResponse::new(
        transactions.into_iter().map(TransactionResponse::from).collect(),
        total_count,
        skip,
        limit,
    )))
}

/// Create a transaction
#[utoipa::path(
    post,
    path = "/api/transactions",
    tag = "transactions",
    request_body = TransactionCreate,
    responses(
        (status = 201, description = "Transaction created", body = TransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid input"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn create_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<TransactionCreate>,
) -> Result<(StatusCode, Json<TransactionResponse>)> {
    let request = request.into_db_request()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut conn, current_user.id).create(&request).await?;

    Ok((StatusCode::CREATED, Json(TransactionResponse::from(transaction))))
}

/// Get a single transaction
#[utoipa::path(
    get,
    path = "/api/transactions/{id}",
    tag = "transactions",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 200, description = "Transaction", body = TransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found or owned by someone else"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), transaction_id = %abbrev_uuid(&id)))]
pub async fn get_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<TransactionId>,
) -> Result<Json<TransactionResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut conn, current_user.id)
        .get_by_id(id)
        .await?
        .ok_or_else(|| not_found(id))?;

    Ok(Json(TransactionResponse::from(transaction)))
}

/// Update a transaction; omitted fields stay unchanged
#[utoipa::path(
    put,
    path = "/api/transactions/{id}",
    tag = "transactions",
    params(("id" = String, Path, description = "Transaction ID")),
    request_body = TransactionUpdate,
    responses(
        (status = 200, description = "Updated transaction", body = TransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found or owned by someone else"),
        (status = 422, description = "Invalid input"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), transaction_id = %abbrev_uuid(&id)))]
pub async fn update_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<TransactionId>,
    Json(request): Json<TransactionUpdate>,
) -> Result<Json<TransactionResponse>> {
    if request.is_empty() {
        return Err(Error::Validation {
            message: "Es wurden keine Änderungen übermittelt.".to_string(),
            field: None,
        });
    }
    let request = request.into_db_request()?;

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Transactions::new(&mut tx, current_user.id)
        .update(id, &request)
        .await
        .map_err(|e| match e {
            DbError::NotFound => not_found(id),
            other => other.into(),
        })?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(TransactionResponse::from(transaction)))
}

/// Delete a transaction
#[utoipa::path(
    delete,
    path = "/api/transactions/{id}",
    tag = "transactions",
    params(("id" = String, Path, description = "Transaction ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found or owned by someone else"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id), transaction_id = %abbrev_uuid(&id)))]
pub async fn delete_transaction(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<TransactionId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    if !Transactions::new(&mut conn, current_user.id).delete(id).await? {
        return Err(not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Delete several transactions at once; unknown ids are ignored
#[utoipa::path(
    delete,
    path = "/api/transactions",
    tag = "transactions",
    request_body = BulkDeleteRequest,
    responses(
        (status = 200, description = "Number of deleted transactions", body = BulkDeleteResponse),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "No ids or too many ids"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn bulk_delete_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<BulkDeleteRequest>,
) -> Result<Json<BulkDeleteResponse>> {
    if request.ids.is_empty() {
        return Err(Error::validation("ids", "Bitte wähle mindestens eine Transaktion aus."));
    }
    if request.ids.len() > MAX_BULK_DELETE {
        return Err(Error::validation(
            "ids",
            format!("Es können höchstens {MAX_BULK_DELETE} Transaktionen auf einmal gelöscht werden."),
        ));
    }

    let mut tx = db::begin_write(&state.db).await.map_err(|e| Error::Database(e.into()))?;
    let deleted = Transactions::new(&mut tx, current_user.id).delete_bulk(&request.ids).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(BulkDeleteResponse { deleted }))
}

/// Totals plus per-category and per-month breakdown for the filter
#[utoipa::path(
    get,
    path = "/api/transactions/stats",
    tag = "transactions",
    params(TransactionFilterQuery),
    responses(
        (status = 200, description = "Statistics", body = TransactionStats),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid filter"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn transaction_stats(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<TransactionFilterQuery>,
) -> Result<Json<TransactionStats>> {
    let filter = query.to_filter()?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Transactions::new(&mut conn, current_user.id);
    let totals = repo.totals(&filter).await?;
    let by_category = repo.category_totals(&filter).await?;
    let by_month = repo.monthly_totals(&filter).await?;

    Ok(Json(TransactionStats::new(&totals, by_category, by_month)))
}

/// Dashboard figures: balance, this month against last month, recent activity
#[utoipa::path(
    get,
    path = "/api/transactions/summary",
    tag = "transactions",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Summary", body = TransactionSummary),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn transaction_summary(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<TransactionSummary>> {
    let reference = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let (current_start, current_end) = month_bounds(reference)?;
    let (previous_start, previous_end) = current_start
        .pred_opt()
        .map(month_bounds)
        .transpose()?
        .ok_or_else(|| Error::validation("date", "Ungültiges Datum."))?;

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Transactions::new(&mut conn, current_user.id);

    let all_time = repo.totals(&TransactionFilter::default()).await?;
    let current_filter = TransactionFilter::date_range(current_start, current_end);
    let current = repo.totals(&current_filter).await?;
    let previous = repo
        .totals(&TransactionFilter::date_range(previous_start, previous_end))
        .await?;

    let expense_filter = TransactionFilter {
        transaction_type: Some(TransactionType::Expense),
        ..current_filter
    };
    let mut top_expense_categories = CategoryBreakdown::from_totals(repo.category_totals(&expense_filter).await?, &current);
    top_expense_categories.truncate(TOP_EXPENSE_CATEGORIES);

    let recent = repo
        .list(&TransactionFilter {
            limit: RECENT_TRANSACTIONS,
            ..Default::default()
        })
        .await?;

    Ok(Json(TransactionSummary {
        balance: cents_to_decimal(all_time.income_cents - all_time.expense_cents),
        current_month: PeriodSummary::new(current_start, current_end, &current),
        previous_month: PeriodSummary::new(previous_start, previous_end, &previous),
        income_change_percent: change_percent(current.income_cents, previous.income_cents),
        expense_change_percent: change_percent(current.expense_cents, previous.expense_cents),
        top_expense_categories,
        recent_transactions: recent.into_iter().map(TransactionResponse::from).collect(),
    }))
}

/// Categories in use, most used first
#[utoipa::path(
    get,
    path = "/api/transactions/categories",
    tag = "transactions",
    params(CategoriesQuery),
    responses(
        (status = 200, description = "Categories with usage counts", body = Vec<CategoryUsage>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn list_categories(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<CategoriesQuery>,
) -> Result<Json<Vec<CategoryUsage>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let rows = Transactions::new(&mut conn, current_user.id)
        .categories(query.transaction_type)
        .await?;
    Ok(Json(rows.into_iter().map(CategoryUsage::from).collect()))
}

#[derive(Serialize)]
struct CsvRow<'a> {
    date: NaiveDate,
    #[serde(rename = "type")]
    transaction_type: &'static str,
    category: &'a str,
    description: &'a str,
    amount: String,
    notes: &'a str,
    tags: String,
}

impl<'a> From<&'a TransactionDBResponse> for CsvRow<'a> {
    fn from(t: &'a TransactionDBResponse) -> Self {
        Self {
            date: t.date,
            transaction_type: t.transaction_type.as_str(),
            category: &t.category,
            description: &t.description,
            amount: cents_to_decimal(t.amount_cents).to_string(),
            notes: t.notes.as_deref().unwrap_or_default(),
            tags: t.tags.join(";"),
        }
    }
}

fn to_csv(transactions: &[TransactionDBResponse]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for transaction in transactions {
        writer.serialize(CsvRow::from(transaction)).map_err(|e| Error::Internal {
            operation: format!("write CSV row: {e}"),
        })?;
    }
    // An empty export still gets a header line
    if transactions.is_empty() {
        writer
            .write_record(["date", "type", "category", "description", "amount", "notes", "tags"])
            .map_err(|e| Error::Internal {
                operation: format!("write CSV header: {e}"),
            })?;
    }
    writer.into_inner().map_err(|e| Error::Internal {
        operation: format!("flush CSV export: {e}"),
    })
}

/// Download transactions matching the filter as CSV or JSON
#[utoipa::path(
    get,
    path = "/api/transactions/export",
    tag = "transactions",
    params(ExportTransactionsQuery),
    responses(
        (status = 200, description = "Attachment with the matching transactions", content_type = "text/csv"),
        (status = 401, description = "Unauthorized"),
        (status = 422, description = "Invalid filter"),
    ),
    security(("BearerAuth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %abbrev_uuid(&current_user.id)))]
pub async fn export_transactions(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ExportTransactionsQuery>,
) -> Result<Response> {
    let filter = TransactionFilter {
        limit: state.config.transactions.export_max_rows,
        ..query.filter.to_filter()?
    };

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transactions = Transactions::new(&mut conn, current_user.id).list(&filter).await?;
    tracing::debug!(rows = transactions.len(), "Exporting transactions");

    let today = Utc::now().date_naive();
    let (content_type, extension, body) = match query.format.unwrap_or_default() {
        ExportFormat::Csv => ("text/csv; charset=utf-8", "csv", to_csv(&transactions)?),
        ExportFormat::Json => {
            let rows: Vec<TransactionResponse> = transactions.into_iter().map(TransactionResponse::from).collect();
            let body = serde_json::to_vec_pretty(&rows).map_err(|e| Error::Internal {
                operation: format!("serialize JSON export: {e}"),
            })?;
            ("application/json", "json", body)
        }
    };
    let disposition = format!("attachment; filename=\"finora-transaktionen-{today}.{extension}\"");

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::ErrorResponse,
        test_utils::{access_token_for, create_test_app, insert_test_user},
    };
    use axum_test::TestServer;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn create(server: &TestServer, token: &str, body: serde_json::Value) -> TransactionResponse {
        let response = server.post("/api/transactions").authorization_bearer(token).json(&body).await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn seed(server: &TestServer, token: &str) {
        for body in [
            json!({"amount": "3000.00", "type": "income", "category": "Gehalt", "description": "Lohn Januar", "date": "2024-01-31"}),
            json!({"amount": "25.00", "type": "expense", "category": "Lebensmittel", "description": "Markt", "date": "2024-01-05"}),
            json!({"amount": "950", "type": "expense", "category": "Miete", "description": "Miete Februar", "date": "2024-02-01"}),
            json!({"amount": "50.00", "type": "expense", "category": "Lebensmittel", "description": "Wocheneinkauf", "date": "2024-02-03", "tags": ["wochenende"]}),
            json!({"amount": "2000.00", "type": "income", "category": "Gehalt", "description": "Lohn Februar", "date": "2024-02-28"}),
        ] {
            create(server, token, body).await;
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_crud_roundtrip() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);

        let created = create(
            &server,
            &token,
            json!({
                "amount": "12.5",
                "type": "expense",
                "category": " Lebensmittel ",
                "description": "Bäcker",
                "date": "2024-03-02",
                "notes": "Brötchen",
                "tags": ["frühstück", "Frühstück", " "]
            }),
        )
        .await;
        assert_eq!(created.amount, dec("12.50"));
        assert_eq!(created.category, "Lebensmittel");
        assert_eq!(created.tags, vec!["frühstück".to_string()]);

        let fetched: TransactionResponse = server
            .get(&format!("/api/transactions/{}", created.id))
            .authorization_bearer(&token)
            .await
            .json();
        assert_eq!(fetched.id, created.id);

        let response = server
            .patch(&format!("/api/transactions/{}", created.id))
            .authorization_bearer(&token)
            .json(&json!({"amount": 15, "notes": null}))
            .await;
        response.assert_status_ok();
        let updated: TransactionResponse = response.json();
        assert_eq!(updated.amount, dec("15"));
        assert_eq!(updated.notes, None);
        assert_eq!(updated.description, "Bäcker");

        server
            .delete(&format!("/api/transactions/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/transactions/{}", created.id))
            .authorization_bearer(&token)
            .await
            .assert_status_not_found();
    }

    #[test_log::test(tokio::test)]
    async fn test_requires_authentication() {
        let (server, _state, _dir) = create_test_app().await;
        server.get("/api/transactions").await.assert_status_unauthorized();
        server.get("/api/transactions/stats").await.assert_status_unauthorized();
    }

    #[test_log::test(tokio::test)]
    async fn test_amount_validation() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);

        for amount in ["0", "-3.00", "1.005", "79228162514264337593543950335"] {
            let response = server
                .post("/api/transactions")
                .authorization_bearer(&token)
                .json(&json!({"amount": amount, "type": "expense", "category": "X", "description": "Y", "date": "2024-01-01"}))
                .await;
            response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
            let body: ErrorResponse = response.json();
            assert_eq!(body.field.as_deref(), Some("amount"));
        }

        let response = server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("max_amount", "79228162514264337593543950335")
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorResponse = response.json();
        assert_eq!(body.field.as_deref(), Some("max_amount"));
    }

    #[test_log::test(tokio::test)]
    async fn test_users_cannot_touch_foreign_transactions() {
        let (server, state, _dir) = create_test_app().await;
        let anna = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let ben = insert_test_user(&state.db, "ben@example.com", "password123").await;
        let anna_token = access_token_for(&anna);
        let ben_token = access_token_for(&ben);

        let created = create(
            &server,
            &anna_token,
            json!({"amount": "10", "type": "expense", "category": "Kino", "description": "Film", "date": "2024-01-01"}),
        )
        .await;
        let path = format!("/api/transactions/{}", created.id);

        server.get(&path).authorization_bearer(&ben_token).await.assert_status_not_found();
        server
            .put(&path)
            .authorization_bearer(&ben_token)
            .json(&json!({"amount": "1"}))
            .await
            .assert_status_not_found();
        server.delete(&path).authorization_bearer(&ben_token).await.assert_status_not_found();

        let response = server
            .delete("/api/transactions")
            .authorization_bearer(&ben_token)
            .json(&json!({"ids": [created.id]}))
            .await;
        assert_eq!(response.json::<BulkDeleteResponse>().deleted, 0);

        let list: PaginatedResponse<TransactionResponse> =
            server.get("/api/transactions").authorization_bearer(&ben_token).await.json();
        assert_eq!(list.total_count, 0);

        // still intact for the owner
        server.get(&path).authorization_bearer(&anna_token).await.assert_status_ok();
    }

    #[test_log::test(tokio::test)]
    async fn test_list_filters_and_pagination() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let all: PaginatedResponse<TransactionResponse> = server.get("/api/transactions").authorization_bearer(&token).await.json();
        assert_eq!(all.total_count, 5);
        assert_eq!(all.limit, 50);
        // newest first by default
        assert_eq!(all.data[0].date, NaiveDate::from_ymd_opt(2024, 2, 28).unwrap());

        let page: PaginatedResponse<TransactionResponse> = server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("type", "expense")
            .add_query_param("sort", "amount")
            .add_query_param("order", "asc")
            .add_query_param("skip", "1")
            .add_query_param("limit", "1")
            .await
            .json();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].amount, dec("50"));

        let february: PaginatedResponse<TransactionResponse> = server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("start_date", "2024-02-01")
            .add_query_param("end_date", "2024-02-29")
            .add_query_param("min_amount", "100")
            .await
            .json();
        assert_eq!(february.total_count, 2);

        let search: PaginatedResponse<TransactionResponse> = server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("search", "LOHN")
            .await
            .json();
        assert_eq!(search.total_count, 2);

        server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("start_date", "2024-03-01")
            .add_query_param("end_date", "2024-02-01")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test_log::test(tokio::test)]
    async fn test_stats_match_transactions() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let stats: TransactionStats = server.get("/api/transactions/stats").authorization_bearer(&token).await.json();
        assert_eq!(stats.total_income, dec("5000"));
        assert_eq!(stats.total_expense, dec("1025"));
        assert_eq!(stats.balance, dec("3975"));
        assert_eq!(stats.transaction_count, 5);
        assert_eq!(stats.by_month.len(), 2);
        assert_eq!(stats.by_month[1].month, "2024-02");
        assert_eq!(stats.by_month[1].balance, dec("1000"));

        let groceries = stats
            .by_category
            .iter()
            .find(|c| c.category == "Lebensmittel")
            .unwrap();
        assert_eq!(groceries.total, dec("75"));
        assert_eq!(groceries.count, 2);

        let january: TransactionStats = server
            .get("/api/transactions/stats")
            .authorization_bearer(&token)
            .add_query_param("end_date", "2024-01-31")
            .await
            .json();
        assert_eq!(january.total_income, dec("3000"));
        assert_eq!(january.total_expense, dec("25"));
    }

    #[test_log::test(tokio::test)]
    async fn test_summary_compares_months() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let summary: TransactionSummary = server
            .get("/api/transactions/summary")
            .authorization_bearer(&token)
            .add_query_param("date", "2024-02-15")
            .await
            .json();

        assert_eq!(summary.balance, dec("3975"));
        assert_eq!(summary.current_month.start_date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(summary.current_month.end_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(summary.current_month.expense, dec("1000"));
        assert_eq!(summary.previous_month.income, dec("3000"));
        assert_eq!(summary.expense_change_percent, Some(3900.0));
        assert_eq!(summary.top_expense_categories[0].category, "Miete");
        assert_eq!(summary.top_expense_categories[0].percentage, 95.0);
        assert_eq!(summary.recent_transactions.len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn test_categories() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let categories: Vec<CategoryUsage> = server
            .get("/api/transactions/categories")
            .authorization_bearer(&token)
            .add_query_param("type", "expense")
            .await
            .json();
        let names: Vec<&str> = categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, vec!["Lebensmittel", "Miete"]);
        assert_eq!(categories[0].count, 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_bulk_delete() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let list: PaginatedResponse<TransactionResponse> = server
            .get("/api/transactions")
            .authorization_bearer(&token)
            .add_query_param("type", "income")
            .await
            .json();
        let ids: Vec<_> = list.data.iter().map(|t| t.id).collect();

        let response = server
            .delete("/api/transactions")
            .authorization_bearer(&token)
            .json(&json!({ "ids": ids }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<BulkDeleteResponse>().deleted, 2);

        server
            .delete("/api/transactions")
            .authorization_bearer(&token)
            .json(&json!({ "ids": [] }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test_log::test(tokio::test)]
    async fn test_export_csv_and_json() {
        let (server, state, _dir) = create_test_app().await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let response = server
            .get("/api/transactions/export")
            .authorization_bearer(&token)
            .add_query_param("category", "lebensmittel")
            .await;
        response.assert_status_ok();
        assert_eq!(response.header(header::CONTENT_TYPE), "text/csv; charset=utf-8");
        assert!(response.header(header::CONTENT_DISPOSITION).to_str().unwrap().starts_with("attachment;"));
        let text = response.text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "date,type,category,description,amount,notes,tags");
        assert_eq!(lines[1], "2024-02-03,expense,Lebensmittel,Wocheneinkauf,50.00,,wochenende");
        assert_eq!(lines.len(), 3);

        let rows: Vec<TransactionResponse> = server
            .get("/api/transactions/export")
            .authorization_bearer(&token)
            .add_query_param("format", "json")
            .await
            .json();
        assert_eq!(rows.len(), 5);
    }

    #[test_log::test(tokio::test)]
    async fn test_export_respects_row_limit() {
        let (server, state, _dir) = crate::test_utils::create_test_app_with(|c| c.transactions.export_max_rows = 2).await;
        let user = insert_test_user(&state.db, "anna@example.com", "password123").await;
        let token = access_token_for(&user);
        seed(&server, &token).await;

        let rows: Vec<TransactionResponse> = server
            .get("/api/transactions/export")
            .authorization_bearer(&token)
            .add_query_param("format", "json")
            .await
            .json();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_month_bounds() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(month_bounds(d(2024, 2, 15)).unwrap(), (d(2024, 2, 1), d(2024, 2, 29)));
        assert_eq!(month_bounds(d(2023, 12, 31)).unwrap(), (d(2023, 12, 1), d(2023, 12, 31)));
    }

    #[test]
    fn test_empty_csv_has_header() {
        let bytes = to_csv(&[]).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "date,type,category,description,amount,notes,tags\n");
    }
}
