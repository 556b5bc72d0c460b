//! Offset pagination (`skip`/`limit`) for list endpoints.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Page size when the client sends no `limit`.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page a client may ask for.
pub const MAX_LIMIT: i64 = 200;

// Query values arrive as strings once the struct sits behind
// `#[serde(flatten)]`, hence `DisplayFromStr`.
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Rows to skip
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<i64>,

    /// Rows per page
    #[param(default = 50, minimum = 1, maximum = 200)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl Pagination {
    /// Effective `(skip, limit)`: negative skips become 0, the limit is
    /// clamped into `1..=MAX_LIMIT`.
    pub fn params(&self) -> (i64, i64) {
        let skip = self.skip.unwrap_or(0).max(0);
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        (skip, limit)
    }
}

/// One page of a list plus the number of rows matching the filter.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub data: Vec<T>,
    /// Matching rows before `skip`/`limit` were applied
    pub total_count: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total_count: i64, skip: i64, limit: i64) -> Self {
        Self {
            data,
            total_count,
            skip,
            limit,
        }
    }
}
