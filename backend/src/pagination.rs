//! Pagination helpers shared by the list endpoints.

use serde::{Deserialize, Serialize};

/// Default page size if not specified
pub const DEFAULT_PAGE_SIZE: i64 = 10;
/// Maximum allowed page size
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// `?page=&limit=` query parameters (page is 1-indexed)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
        }
    }

    /// Pages past `MAX_PAGE` are clamped so the offset always fits an i64.
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    /// Page size, falling back to `default` for endpoints with their own default.
    pub fn limit_or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn limit(&self) -> i64 {
        self.limit_or(DEFAULT_PAGE_SIZE)
    }

    /// Get SQL OFFSET value for a page size
    pub fn offset_for(&self, limit: i64) -> i64 {
        (self.page() - 1).saturating_mul(limit)
    }
}

/// Pagination metadata returned with list responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if limit > 0 { (total + limit - 1) / limit } else { 0 };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(page, limit, total),
        }
    }
}

/// Wrap a free-text query for `ILIKE`, ignoring blank input.
pub fn search_pattern(q: &Option<String>) -> Option<String> {
    q.as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q))
}
