//! Pagination for list endpoints.
//!
//! Most lists are page based (`page`, `limit`); the activity log is offset
//! based (`skip`, `limit`). Limits are clamped rather than rejected.

use coachhub_shared::models::{page_count, page_offset};
use serde::{Deserialize, Serialize};

/// Defaults for users, sessions and payments
pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

/// Page request after defaults and clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    /// `page` defaults to 1, `limit` to `default` and is clamped to `1..=max`.
    pub fn resolve(page: Option<i64>, limit: Option<i64>, default: i64, max: i64) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default).clamp(1, max),
        }
    }

    #[inline]
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.limit)
    }
}

/// Page metadata returned next to the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub pages: i64,
}

impl PageInfo {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        Self {
            page,
            limit,
            total,
            pages: page_count(total, limit),
        }
    }

    pub fn for_params(params: PageParams, total: i64) -> Self {
        Self::new(params.page, params.limit, total)
    }
}

/// Offset pagination used by the activity log
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OffsetQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl OffsetQuery {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    #[inline]
    pub fn limit(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

/// Offset metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetInfo {
    pub total: i64,
    pub limit: i64,
    pub skip: i64,
    pub has_more: bool,
}

impl OffsetInfo {
    pub fn new(total: i64, limit: i64, skip: i64) -> Self {
        Self {
            total,
            limit,
            skip,
            has_more: skip.saturating_add(limit) < total,
        }
    }
}
