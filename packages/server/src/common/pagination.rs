//! Cursor-based pagination for append-only histories.
//!
//! Cursors are opaque base64 strings wrapping a v7 UUID. Because v7 ids are
//! time-ordered, "everything older than the cursor" is a stable page boundary
//! even while new rows are appended.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use uuid::Uuid;

use super::errors::{CoreError, CoreResult};

/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 25;

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(Uuid);

impl Cursor {
    pub fn new(id: Uuid) -> Self {
        Cursor(id)
    }

    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    pub fn encode_uuid(id: Uuid) -> String {
        Cursor::new(id).encode()
    }

    pub fn decode(s: &str) -> CoreResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| CoreError::validation("invalid cursor: not valid base64"))?;
        let uuid = Uuid::from_slice(&bytes)
            .map_err(|_| CoreError::validation("invalid cursor: not a valid id"))?;
        Ok(Cursor(uuid))
    }

    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

// ============================================================================
// Page request / response
// ============================================================================

/// Caller-supplied page arguments.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub limit: Option<i64>,
    /// Cursor returned as `next_cursor` by the previous page.
    pub after: Option<String>,
}

impl PageRequest {
    pub fn first(limit: i64) -> Self {
        PageRequest {
            limit: Some(limit),
            after: None,
        }
    }

    pub fn after(limit: i64, cursor: impl Into<String>) -> Self {
        PageRequest {
            limit: Some(limit),
            after: Some(cursor.into()),
        }
    }

    /// Applies defaults, clamps the limit to `1..=max_page_size` and decodes
    /// the cursor.
    pub fn validate(&self, max_page_size: i64) -> CoreResult<ValidatedPage> {
        let max = max_page_size.max(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE.min(max)).clamp(1, max);
        let cursor = self
            .after
            .as_deref()
            .map(Cursor::decode)
            .transpose()?
            .map(Cursor::into_uuid);
        Ok(ValidatedPage { limit, cursor })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedPage {
    pub limit: i64,
    pub cursor: Option<Uuid>,
}

impl ValidatedPage {
    /// SQL LIMIT value: one extra row tells whether another page exists.
    pub fn fetch_limit(&self) -> i64 {
        self.limit + 1
    }
}

/// One page of results, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Builds a page from `limit + 1` fetched rows.
    pub fn from_rows(mut rows: Vec<T>, page: &ValidatedPage, id_of: impl Fn(&T) -> Uuid) -> Self {
        let has_more = rows.len() as i64 > page.limit;
        if has_more {
            rows.truncate(page.limit as usize);
        }
        let next_cursor = if has_more {
            rows.last().map(|row| Cursor::encode_uuid(id_of(row)))
        } else {
            None
        };
        Page {
            items: rows,
            next_cursor,
            has_more,
        }
    }
}
