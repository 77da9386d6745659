//! Serializable query parameters.

use crate::cursor::{Cursor, Join, SortOrder};
use crate::error::Result;
use crate::filter::Filter;
use crate::record::{Model, Stored};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Query directives as received from a caller, e.g. a request body.
///
/// ```json
/// {
///   "sort_key": "count", "sort_order": 1,
///   "limit_from": 0, "limit_to": 20,
///   "filters": [["count", ">=", 5]],
///   "join": [["Child", "id", "children", "parent"]],
///   "fetch_dict": true
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    /// Sort key.
    pub sort_key: Option<String>,
    /// Sort direction, ascending when absent.
    pub sort_order: Option<SortOrder>,
    /// Window start. The window applies only when this is set.
    pub limit_from: Option<i64>,
    /// Window end (exclusive).
    pub limit_to: Option<i64>,
    /// Filter trees, combined conjunctively.
    pub filters: Option<Vec<Value>>,
    /// Join directives of 3 or 4 components.
    pub join: Option<Vec<Vec<String>>>,
    /// Dictionary materialization; the configured default when absent.
    pub fetch_dict: Option<bool>,
}

/// Materialized query items.
#[derive(Debug, Clone, PartialEq)]
pub enum Items<T> {
    /// Typed records.
    Records(Vec<Stored<T>>),
    /// JSON objects.
    Dicts(Vec<Value>),
}

impl<T> Items<T> {
    /// Number of items.
    pub fn len(&self) -> usize {
        match self {
            Self::Records(r) => r.len(),
            Self::Dicts(d) => d.len(),
        }
    }

    /// Whether there are no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Total match count plus the requested window of items.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Matches ignoring the window.
    pub count: u64,
    /// Items inside the window.
    pub items: Items<T>,
}

impl QueryParams {
    /// Applies joins, then filters, then sort, then limit.
    pub fn apply<T: Model>(&self, mut cursor: Cursor<T>) -> Result<Cursor<T>> {
        for params in self.join.iter().flatten() {
            cursor = cursor.join(Join::from_params(params)?)?;
        }
        for filter in self.filters.iter().flatten() {
            cursor = cursor.filter(Filter::parse(filter)?)?;
        }
        if let Some(key) = &self.sort_key {
            cursor = cursor.sort(key, self.sort_order.unwrap_or_default())?;
        }
        if let Some(from) = self.limit_from {
            cursor = cursor.limit(from, self.limit_to)?;
        }
        Ok(cursor)
    }

    /// Resolves the materialization mode against the configured default.
    pub fn fetch_dict_or(&self, default: bool) -> bool {
        self.fetch_dict.unwrap_or(default)
    }

    /// Applies the params, then counts and fetches.
    pub fn execute<T: Model>(&self, cursor: Cursor<T>, default_fetch_dict: bool) -> Result<Page<T>> {
        let cursor = self.apply(cursor)?;
        let count = cursor.count()?;
        let items = if self.fetch_dict_or(default_fetch_dict) {
            Items::Dicts(cursor.fetch_dict()?)
        } else {
            Items::Records(cursor.fetch()?)
        };
        Ok(Page { count, items })
    }
}
