//! Query cursors.
//!
//! A [`Cursor`] accumulates filter, sort, limit and join directives into a
//! backend-specific [`QueryPlan`] and executes it on a terminal call. Inputs
//! are validated here, before any backend lowering or I/O:
//!
//! - `limit(from, to)` rejects a negative `from` and `from > to`;
//! - `sort(key, ..)` rejects keys that are not part of the record schema or
//!   below a registered join output;
//! - `join(..)` rejects malformed table and field names.
//!
//! `count()` borrows the cursor and caches its result, so it can be read
//! before fetching. The fetch family consumes the cursor; a cursor cannot be
//! materialized twice.
//!
//! ```rust,ignore
//! let page = db
//!     .find::<Counter>(None)?
//!     .filter(Filter::parse(&json!(["count", ">=", 5]))?)?
//!     .sort("count", SortOrder::Asc)?
//!     .limit(0, Some(10))?;
//! let total = page.count()?;
//! let items = page.fetch()?;
//! ```

use crate::error::{Result, ValidationError};
use crate::filter::{validate_field_name, Filter};
use crate::record::{clean_joined, Model, Stored};
use crate::schema::Schema;
use crate::stats::DatabaseStats;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawOrder", into = "u8")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOrder {
    Int(u8),
    Text(String),
}

impl TryFrom<RawOrder> for SortOrder {
    type Error = String;

    fn try_from(raw: RawOrder) -> std::result::Result<Self, String> {
        match raw {
            RawOrder::Int(0) => Ok(Self::Asc),
            RawOrder::Int(1) => Ok(Self::Desc),
            RawOrder::Text(s) if s.eq_ignore_ascii_case("asc") => Ok(Self::Asc),
            RawOrder::Text(s) if s.eq_ignore_ascii_case("desc") => Ok(Self::Desc),
            RawOrder::Int(n) => Err(format!("unknown sort order: {n}")),
            RawOrder::Text(s) => Err(format!("unknown sort order: {s}")),
        }
    }
}

impl From<SortOrder> for u8 {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Asc => 0,
            SortOrder::Desc => 1,
        }
    }
}

/// A join directive: attach rows of `table` whose `foreign_field` matches
/// this record's `local_field`, under `joined_collections.<output>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    /// Foreign collection/table.
    pub table: String,
    /// Field of the primary record.
    pub local_field: String,
    /// Output name.
    pub output: String,
    /// Field of the foreign record, `id` by default.
    pub foreign_field: String,
}

impl Join {
    /// Creates a join on the foreign `id`.
    pub fn new(
        table: impl Into<String>,
        local_field: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            local_field: local_field.into(),
            output: output.into(),
            foreign_field: "id".to_string(),
        }
    }

    /// Sets the foreign field.
    #[must_use]
    pub fn on(mut self, foreign_field: impl Into<String>) -> Self {
        self.foreign_field = foreign_field.into();
        self
    }

    /// Builds a join from `[table, local, output]` or
    /// `[table, local, output, foreign]`.
    pub fn from_params(params: &[String]) -> Result<Self> {
        match params {
            [table, local, output] => Ok(Self::new(table, local, output)),
            [table, local, output, foreign] => Ok(Self::new(table, local, output).on(foreign)),
            _ => Err(ValidationError::BadJoin {
                params: params.to_vec(),
            }
            .into()),
        }
    }

    /// Checks every component is a plain identifier or dotted path.
    pub fn validate(&self) -> Result<()> {
        validate_field_name(&self.local_field)?;
        validate_field_name(&self.foreign_field)?;
        for name in [&self.table, &self.output] {
            if name.contains('.') {
                return Err(ValidationError::InvalidFieldName { name: name.clone() }.into());
            }
            validate_field_name(name)?;
        }
        Ok(())
    }
}

/// Backend-specific physical plan behind a cursor.
///
/// Inputs reaching a plan have already been validated by [`Cursor`].
pub trait QueryPlan: Send {
    /// Collection/table the plan reads.
    fn collection(&self) -> &str;

    /// Adds a filter; successive filters are conjunctive.
    fn filter(&mut self, filter: &Filter) -> Result<()>;

    /// Sets the sort key.
    fn sort(&mut self, key: &str, order: SortOrder) -> Result<()>;

    /// Sets the `[from, to)` window.
    fn limit(&mut self, from: u64, to: Option<u64>) -> Result<()>;

    /// Adds a join.
    fn join(&mut self, join: &Join) -> Result<()>;

    /// Counts matching records, ignoring the limit window.
    fn count(&self) -> Result<u64>;

    /// Returns matching records as flat objects, joined rows grouped under
    /// `joined_collections`.
    fn fetch(&self) -> Result<Vec<Value>>;
}

/// Chainable query over records of `T`.
pub struct Cursor<T> {
    plan: Box<dyn QueryPlan>,
    schema: Arc<Schema>,
    joins: Vec<String>,
    limited: bool,
    count: OnceLock<u64>,
    stats: Arc<DatabaseStats>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("collection", &self.plan.collection())
            .field("joins", &self.joins)
            .field("limited", &self.limited)
            .finish()
    }
}

impl<T: Model> Cursor<T> {
    /// Wraps a backend plan.
    pub fn new(plan: Box<dyn QueryPlan>, schema: Arc<Schema>, stats: Arc<DatabaseStats>) -> Self {
        Self {
            plan,
            schema,
            joins: Vec::new(),
            limited: false,
            count: OnceLock::new(),
            stats,
            _marker: PhantomData,
        }
    }

    /// Adds a filter.
    pub fn filter(mut self, filter: Filter) -> Result<Self> {
        self.plan.filter(&filter)?;
        Ok(self)
    }

    /// Sorts by `key`.
    pub fn sort(mut self, key: &str, order: SortOrder) -> Result<Self> {
        self.check_sort_key(key)?;
        self.plan.sort(key, order)?;
        Ok(self)
    }

    /// Restricts to the `[from, to)` window; `to = None` is unbounded.
    pub fn limit(mut self, from: i64, to: Option<i64>) -> Result<Self> {
        if from < 0 {
            return Err(ValidationError::NegativeLimit.into());
        }
        if let Some(to) = to {
            if from > to {
                return Err(ValidationError::LimitOrder { from, to }.into());
            }
        }
        self.plan.limit(from as u64, to.map(|t| t as u64))?;
        self.limited = true;
        Ok(self)
    }

    /// Attaches a related collection.
    pub fn join(mut self, join: Join) -> Result<Self> {
        join.validate()?;
        self.plan.join(&join)?;
        self.joins.push(join.output);
        Ok(self)
    }

    /// Number of matching records. Cached for the cursor's lifetime.
    pub fn count(&self) -> Result<u64> {
        if let Some(count) = self.count.get() {
            return Ok(*count);
        }
        let count = self.plan.count()?;
        self.stats.record_count();
        debug!(collection = self.plan.collection(), count, "cursor counted");
        Ok(*self.count.get_or_init(|| count))
    }

    /// Fetches typed records.
    pub fn fetch(self) -> Result<Vec<Stored<T>>> {
        self.fetch_dict()?
            .into_iter()
            .map(Stored::from_value)
            .collect()
    }

    /// Fetches the first record.
    pub fn fetch_one(self) -> Result<Option<Stored<T>>> {
        self.fetch_one_dict()?.map(Stored::from_value).transpose()
    }

    /// Fetches records as JSON objects.
    pub fn fetch_dict(self) -> Result<Vec<Value>> {
        let mut rows = self.plan.fetch()?;
        self.stats.record_read();
        for row in &mut rows {
            clean_joined(row);
        }
        debug!(collection = self.plan.collection(), rows = rows.len(), "cursor fetched");
        Ok(rows)
    }

    /// Fetches the first record as a JSON object.
    pub fn fetch_one_dict(mut self) -> Result<Option<Value>> {
        if !self.limited {
            self.plan.limit(0, Some(1))?;
        }
        Ok(self.fetch_dict()?.into_iter().next())
    }

    fn check_sort_key(&self, key: &str) -> Result<()> {
        let unknown = || ValidationError::UnknownSortKey {
            key: key.to_string(),
        };
        validate_field_name(key).map_err(|_| unknown())?;

        let head = key.split('.').next().unwrap_or(key);
        let joined = key.contains('.') && self.joins.iter().any(|j| j == head);
        if joined || self.schema.has_path(key) {
            Ok(())
        } else {
            Err(unknown().into())
        }
    }
}
