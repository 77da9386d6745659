//! Storage backend seam.
//!
//! Backends work on flat JSON records and schemas; typing, metadata stamping,
//! maintenance gating and event publication live in
//! [`Database`](crate::Database).

use crate::cursor::QueryPlan;
use crate::error::Result;
use crate::schema::Schema;
use crate::stats::BackendCounters;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Storage engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Aggregation-pipeline document store.
    Document,
    /// Embedded relational store.
    Relational,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Document => "document",
            Self::Relational => "relational",
        })
    }
}

/// A storage engine.
///
/// `create`, `update` and `delete` report a missing record or a uniqueness
/// violation as `None`, never as an error. Every successful write clears the
/// collection's count cache.
pub trait Backend: Send + Sync {
    /// Engine family.
    fn kind(&self) -> BackendKind;

    /// Connectivity check.
    fn ok(&self) -> bool;

    /// Materializes the collection/table and its indexes. Idempotent.
    fn create_table(&self, table: &str, schema: &Schema) -> Result<()>;

    /// Inserts `record` and returns the assigned sequence, or `None` when a
    /// unique constraint rejected it.
    fn create(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<i64>>;

    /// Replaces the stored record with the same id.
    fn update(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<Uuid>>;

    /// Removes a record by id.
    fn delete(&self, table: &str, id: Uuid) -> Result<Option<Uuid>>;

    /// Loads a record by id.
    fn get_one(&self, table: &str, schema: &Schema, id: Uuid) -> Result<Option<Value>>;

    /// Starts a query plan over `table`.
    fn find(&self, table: &str, schema: Arc<Schema>) -> Result<Box<dyn QueryPlan>>;

    /// Dumps the whole database into `dir`.
    fn dump(&self, dir: &Path) -> Result<()>;

    /// Restores a dump produced by [`Backend::dump`], dropping existing data
    /// first when `drop` is set.
    fn restore(&self, dir: &Path, drop: bool) -> Result<()>;

    /// Engine counters.
    fn counters(&self) -> BackendCounters {
        BackendCounters::default()
    }
}
