//! Document store driver seam.

use crate::error::DocumentResult;
use crate::pipeline::Stage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// Result of a single-document write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied.
    Applied,
    /// No document had the requested `_id`.
    NotFound,
    /// A unique index rejected the write.
    Duplicate,
}

/// Ascending index over one or more document paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Indexed paths, in key order.
    pub keys: Vec<String>,
    /// Whether the index rejects duplicate keys.
    pub unique: bool,
}

impl IndexSpec {
    /// Single-path non-unique index.
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            keys: vec![path.into()],
            unique: false,
        }
    }

    /// Single-path unique index.
    pub fn unique(path: impl Into<String>) -> Self {
        Self {
            keys: vec![path.into()],
            unique: true,
        }
    }

    /// Compound non-unique index.
    pub fn compound(paths: Vec<String>) -> Self {
        Self {
            keys: paths,
            unique: false,
        }
    }

    /// Index name in the `<path>_1_<path>_1` convention.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|k| format!("{k}_1"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// A document database holding `{_id, body}` documents.
///
/// Implementations must be safe to share across threads; each method is a
/// single round trip.
pub trait DocumentStore: Send + Sync {
    /// Connection string scheme or a short driver name, for logs.
    fn name(&self) -> &str;

    /// Connectivity check.
    fn ping(&self) -> bool;

    /// Creates an index. Creating an existing index is a no-op.
    fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentResult<()>;

    /// Inserts a document carrying an `_id`.
    fn insert_one(&self, collection: &str, document: Value) -> DocumentResult<WriteOutcome>;

    /// Replaces the `body` of the document with `_id == id`.
    fn update_body(&self, collection: &str, id: &str, body: Value) -> DocumentResult<WriteOutcome>;

    /// Deletes the document with `_id == id`.
    fn delete_one(&self, collection: &str, id: &str) -> DocumentResult<WriteOutcome>;

    /// Loads the document with `_id == id`.
    fn find_one(&self, collection: &str, id: &str) -> DocumentResult<Option<Value>>;

    /// Runs an aggregation pipeline.
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> DocumentResult<Vec<Value>>;

    /// Atomically increments `field` of the document `_id == key`, creating
    /// it with value 1 when missing, and returns the new value.
    fn increment(&self, collection: &str, key: &str, field: &str) -> DocumentResult<i64>;

    /// Dumps every collection into `dir`.
    fn dump(&self, dir: &Path) -> DocumentResult<()>;

    /// Restores a dump from `dir`, dropping the database first when `drop`
    /// is set. Documents whose `_id` already exists are kept.
    fn restore(&self, dir: &Path, drop: bool) -> DocumentResult<()>;
}
