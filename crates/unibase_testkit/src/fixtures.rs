//! Test fixtures and database helpers.
//!
//! Every fixture owns a temporary directory that holds the database file (for
//! SQLite) and the export directory, removed when the fixture drops.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use unibase_core::{Backend, Config, Database, Model, QueryCache, Stored};
use unibase_document::{DocumentBackend, MemoryDocumentStore};
use unibase_sqlite::SqliteBackend;

/// Timestamp of the first seeded record; later ones are one millisecond apart.
pub const SEED_EPOCH: i64 = 1_700_000_000_000;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// Short backend label for assertion messages.
    pub label: &'static str,
    temp_dir: TempDir,
}

impl TestDatabase {
    /// Creates a database over the in-process document store.
    pub fn memory() -> Self {
        Self::build("memory", "memory://", |_, cache| {
            let store = Arc::new(MemoryDocumentStore::new());
            let backend: Arc<dyn Backend> = Arc::new(DocumentBackend::new(store, cache));
            backend
        })
    }

    /// Creates a database over a SQLite file in a temporary directory.
    pub fn sqlite() -> Self {
        Self::build("sqlite", "sqlite://test.db", |dir, cache| {
            let path = dir.join("test.db");
            let backend: Arc<dyn Backend> = Arc::new(
                SqliteBackend::open(&path.to_string_lossy(), cache)
                    .expect("Failed to open sqlite database"),
            );
            backend
        })
    }

    fn build<F>(label: &'static str, database_string: &str, backend: F) -> Self
    where
        F: FnOnce(&Path, Arc<QueryCache>) -> Arc<dyn Backend>,
    {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config::new()
            .app_name("unibase_test")
            .database_string(database_string)
            .export_directory(temp_dir.path().join("dumps"))
            .cache_enabled(true)
            .cache_size(64);
        let cache = Arc::new(QueryCache::from_config(&config));
        let db = Database::new(backend(temp_dir.path(), cache), config)
            .expect("Failed to open database");
        Self {
            db,
            label,
            temp_dir,
        }
    }

    /// Directory export archives are written to.
    pub fn export_dir(&self) -> PathBuf {
        self.temp_dir.path().join("dumps")
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// One fresh database per bundled backend.
pub fn backends() -> Vec<TestDatabase> {
    vec![TestDatabase::memory(), TestDatabase::sqlite()]
}

/// Runs `f` against a fresh database of every bundled backend.
///
/// # Example
///
/// ```rust,ignore
/// for_each_backend(|db| {
///     db.register::<Counter>().unwrap();
///     assert_eq!(db.find::<Counter>(None).unwrap().count().unwrap(), 0);
/// });
/// ```
pub fn for_each_backend<F>(mut f: F)
where
    F: FnMut(&TestDatabase),
{
    for db in backends() {
        f(&db);
    }
}

/// Creates records from `payloads`, each stamped one millisecond after the
/// previous one so the default newest-first order is deterministic.
pub fn seed<T: Model>(db: &Database, payloads: Vec<T>) -> Vec<Stored<T>> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let mut record = Stored::new(data);
            record.created.timestamp = SEED_EPOCH + i as i64;
            db.create(&mut record, None)
                .expect("Failed to create record")
                .expect("Seed record rejected as duplicate");
            record
        })
        .collect()
}

/// Field `field` of each flat record, in order.
pub fn column(rows: &[Value], field: &str) -> Vec<Value> {
    rows.iter()
        .map(|r| r.get(field).cloned().unwrap_or(Value::Null))
        .collect()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use crate::models::{Child, Counter, Parent};

    /// Seeds counters `0..n` labelled `even`/`odd`.
    pub fn counters(db: &Database, n: i64) -> Vec<Stored<Counter>> {
        let payloads = (0..n)
            .map(|i| Counter::new(i, if i % 2 == 0 { "even" } else { "odd" }))
            .collect();
        seed(db, payloads)
    }

    /// Seeds parents, each with `children` children named `<parent>-<i>`.
    pub fn family(db: &Database, parents: &[&str], children: usize) -> Vec<Stored<Parent>> {
        let seeded = seed(
            db,
            parents
                .iter()
                .map(|name| Parent {
                    name: (*name).to_string(),
                })
                .collect(),
        );
        for parent in &seeded {
            let kids = (0..children)
                .map(|i| Child {
                    name: format!("{}-{i}", parent.data.name),
                })
                .collect::<Vec<_>>();
            for kid in kids {
                let mut record = Stored::new(kid).child_of(parent.id);
                db.create(&mut record, None)
                    .expect("Failed to create child")
                    .expect("Child rejected as duplicate");
            }
        }
        seeded
    }
}
