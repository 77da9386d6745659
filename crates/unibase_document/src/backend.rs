//! Document backend over a [`DocumentStore`].

use crate::error::{backend_error, DocumentError};
use crate::plan::DocumentPlan;
use crate::store::{DocumentStore, IndexSpec, WriteOutcome};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unibase_core::{
    Backend, BackendCounters, BackendKind, QueryCache, QueryPlan, Result, Schema,
};
use uuid::Uuid;

/// Collection holding one sequence counter per record type.
pub const SEQUENCE_COLLECTION: &str = "auto_increment";

const SEQUENCE_FIELD: &str = "seq";
const CREATED_PATH: &str = "created.timestamp";

/// Stores each record as `{_id: id, body: record}` in a collection named
/// after its type.
pub struct DocumentBackend {
    store: Arc<dyn DocumentStore>,
    cache: Arc<QueryCache>,
    indexed: Mutex<HashSet<String>>,
    ddl_executions: AtomicU64,
}

impl DocumentBackend {
    /// Creates a backend over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<QueryCache>) -> Self {
        Self {
            store,
            cache,
            indexed: Mutex::new(HashSet::new()),
            ddl_executions: AtomicU64::new(0),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Indexes declared for a schema, in creation order.
    ///
    /// `seq` and the creation timestamp are indexed unless the schema already
    /// declares them; plain indexes already covered by a unique one are
    /// skipped.
    pub fn index_specs(schema: &Schema) -> Vec<IndexSpec> {
        let declared = |path: &str| {
            schema.unique().iter().any(|p| p == path) || schema.index().iter().any(|p| p == path)
        };
        let body = |path: &str| format!("body.{path}");

        let mut specs = Vec::new();
        for path in [SEQUENCE_FIELD, CREATED_PATH] {
            if !declared(path) {
                specs.push(IndexSpec::single(body(path)));
            }
        }
        specs.extend(schema.unique().iter().map(|p| IndexSpec::unique(body(p))));
        specs.extend(
            schema
                .index()
                .iter()
                .filter(|p| !schema.is_unique(p))
                .map(|p| IndexSpec::single(body(p))),
        );
        specs.extend(
            schema
                .compound_index()
                .iter()
                .map(|group| IndexSpec::compound(group.iter().map(|p| body(p)).collect())),
        );
        specs
    }

    fn body_of(record: &Value) -> Value {
        let mut body = record.clone();
        if let Some(map) = body.as_object_mut() {
            map.remove("joined_collections");
        }
        body
    }

    fn id_of(table: &str, record: &Value) -> Result<String> {
        record
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| backend_error(table, DocumentError::malformed(table, "record has no id")))
    }
}

impl Backend for DocumentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Document
    }

    fn ok(&self) -> bool {
        self.store.ping()
    }

    fn create_table(&self, table: &str, schema: &Schema) -> Result<()> {
        let mut indexed = self.indexed.lock();
        if indexed.contains(table) {
            return Ok(());
        }
        for spec in Self::index_specs(schema) {
            self.store
                .create_index(table, &spec)
                .map_err(|e| backend_error("error creating index", e))?;
            self.ddl_executions.fetch_add(1, Ordering::Relaxed);
        }
        debug!(table, store = self.store.name(), "collection indexes materialized");
        indexed.insert(table.to_string());
        Ok(())
    }

    fn create(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<i64>> {
        self.create_table(table, schema)?;
        let id = Self::id_of(table, record)?;
        let seq = self
            .store
            .increment(SEQUENCE_COLLECTION, table, SEQUENCE_FIELD)
            .map_err(|e| backend_error("error assigning sequence", e))?;

        let mut body = Self::body_of(record);
        body[SEQUENCE_FIELD] = json!(seq);
        let outcome = self
            .store
            .insert_one(table, json!({ "_id": id, "body": body }))
            .map_err(|e| backend_error("error creating document", e))?;
        self.cache.clear(table);

        match outcome {
            WriteOutcome::Applied => {
                info!(table, id = %id, seq, "document created");
                Ok(Some(seq))
            }
            _ => {
                warn!(table, id = %id, "document rejected by unique index");
                Ok(None)
            }
        }
    }

    fn update(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<Uuid>> {
        self.create_table(table, schema)?;
        let id = Self::id_of(table, record)?;
        let outcome = self
            .store
            .update_body(table, &id, Self::body_of(record))
            .map_err(|e| backend_error("error updating document", e))?;
        self.cache.clear(table);

        match outcome {
            WriteOutcome::Applied => {
                info!(table, id = %id, "document updated");
                Ok(Uuid::parse_str(&id).ok())
            }
            WriteOutcome::NotFound => {
                warn!(table, id = %id, "document to update not found");
                Ok(None)
            }
            WriteOutcome::Duplicate => {
                warn!(table, id = %id, "update rejected by unique index");
                Ok(None)
            }
        }
    }

    fn delete(&self, table: &str, id: Uuid) -> Result<Option<Uuid>> {
        let outcome = self
            .store
            .delete_one(table, &id.to_string())
            .map_err(|e| backend_error("error deleting document", e))?;
        self.cache.clear(table);

        if outcome == WriteOutcome::Applied {
            info!(table, id = %id, "document deleted");
            Ok(Some(id))
        } else {
            warn!(table, id = %id, "document to delete not found");
            Ok(None)
        }
    }

    fn get_one(&self, table: &str, _schema: &Schema, id: Uuid) -> Result<Option<Value>> {
        let document = self
            .store
            .find_one(table, &id.to_string())
            .map_err(|e| backend_error("error loading document", e))?;
        Ok(document.and_then(|mut d| d.get_mut("body").map(Value::take)))
    }

    fn find(&self, table: &str, _schema: Arc<Schema>) -> Result<Box<dyn QueryPlan>> {
        Ok(Box::new(DocumentPlan::new(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            table,
        )))
    }

    fn dump(&self, dir: &Path) -> Result<()> {
        self.store
            .dump(dir)
            .map_err(|e| backend_error("error exporting database", e))
    }

    fn restore(&self, dir: &Path, drop: bool) -> Result<()> {
        self.store
            .restore(dir, drop)
            .map_err(|e| backend_error("error importing database", e))?;
        self.indexed.lock().clear();
        Ok(())
    }

    fn counters(&self) -> BackendCounters {
        BackendCounters {
            ddl_executions: self.ddl_executions.load(Ordering::Relaxed),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
        }
    }
}
