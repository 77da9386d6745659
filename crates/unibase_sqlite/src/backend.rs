//! Relational backend over one SQLite connection.

use crate::codec::quote;
use crate::engine::{Engine, IN_MEMORY};
use crate::error::{backend_error, SqliteError, SqliteResult};
use crate::plan::SqlitePlan;
use crate::sql::{self, ID_COLUMN, SEQUENCE_COLUMN};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{DatabaseName, ToSql};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unibase_core::schema::{nest_columns, project, project_instance};
use unibase_core::{
    Backend, BackendCounters, BackendKind, QueryCache, QueryPlan, Result, Schema,
};
use uuid::Uuid;

/// File written into a dump directory.
pub const DUMP_FILE: &str = "database.sqlite";

const DUMP_SCHEMA: &str = "dump";

/// Stores each record type in a table named after it, one column per
/// flattened field.
pub struct SqliteBackend {
    engine: Arc<Engine>,
    cache: Arc<QueryCache>,
    created: Mutex<HashSet<String>>,
    ddl_executions: AtomicU64,
}

impl SqliteBackend {
    /// Opens the database file at `location`, or a private in-memory database
    /// for `:memory:` and the empty string.
    pub fn open(location: &str, cache: Arc<QueryCache>) -> Result<Self> {
        let engine = Engine::open(location).map_err(|e| backend_error("error opening database", e))?;
        info!(location, "sqlite backend ready");
        Ok(Self {
            engine: Arc::new(engine),
            cache,
            created: Mutex::new(HashSet::new()),
            ddl_executions: AtomicU64::new(0),
        })
    }

    /// Opens a private in-memory database.
    pub fn in_memory(cache: Arc<QueryCache>) -> Result<Self> {
        Self::open(IN_MEMORY, cache)
    }

    /// Names of the tables present in the database.
    pub fn tables(&self) -> Result<Vec<String>> {
        self.engine
            .tables()
            .map_err(|e| backend_error("error listing tables", e))
    }

    fn id_of(table: &str, record: &Value) -> SqliteResult<String> {
        record
            .get(ID_COLUMN)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SqliteError::MissingColumn {
                table: table.to_string(),
                column: ID_COLUMN.to_string(),
            })
    }

    fn tags(schema: &Schema) -> HashMap<String, &'static str> {
        project(schema)
            .into_iter()
            .map(|c| (c.name.clone(), c.storage_tag()))
            .collect()
    }

    fn invalidate_all(&self) -> SqliteResult<()> {
        for table in self.engine.tables()? {
            self.cache.clear(&table);
        }
        self.created.lock().clear();
        self.engine.forget_tables();
        Ok(())
    }

    fn merge_dump(&self, path: &Path) -> SqliteResult<()> {
        let conn = self.engine.lock();
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {DUMP_SCHEMA}"),
            [&*path.to_string_lossy()],
        )?;

        let merged = (|| -> SqliteResult<usize> {
            let mut stmt = conn.prepare(&format!(
                "SELECT name, sql FROM {DUMP_SCHEMA}.sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            ))?;
            let tables = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            drop(stmt);

            let columns_of = |table: &str, schema: &str| -> SqliteResult<Vec<String>> {
                let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2)")?;
                let names = stmt
                    .query_map([table, schema], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(names)
            };

            let mut rows = 0;
            for (table, create_sql) in tables {
                let mut existing = columns_of(&table, "main")?;
                if existing.is_empty() {
                    conn.execute(&create_sql, [])?;
                    existing = columns_of(&table, "main")?;
                }
                let shared: Vec<String> = columns_of(&table, DUMP_SCHEMA)?
                    .into_iter()
                    .filter(|c| c != SEQUENCE_COLUMN && existing.contains(c))
                    .map(|c| quote(&c))
                    .collect();
                if shared.is_empty() {
                    continue;
                }
                let list = shared.join(", ");
                let quoted = quote(&table);
                rows += conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO main.{quoted} ({list}) \
                         SELECT {list} FROM {DUMP_SCHEMA}.{quoted} ORDER BY {}",
                        quote(SEQUENCE_COLUMN)
                    ),
                    [],
                )?;
            }
            Ok(rows)
        })();

        conn.execute(&format!("DETACH DATABASE {DUMP_SCHEMA}"), [])?;
        let rows = merged?;
        info!(path = %path.display(), rows, "dump merged");
        Ok(())
    }
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn ok(&self) -> bool {
        self.engine.scalar("SELECT 1", &[]).is_ok()
    }

    fn create_table(&self, table: &str, schema: &Schema) -> Result<()> {
        let mut created = self.created.lock();
        if created.contains(table) {
            return Ok(());
        }
        let statements = std::iter::once(sql::create_table(table, &project(schema)))
            .chain(sql::create_indexes(table, schema));
        for statement in statements {
            self.engine
                .execute(&statement, [])
                .map_err(|e| backend_error("error creating table", e))?;
            self.ddl_executions.fetch_add(1, Ordering::Relaxed);
        }
        debug!(table, "table materialized");
        created.insert(table.to_string());
        Ok(())
    }

    fn create(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<i64>> {
        self.create_table(table, schema)?;
        let id = Self::id_of(table, record).map_err(|e| backend_error("error creating row", e))?;
        let (statement, values) = sql::insert(table, &project_instance(schema, record));
        let outcome = self.engine.insert(&statement, &values);
        self.cache.clear(table);

        match outcome {
            Ok(seq) => {
                info!(table, id = %id, seq, "row created");
                Ok(Some(seq))
            }
            Err(e) if e.is_constraint_violation() => {
                warn!(table, id = %id, error = %e, "row rejected by constraint");
                Ok(None)
            }
            Err(e) => Err(backend_error("error creating row", e)),
        }
    }

    fn update(&self, table: &str, schema: &Schema, record: &Value) -> Result<Option<Uuid>> {
        self.create_table(table, schema)?;
        let id = Self::id_of(table, record).map_err(|e| backend_error("error updating row", e))?;
        let (statement, values) = sql::update(table, &project_instance(schema, record));
        let named: Vec<(&str, &dyn ToSql)> = values
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect();
        let outcome = self.engine.execute(&statement, named.as_slice());
        self.cache.clear(table);

        match outcome {
            Ok(0) => {
                warn!(table, id = %id, "row to update not found");
                Ok(None)
            }
            Ok(_) => {
                info!(table, id = %id, "row updated");
                Ok(Uuid::parse_str(&id).ok())
            }
            Err(e) if e.is_constraint_violation() => {
                warn!(table, id = %id, error = %e, "update rejected by constraint");
                Ok(None)
            }
            Err(e) => Err(backend_error("error updating row", e)),
        }
    }

    fn delete(&self, table: &str, id: Uuid) -> Result<Option<Uuid>> {
        let changed = self
            .engine
            .execute(&sql::delete(table), [id.to_string()])
            .map_err(|e| backend_error("error deleting row", e))?;
        self.cache.clear(table);

        if changed > 0 {
            info!(table, id = %id, "row deleted");
            Ok(Some(id))
        } else {
            warn!(table, id = %id, "row to delete not found");
            Ok(None)
        }
    }

    fn get_one(&self, table: &str, schema: &Schema, id: Uuid) -> Result<Option<Value>> {
        let tags = Self::tags(schema);
        let rows = self
            .engine
            .select(&sql::get_one(table), &[SqlValue::Text(id.to_string())], |name| {
                tags.get(name).copied()
            })
            .map_err(|e| backend_error("error loading row", e))?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| Value::Object(nest_columns(row))))
    }

    fn find(&self, table: &str, schema: Arc<Schema>) -> Result<Box<dyn QueryPlan>> {
        Ok(Box::new(SqlitePlan::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.cache),
            table,
            &schema,
        )))
    }

    fn dump(&self, dir: &Path) -> Result<()> {
        let target = dir.join(DUMP_FILE);
        let result = (|| -> SqliteResult<()> {
            fs::create_dir_all(dir)?;
            if target.exists() {
                fs::remove_file(&target)?;
            }
            self.engine
                .execute("VACUUM INTO ?1", [&*target.to_string_lossy()])?;
            Ok(())
        })();
        result.map_err(|e| backend_error("error exporting database", e))?;
        info!(path = %target.display(), "database dumped");
        Ok(())
    }

    fn restore(&self, dir: &Path, drop: bool) -> Result<()> {
        let source = dir.join(DUMP_FILE);
        let result = (|| -> SqliteResult<()> {
            if !source.is_file() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found", source.display()),
                )
                .into());
            }
            if drop {
                self.engine.lock().restore(
                    DatabaseName::Main,
                    &source,
                    None::<fn(rusqlite::backup::Progress)>,
                )?;
                info!(path = %source.display(), "database replaced from dump");
            } else {
                self.merge_dump(&source)?;
            }
            self.invalidate_all()
        })();
        result.map_err(|e| backend_error("error importing database", e))
    }

    fn counters(&self) -> BackendCounters {
        BackendCounters {
            ddl_executions: self.ddl_executions.load(Ordering::Relaxed),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
        }
    }
}
