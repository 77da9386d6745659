//! Database façade.
//!
//! [`Database`] is the application context: it owns the active backend, the
//! schema registry, the event bus, the maintenance flag, statistics and the
//! maintenance task pool. Construct it once at startup and share it by
//! reference or `Arc`.
//!
//! Writes are stamped with metadata here, handed to the backend as flat JSON,
//! and published to listeners once the backend confirms them. Any failure
//! that is not a client validation error is logged and collapsed into
//! [`Error::Backend`] with the cause preserved.

use crate::archive;
use crate::backend::{Backend, BackendKind};
use crate::config::Config;
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, EventKind};
use crate::filter::Filter;
use crate::params::{Page, QueryParams};
use crate::record::{Model, ModelMeta, Stored, PATCH_EXCLUDE};
use crate::schema::Schema;
use crate::stats::{DatabaseStats, StatsSnapshot};
use crate::tasks::{TaskHandle, TaskPool};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct Inner {
    backend: Arc<dyn Backend>,
    config: Config,
    events: EventBus,
    registry: RwLock<HashMap<&'static str, Arc<Schema>>>,
    maintenance: AtomicBool,
    stats: Arc<DatabaseStats>,
}

/// Clears the maintenance flag when dropped, on success, error or panic.
struct MaintenanceGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> MaintenanceGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Maintenance)?;
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The database façade.
pub struct Database {
    inner: Arc<Inner>,
    tasks: TaskPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("backend", &self.inner.backend.kind())
            .field("database_string", &self.inner.config.database_string)
            .field("maintenance", &self.is_under_maintenance())
            .finish()
    }
}

impl Database {
    /// Wraps an opened backend.
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Result<Self> {
        let tasks = TaskPool::new(config.task_workers, config.task_queue)?;
        info!(
            backend = %backend.kind(),
            database = %config.database_string,
            "database opened"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                config,
                events: EventBus::new(),
                registry: RwLock::new(HashMap::new()),
                maintenance: AtomicBool::new(false),
                stats: Arc::new(DatabaseStats::new()),
            }),
            tasks,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Backend family.
    pub fn kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    /// Connectivity check.
    pub fn ok(&self) -> bool {
        self.inner.backend.ok()
    }

    /// Event listener registry.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Whether an export or import is running.
    pub fn is_under_maintenance(&self) -> bool {
        self.inner.maintenance.load(Ordering::Acquire)
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.inner.stats.snapshot();
        snapshot.events_published = self.inner.events.published();
        snapshot.listener_failures = self.inner.events.failures();
        snapshot.backend = self.inner.backend.counters();
        snapshot
    }

    /// Registers `T` under its own name, materializing its table.
    pub fn register<T: Model>(&self) -> Result<()> {
        let result = self.inner.schema_for::<T>().map(|_| ());
        self.inner.boundary("error creating database table", result)
    }

    /// Materializes a table named `table` with `T`'s schema. Idempotent.
    pub fn create_table<T: Model>(&self, table: &str) -> Result<()> {
        let inner = &self.inner;
        let schema = T::schema();
        let result = inner.backend.create_table(table, &schema);
        if result.is_ok() && table == T::NAME {
            inner.registry.write().entry(T::NAME).or_insert_with(|| Arc::new(schema));
        }
        inner.boundary("error creating database table", result)
    }

    /// Inserts a record.
    ///
    /// Stamps `created` (unless already set), stores the backend-assigned
    /// `seq` into `record` and publishes [`EventKind::Created`]. Returns
    /// `None`, leaving `record` untouched, when a unique field collides.
    pub fn create<T: Model>(&self, record: &mut Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let inner = &self.inner;
        inner.check_maintenance()?;
        let result = inner.create(record, actor);
        inner.boundary("error creating database record", result)
    }

    /// Replaces a stored record.
    ///
    /// `created` and `seq` are kept from storage and `updated` is stamped.
    /// Returns `None` if no record with this id exists.
    pub fn update<T: Model>(&self, record: &mut Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let inner = &self.inner;
        inner.check_maintenance()?;
        let result = inner.update(record, actor);
        inner.boundary("error updating database record", result)
    }

    /// Merges `fields` into the stored record and writes it back.
    ///
    /// Identity, sequence, audit stamps and permissions are never taken
    /// from `fields`. Returns the updated record, or `None` if it does not
    /// exist.
    pub fn patch<T: Model>(
        &self,
        id: Uuid,
        fields: &Map<String, Value>,
        actor: Option<Uuid>,
    ) -> Result<Option<Stored<T>>> {
        let inner = &self.inner;
        inner.check_maintenance()?;
        let result = inner.patch(id, fields, actor);
        inner.boundary("error updating database record", result)
    }

    /// Deletes a record by its id.
    pub fn delete<T: Model>(&self, record: &Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let inner = &self.inner;
        inner.check_maintenance()?;
        let result = inner.delete(record, actor);
        inner.boundary("error deleting database record", result)
    }

    /// Loads a record by id.
    pub fn get_one<T: Model>(&self, id: Uuid) -> Result<Option<Stored<T>>> {
        let inner = &self.inner;
        let result = inner.schema_for::<T>().and_then(|schema| {
            inner.stats.record_read();
            inner
                .backend
                .get_one(T::NAME, &schema, id)?
                .map(Stored::from_value)
                .transpose()
        });
        inner.boundary("error getting database record", result)
    }

    /// Starts a cursor over `T`, optionally seeded with an equality query.
    pub fn find<T: Model>(&self, query: Option<&Map<String, Value>>) -> Result<Cursor<T>> {
        let inner = &self.inner;
        let result = inner.find::<T>(query);
        inner.boundary("error finding database record", result)
    }

    /// Runs `params` against `T`: total count plus the requested window.
    pub fn query<T: Model>(&self, params: &QueryParams) -> Result<Page<T>> {
        let inner = &self.inner;
        let result = inner.find::<T>(None).and_then(|cursor| {
            params.execute(cursor, inner.config.performance_default_fetch_dict)
        });
        inner.boundary("error finding database record", result)
    }

    /// Counts several parameter sets concurrently, in input order.
    pub fn count_many<T: Model>(&self, params: &[QueryParams]) -> Result<Vec<u64>> {
        let inner = &self.inner;
        let result = thread::scope(|scope| {
            let handles: Vec<_> = params
                .iter()
                .map(|p| scope.spawn(move || p.apply(inner.find::<T>(None)?)?.count()))
                .collect();

            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(count) => count,
                    Err(_) => Err(Error::server("count worker panicked")),
                })
                .collect::<Result<Vec<u64>>>()
        });
        inner.boundary("error counting database records", result)
    }

    /// Dumps the database into `<export dir>/<app>_<timestamp>.tar.zst`.
    ///
    /// Writes fail with [`Error::Maintenance`] until the export finishes.
    pub fn export_database(&self) -> Result<PathBuf> {
        self.inner.export_database()
    }

    /// Restores an archive produced by [`Database::export_database`].
    pub fn import_database(&self, archive: &Path, drop: bool) -> Result<()> {
        self.inner.import_database(archive, drop)
    }

    /// Runs [`Database::export_database`] on the task pool.
    pub fn spawn_export(&self) -> Result<TaskHandle<PathBuf>> {
        let inner = Arc::clone(&self.inner);
        self.tasks.submit(move || inner.export_database())
    }

    /// Runs [`Database::import_database`] on the task pool.
    pub fn spawn_import(&self, archive: PathBuf, drop: bool) -> Result<TaskHandle<()>> {
        let inner = Arc::clone(&self.inner);
        self.tasks
            .submit(move || inner.import_database(&archive, drop))
    }
}

impl Inner {
    fn check_maintenance(&self) -> Result<()> {
        if self.maintenance.load(Ordering::Acquire) {
            warn!("write rejected, database is under maintenance");
            return Err(Error::Maintenance);
        }
        Ok(())
    }

    fn boundary<R>(&self, context: &str, result: Result<R>) -> Result<R> {
        result.map_err(|e| {
            if e.is_client_error() || matches!(e, Error::Maintenance) {
                debug!(error = %e, "{context}");
                return e;
            }
            self.stats.record_error();
            error!(error = %e, source = ?std::error::Error::source(&e), "{context}");
            e.at_boundary(context)
        })
    }

    fn schema_for<T: Model>(&self) -> Result<Arc<Schema>> {
        if let Some(schema) = self.registry.read().get(T::NAME) {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(T::schema());
        self.backend.create_table(T::NAME, &schema)?;
        Ok(Arc::clone(
            self.registry.write().entry(T::NAME).or_insert(schema),
        ))
    }

    fn publish<T: Model>(&self, schema: &Schema, kind: EventKind, record: &Stored<T>, actor: Option<Uuid>) {
        if schema.events() {
            self.events.publish(&Event::new(kind, record.clone(), actor));
        }
    }

    fn create<T: Model>(&self, record: &mut Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let schema = self.schema_for::<T>()?;
        let created = record.created;
        if record.created.timestamp == 0 {
            record.created = ModelMeta::now(actor);
        } else if record.created.user_id.is_none() {
            record.created.user_id = actor;
        }

        let outcome = record
            .to_value()
            .map(without_joined)
            .and_then(|value| self.backend.create(T::NAME, &schema, &value));

        match outcome {
            Ok(Some(seq)) => {
                record.seq = seq;
                self.stats.record_create();
                info!(table = T::NAME, id = %record.id, seq, "record created");
                self.publish(&schema, EventKind::Created, record, actor);
                Ok(Some(record.id))
            }
            Ok(None) => {
                record.created = created;
                self.stats.record_conflict();
                warn!(table = T::NAME, id = %record.id, "record not created, duplicate");
                Ok(None)
            }
            Err(e) => {
                record.created = created;
                Err(e)
            }
        }
    }

    fn update<T: Model>(&self, record: &mut Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let schema = self.schema_for::<T>()?;
        let Some(stored) = self.backend.get_one(T::NAME, &schema, record.id)? else {
            warn!(table = T::NAME, id = %record.id, "record not updated, not found");
            return Ok(None);
        };
        let stored = Stored::<T>::from_value(stored)?;

        let previous = (record.created, record.seq, record.updated);
        record.created = stored.created;
        record.seq = stored.seq;
        record.updated = ModelMeta::now(actor);

        let outcome = record
            .to_value()
            .map(without_joined)
            .and_then(|value| self.backend.update(T::NAME, &schema, &value));

        match outcome {
            Ok(Some(id)) => {
                self.stats.record_update();
                info!(table = T::NAME, %id, "record updated");
                self.publish(&schema, EventKind::Updated, record, actor);
                Ok(Some(id))
            }
            other => {
                (record.created, record.seq, record.updated) = previous;
                if matches!(other, Ok(None)) {
                    warn!(table = T::NAME, id = %record.id, "record not updated");
                }
                other
            }
        }
    }

    fn patch<T: Model>(
        &self,
        id: Uuid,
        fields: &Map<String, Value>,
        actor: Option<Uuid>,
    ) -> Result<Option<Stored<T>>> {
        let schema = self.schema_for::<T>()?;
        let Some(mut stored) = self.backend.get_one(T::NAME, &schema, id)? else {
            warn!(table = T::NAME, %id, "record not patched, not found");
            return Ok(None);
        };

        if let Value::Object(map) = &mut stored {
            for (key, value) in fields {
                if !PATCH_EXCLUDE.contains(&key.as_str()) {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        let mut record = Stored::<T>::from_value(stored)?;
        record.updated = ModelMeta::now(actor);

        let value = without_joined(record.to_value()?);
        match self.backend.update(T::NAME, &schema, &value)? {
            Some(_) => {
                self.stats.record_update();
                info!(table = T::NAME, %id, fields = fields.len(), "record patched");
                self.publish(&schema, EventKind::Updated, &record, actor);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn delete<T: Model>(&self, record: &Stored<T>, actor: Option<Uuid>) -> Result<Option<Uuid>> {
        let schema = self.schema_for::<T>()?;
        match self.backend.delete(T::NAME, record.id)? {
            Some(id) => {
                self.stats.record_delete();
                info!(table = T::NAME, %id, "record deleted");
                self.publish(&schema, EventKind::Deleted, record, actor);
                Ok(Some(id))
            }
            None => {
                warn!(table = T::NAME, id = %record.id, "record not deleted, not found");
                Ok(None)
            }
        }
    }

    fn find<T: Model>(&self, query: Option<&Map<String, Value>>) -> Result<Cursor<T>> {
        let schema = self.schema_for::<T>()?;
        let plan = self.backend.find(T::NAME, Arc::clone(&schema))?;
        let cursor = Cursor::new(plan, schema, Arc::clone(&self.stats));
        match query.map(Filter::from_query).transpose()?.flatten() {
            Some(filter) => cursor.filter(filter),
            None => Ok(cursor),
        }
    }

    fn export_database(&self) -> Result<PathBuf> {
        let result = MaintenanceGuard::enter(&self.maintenance).and_then(|_guard| {
            let dir = &self.config.database_export_directory;
            fs::create_dir_all(dir)?;

            let staging = tempfile::tempdir()?;
            self.backend.dump(staging.path())?;

            let path = archive::archive_path(dir, &self.config.app_name);
            archive::pack(staging.path(), &path)?;
            self.stats.record_export();
            info!(archive = %path.display(), "database exported");
            Ok(path)
        });
        self.boundary("error exporting database", result)
    }

    fn import_database(&self, archive: &Path, drop: bool) -> Result<()> {
        let result = MaintenanceGuard::enter(&self.maintenance).and_then(|_guard| {
            let staging = tempfile::tempdir()?;
            let root = archive::unpack(archive, staging.path())?;
            self.backend.restore(&root, drop)?;

            self.registry.write().clear();
            self.stats.record_import();
            info!(archive = %archive.display(), drop, "database imported");
            Ok(())
        });
        self.boundary("error importing database", result)
    }
}

fn without_joined(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.remove("joined_collections");
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{Join, QueryPlan, SortOrder};
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::sync::mpsc::{self, Receiver, Sender};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Setting {
        key: String,
        value: i64,
    }

    impl Model for Setting {
        const NAME: &'static str = "Setting";
        fn schema() -> Schema {
            Schema::builder().text("key").integer("value").unique("key").build()
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quiet {
        n: i64,
    }

    impl Model for Quiet {
        const NAME: &'static str = "Quiet";
        fn schema() -> Schema {
            Schema::builder().integer("n").without_events().build()
        }
    }

    /// Map-backed backend; `dump` can be made to block until released.
    #[derive(Default)]
    struct StubBackend {
        tables: Mutex<BTreeMap<String, BTreeMap<Uuid, Value>>>,
        seq: Mutex<i64>,
        ddl: Mutex<u64>,
        dump_gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
        fail_dump: AtomicBool,
    }

    struct StubPlan(Vec<Value>);

    impl QueryPlan for StubPlan {
        fn collection(&self) -> &str {
            "stub"
        }
        fn filter(&mut self, _: &Filter) -> Result<()> {
            Ok(())
        }
        fn sort(&mut self, _: &str, _: SortOrder) -> Result<()> {
            Ok(())
        }
        fn limit(&mut self, _: u64, _: Option<u64>) -> Result<()> {
            Ok(())
        }
        fn join(&mut self, _: &Join) -> Result<()> {
            Ok(())
        }
        fn count(&self) -> Result<u64> {
            Ok(self.0.len() as u64)
        }
        fn fetch(&self) -> Result<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    impl Backend for StubBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Document
        }
        fn ok(&self) -> bool {
            true
        }
        fn create_table(&self, table: &str, _: &Schema) -> Result<()> {
            let mut tables = self.tables.lock();
            if !tables.contains_key(table) {
                tables.insert(table.to_string(), BTreeMap::new());
                *self.ddl.lock() += 1;
            }
            Ok(())
        }
        fn create(&self, table: &str, _: &Schema, record: &Value) -> Result<Option<i64>> {
            let mut tables = self.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            if rows.values().any(|r| r.get("key").is_some() && r.get("key") == record.get("key")) {
                return Ok(None);
            }
            let id: Uuid = serde_json::from_value(record["id"].clone())?;
            let mut seq = self.seq.lock();
            *seq += 1;
            let mut record = record.clone();
            record["seq"] = Value::from(*seq);
            rows.insert(id, record);
            Ok(Some(*seq))
        }
        fn update(&self, table: &str, _: &Schema, record: &Value) -> Result<Option<Uuid>> {
            let id: Uuid = serde_json::from_value(record["id"].clone())?;
            let mut tables = self.tables.lock();
            let Some(row) = tables.get_mut(table).and_then(|t| t.get_mut(&id)) else {
                return Ok(None);
            };
            *row = record.clone();
            Ok(Some(id))
        }
        fn delete(&self, table: &str, id: Uuid) -> Result<Option<Uuid>> {
            Ok(self
                .tables
                .lock()
                .get_mut(table)
                .and_then(|t| t.remove(&id))
                .map(|_| id))
        }
        fn get_one(&self, table: &str, _: &Schema, id: Uuid) -> Result<Option<Value>> {
            Ok(self.tables.lock().get(table).and_then(|t| t.get(&id)).cloned())
        }
        fn find(&self, table: &str, _: Arc<Schema>) -> Result<Box<dyn QueryPlan>> {
            let rows = self
                .tables
                .lock()
                .get(table)
                .map(|t| t.values().cloned().collect())
                .unwrap_or_default();
            Ok(Box::new(StubPlan(rows)))
        }
        fn dump(&self, dir: &Path) -> Result<()> {
            if let Some((started, release)) = self.dump_gate.lock().take() {
                let _ = started.send(());
                let _ = release.recv();
            }
            if self.fail_dump.load(Ordering::Relaxed) {
                return Err(Error::server("dump tool missing"));
            }
            let tables = self.tables.lock();
            fs::write(dir.join("tables.json"), serde_json::to_vec(&*tables)?)?;
            Ok(())
        }
        fn restore(&self, dir: &Path, drop: bool) -> Result<()> {
            let data: BTreeMap<String, BTreeMap<Uuid, Value>> =
                serde_json::from_slice(&fs::read(dir.join("tables.json"))?)?;
            let mut tables = self.tables.lock();
            if drop {
                tables.clear();
            }
            for (name, rows) in data {
                tables.entry(name).or_default().extend(rows);
            }
            Ok(())
        }
    }

    fn open() -> (Database, Arc<StubBackend>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(StubBackend::default());
        let config = Config::new()
            .database_string("memory://")
            .export_directory(dir.path().join("dumps"));
        let db = Database::new(backend.clone(), config).unwrap();
        (db, backend, dir)
    }

    fn setting(key: &str, value: i64) -> Stored<Setting> {
        Stored::new(Setting {
            key: key.into(),
            value,
        })
    }

    #[test]
    fn create_assigns_seq_and_publishes() {
        let (db, _, _dir) = open();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        db.events()
            .subscribe::<Setting, _>("audit", EventKind::Created, move |e| {
                s.lock().push((e.record.seq, e.actor));
                Ok(())
            });

        let actor = Uuid::new_v4();
        let mut record = setting("a", 1);
        assert_eq!(db.create(&mut record, Some(actor)).unwrap(), Some(record.id));
        assert_eq!(record.seq, 1);
        assert_eq!(record.created.user_id, Some(actor));
        assert_eq!(*seen.lock(), vec![(1, Some(actor))]);

        let back = db.get_one::<Setting>(record.id).unwrap().unwrap();
        assert_eq!(back, record);
        assert_eq!(db.stats().creates, 1);
    }

    #[test]
    fn duplicate_create_returns_none() {
        let (db, _, _dir) = open();
        let mut first = setting("k", 1);
        let mut second = setting("k", 2);
        let before = second.clone();

        assert!(db.create(&mut first, None).unwrap().is_some());
        assert_eq!(db.create(&mut second, None).unwrap(), None);
        assert_eq!(second, before);
        assert_eq!(db.get_one::<Setting>(first.id).unwrap().unwrap().data.value, 1);
        assert_eq!(db.stats().conflicts, 1);
    }

    #[test]
    fn update_keeps_created_and_seq() {
        let (db, _, _dir) = open();
        let mut record = setting("a", 1);
        db.create(&mut record, None).unwrap();
        let created = record.created;

        let mut edited = record.clone();
        edited.data.value = 5;
        edited.created = ModelMeta::default();
        edited.seq = 99;
        let user = Uuid::new_v4();
        assert_eq!(db.update(&mut edited, Some(user)).unwrap(), Some(record.id));

        let back = db.get_one::<Setting>(record.id).unwrap().unwrap();
        assert_eq!(back.data.value, 5);
        assert_eq!(back.created, created);
        assert_eq!(back.seq, record.seq);
        assert_eq!(back.updated.user_id, Some(user));
    }

    #[test]
    fn update_and_delete_missing_return_none() {
        let (db, _, _dir) = open();
        let mut ghost = setting("ghost", 0);
        assert_eq!(db.update(&mut ghost, None).unwrap(), None);
        assert_eq!(db.delete(&ghost, None).unwrap(), None);
        assert!(db.get_one::<Setting>(ghost.id).unwrap().is_none());
    }

    #[test]
    fn patch_merges_allowed_fields() {
        let (db, _, _dir) = open();
        let mut record = setting("a", 1);
        db.create(&mut record, None).unwrap();

        let fields = serde_json::json!({
            "value": 42,
            "note": "patched",
            "seq": 1000,
            "id": Uuid::new_v4(),
            "created": {"timestamp": 1, "user_id": null},
        });
        let patched = db
            .patch::<Setting>(record.id, fields.as_object().unwrap(), None)
            .unwrap()
            .unwrap();

        assert_eq!(patched.id, record.id);
        assert_eq!(patched.seq, record.seq);
        assert_eq!(patched.created, record.created);
        assert_eq!(patched.data.value, 42);
        assert_eq!(patched.note, "patched");
        assert!(patched.updated.timestamp > 0);
        assert!(db.patch::<Setting>(Uuid::new_v4(), &Map::new(), None).unwrap().is_none());
    }

    #[test]
    fn delete_publishes_deleted() {
        let (db, _, _dir) = open();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&deleted);
        db.events()
            .subscribe::<Setting, _>("gc", EventKind::Deleted, move |e| {
                d.lock().push(e.record.id);
                Ok(())
            });

        let mut record = setting("a", 1);
        db.create(&mut record, None).unwrap();
        assert_eq!(db.delete(&record, None).unwrap(), Some(record.id));
        assert_eq!(*deleted.lock(), vec![record.id]);
    }

    #[test]
    fn schema_without_events_is_silent() {
        let (db, _, _dir) = open();
        db.events()
            .subscribe::<Quiet, _>("l", EventKind::Created, |_| Err("should not run".into()));
        let mut record = Stored::new(Quiet { n: 1 });
        db.create(&mut record, None).unwrap();
        assert_eq!(db.stats().events_published, 0);
    }

    #[test]
    fn failing_listener_does_not_fail_write() {
        let (db, _, _dir) = open();
        db.events()
            .subscribe::<Setting, _>("bad", EventKind::Created, |_| Err("listener down".into()));
        let mut record = setting("a", 1);
        assert!(db.create(&mut record, None).unwrap().is_some());
        assert_eq!(db.stats().listener_failures, 1);
    }

    #[test]
    fn registration_is_cached() {
        let (db, backend, _dir) = open();
        db.register::<Setting>().unwrap();
        db.register::<Setting>().unwrap();
        db.create_table::<Setting>("Setting").unwrap();
        let mut record = setting("a", 1);
        db.create(&mut record, None).unwrap();
        assert_eq!(*backend.ddl.lock(), 1);
    }

    #[test]
    fn find_with_query_and_count_many() {
        let (db, _, _dir) = open();
        for (k, v) in [("a", 1), ("b", 2)] {
            db.create(&mut setting(k, v), None).unwrap();
        }
        let cursor = db.find::<Setting>(None).unwrap();
        assert_eq!(cursor.count().unwrap(), 2);

        let counts = db
            .count_many::<Setting>(&[QueryParams::default(), QueryParams::default()])
            .unwrap();
        assert_eq!(counts, vec![2, 2]);

        let page = db.query::<Setting>(&QueryParams::default()).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.items.len(), 2);
    }

    #[test]
    fn maintenance_gates_writes_during_export() {
        let (db, backend, _dir) = open();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *backend.dump_gate.lock() = Some((started_tx, release_rx));

        let handle = db.spawn_export().unwrap();
        started_rx.recv().unwrap();

        assert!(db.is_under_maintenance());
        let err = db.create(&mut setting("during", 1), None).unwrap_err();
        assert!(matches!(err, Error::Maintenance));
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(matches!(db.export_database(), Err(Error::Maintenance)));

        release_tx.send(()).unwrap();
        let path = handle.wait().unwrap();
        assert!(path.exists());
        assert!(!db.is_under_maintenance());
        assert!(db.create(&mut setting("after", 1), None).unwrap().is_some());
    }

    #[test]
    fn failed_export_clears_maintenance() {
        let (db, backend, _dir) = open();
        backend.fail_dump.store(true, Ordering::Relaxed);

        let err = db.export_database().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.to_string().contains("dump tool missing"));
        assert!(!db.is_under_maintenance());
        assert!(db.create(&mut setting("after", 1), None).unwrap().is_some());
    }

    #[test]
    fn export_import_round_trip() {
        let (db, _, _dir) = open();
        let mut record = setting("a", 1);
        db.create(&mut record, None).unwrap();
        let archive = db.export_database().unwrap();

        db.delete(&record, None).unwrap();
        assert!(db.get_one::<Setting>(record.id).unwrap().is_none());

        db.import_database(&archive, true).unwrap();
        assert_eq!(db.get_one::<Setting>(record.id).unwrap().unwrap(), record);
        assert_eq!(db.stats().imports, 1);
    }
}
