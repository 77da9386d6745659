//! Serialized access to the single SQLite connection.

use crate::codec::{decode, render};
use crate::error::SqliteResult;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Params};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Location that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// One decoded row: `(column name, value)` in select order.
pub(crate) type Row = Vec<(String, Value)>;

/// The connection plus the `PRAGMA table_info` cache.
///
/// Every statement runs under the connection lock; SQLite is used with one
/// writer at a time.
pub(crate) struct Engine {
    conn: Mutex<Connection>,
    table_info: Mutex<HashMap<String, Vec<(String, String)>>>,
}

impl Engine {
    pub(crate) fn open(location: &str) -> SqliteResult<Self> {
        let conn = if location.is_empty() || location == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(location)?
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(location, "sqlite connection opened");
        Ok(Self {
            conn: Mutex::new(conn),
            table_info: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Runs a statement and returns the number of changed rows.
    pub(crate) fn execute<P: Params>(&self, sql: &str, params: P) -> SqliteResult<usize> {
        debug!(sql, "running sql");
        Ok(self.conn.lock().execute(sql, params)?)
    }

    /// Runs a positional insert and returns the new rowid.
    pub(crate) fn insert(&self, sql: &str, values: &[SqlValue]) -> SqliteResult<i64> {
        debug!(sql, values = %render_all(values), "running sql");
        let conn = self.conn.lock();
        conn.execute(sql, params_from_iter(values.iter()))?;
        Ok(conn.last_insert_rowid())
    }

    /// Runs a query and decodes each cell with the storage tag `tag_of`
    /// returns for its column name.
    pub(crate) fn select<'a, F>(&self, sql: &str, values: &[SqlValue], tag_of: F) -> SqliteResult<Vec<Row>>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        debug!(sql, values = %render_all(values), "running sql");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(values.iter()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                cells.push((name.clone(), decode(tag_of(name), row.get_ref(i)?)));
            }
            out.push(cells);
        }
        Ok(out)
    }

    /// Runs a single-integer query.
    pub(crate) fn scalar(&self, sql: &str, values: &[SqlValue]) -> SqliteResult<i64> {
        debug!(sql, values = %render_all(values), "running sql");
        let conn = self.conn.lock();
        Ok(conn.query_row(sql, params_from_iter(values.iter()), |row| row.get(0))?)
    }

    /// `(name, declared type)` of each column of `table`; empty when the table
    /// does not exist. Non-empty results are cached.
    pub(crate) fn table_info(&self, table: &str) -> SqliteResult<Vec<(String, String)>> {
        if let Some(info) = self.table_info.lock().get(table) {
            return Ok(info.clone());
        }

        let info = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT name, type FROM pragma_table_info(?1)")?;
            let rows = stmt.query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<(String, String)>, _>>()?
        };
        if !info.is_empty() {
            self.table_info.lock().insert(table.to_string(), info.clone());
        }
        Ok(info)
    }

    /// Drops cached table metadata.
    pub(crate) fn forget_tables(&self) {
        self.table_info.lock().clear();
    }

    /// Names of the user tables.
    pub(crate) fn tables(&self) -> SqliteResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get(0))?;
        Ok(names.collect::<Result<Vec<String>, _>>()?)
    }
}

pub(crate) fn render_all(values: &[SqlValue]) -> String {
    values.iter().map(render).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_info_of_missing_table_is_empty() {
        let engine = Engine::open(IN_MEMORY).unwrap();
        assert!(engine.table_info("Nope").unwrap().is_empty());

        engine
            .execute("CREATE TABLE \"Nope\" (id GUID, flag boolean)", [])
            .unwrap();
        let info = engine.table_info("Nope").unwrap();
        assert_eq!(
            info,
            vec![
                ("id".to_string(), "GUID".to_string()),
                ("flag".to_string(), "boolean".to_string())
            ]
        );
        assert_eq!(engine.tables().unwrap(), vec!["Nope".to_string()]);
    }

    #[test]
    fn select_decodes_with_tags() {
        let engine = Engine::open(IN_MEMORY).unwrap();
        engine
            .execute("CREATE TABLE t (seq INTEGER PRIMARY KEY, flag boolean, data JSON)", [])
            .unwrap();
        let seq = engine
            .insert(
                "INSERT INTO t (flag, data) VALUES (?1, ?2)",
                &[SqlValue::Integer(1), SqlValue::Text("[1,2]".into())],
            )
            .unwrap();
        assert_eq!(seq, 1);

        let rows = engine
            .select("SELECT flag, data FROM t", &[], |name| match name {
                "flag" => Some("boolean"),
                "data" => Some("JSON"),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            rows,
            vec![vec![
                ("flag".to_string(), json!(true)),
                ("data".to_string(), json!([1, 2]))
            ]]
        );
        assert_eq!(engine.scalar("SELECT COUNT(*) FROM t", &[]).unwrap(), 1);
    }
}
