//! SQL statement generation from projected columns.

use crate::codec::{encode, quote};
use rusqlite::types::Value as SqlValue;
use unibase_core::schema::SEPARATOR;
use unibase_core::{Column, Schema};

/// Column excluded from inserts and updates; assigned by the engine.
pub const SEQUENCE_COLUMN: &str = "seq";
/// Identifier column.
pub const ID_COLUMN: &str = "id";
/// Default sort column, newest records first.
pub const DEFAULT_SORT: &str = "created__timestamp";
/// Prefix of joined column aliases.
pub const JOINED_PREFIX: &str = "joined_collections";

/// `CREATE TABLE IF NOT EXISTS` for the projected columns.
///
/// `id` is `NOT NULL UNIQUE`, `seq` is the integer primary key and declared
/// unique fields carry `UNIQUE`.
pub fn create_table(table: &str, columns: &[Column]) -> String {
    let definitions = columns
        .iter()
        .map(|c| {
            let mut def = match c.name.as_str() {
                ID_COLUMN => format!("{} {} NOT NULL UNIQUE", quote(&c.name), c.storage_tag()),
                SEQUENCE_COLUMN => format!("{} INTEGER PRIMARY KEY", quote(&c.name)),
                _ => format!("{} {}", quote(&c.name), c.storage_tag()),
            };
            if c.unique && c.name != ID_COLUMN {
                def.push_str(" UNIQUE");
            }
            format!("\n  {def}")
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("CREATE TABLE IF NOT EXISTS {} ({definitions}\n);", quote(table))
}

/// `CREATE INDEX IF NOT EXISTS` statements for plain and compound indexes.
pub fn create_indexes(table: &str, schema: &Schema) -> Vec<String> {
    let plain = schema
        .index()
        .iter()
        .filter(|p| !schema.is_unique(p))
        .map(|p| vec![p.clone()]);
    plain
        .chain(schema.compound_index().iter().cloned())
        .map(|paths| {
            let columns: Vec<String> = paths.iter().map(|p| column_name(p)).collect();
            let name = format!("idx_{table}_{}", columns.join("_"));
            let list = columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ");
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({list});",
                quote(&name),
                quote(table)
            )
        })
        .collect()
}

/// Positional insert of every column but `seq`.
pub fn insert(table: &str, columns: &[Column]) -> (String, Vec<SqlValue>) {
    let used: Vec<&Column> = columns
        .iter()
        .filter(|c| c.name != SEQUENCE_COLUMN)
        .collect();
    let names = used.iter().map(|c| quote(&c.name)).collect::<Vec<_>>().join(", ");
    let slots = (1..=used.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let values = used.iter().map(|c| bind(c)).collect();
    (
        format!("INSERT INTO {} ({names}) VALUES ({slots});", quote(table)),
        values,
    )
}

/// Named-parameter update of every column but `id` and `seq`, keyed by `id`.
pub fn update(table: &str, columns: &[Column]) -> (String, Vec<(String, SqlValue)>) {
    let mut assignments = Vec::new();
    let mut values = Vec::new();
    for column in columns {
        let param = format!(":{}", column.name);
        if column.name != ID_COLUMN && column.name != SEQUENCE_COLUMN {
            assignments.push(format!("{} = {param}", quote(&column.name)));
        }
        if column.name != SEQUENCE_COLUMN {
            values.push((param, bind(column)));
        }
    }
    (
        format!(
            "UPDATE {} SET {} WHERE {} = :{ID_COLUMN};",
            quote(table),
            assignments.join(", "),
            quote(ID_COLUMN)
        ),
        values,
    )
}

/// Delete by id.
pub fn delete(table: &str) -> String {
    format!("DELETE FROM {} WHERE {} = ?1;", quote(table), quote(ID_COLUMN))
}

/// Point lookup by id.
pub fn get_one(table: &str) -> String {
    format!("SELECT * FROM {} WHERE {} = ?1;", quote(table), quote(ID_COLUMN))
}

/// Column name of a dotted field path.
pub fn column_name(path: &str) -> String {
    path.replace('.', SEPARATOR)
}

/// Alias of a joined column: `joined_collections__<output>__<column>`.
pub fn joined_alias(output: &str, column: &str) -> String {
    [JOINED_PREFIX, &column_name(output), column].join(SEPARATOR)
}

fn bind(column: &Column) -> SqlValue {
    column
        .value
        .as_ref()
        .map(|v| encode(column.ty, v))
        .unwrap_or(SqlValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unibase_core::schema::{project, project_instance};

    fn schema() -> Schema {
        Schema::builder()
            .text("key")
            .nested("address", |b| b.text("city"))
            .json("tags")
            .unique("key")
            .index("address.city")
            .compound_index(&["key", "address.city"])
            .build()
    }

    #[test]
    fn table_ddl() {
        let sql = create_table("Setting", &project(&schema()));
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"Setting\" ("));
        assert!(sql.contains("\"id\" GUID NOT NULL UNIQUE"));
        assert!(sql.contains("\"seq\" INTEGER PRIMARY KEY"));
        assert!(sql.contains("\"key\" text UNIQUE"));
        assert!(sql.contains("\"address__city\" text,"));
        assert!(sql.contains("\"tags\" JSON\n);"));
    }

    #[test]
    fn index_ddl() {
        let sql = create_indexes("Setting", &schema());
        assert_eq!(
            sql,
            vec![
                "CREATE INDEX IF NOT EXISTS \"idx_Setting_address__city\" ON \"Setting\" (\"address__city\");",
                "CREATE INDEX IF NOT EXISTS \"idx_Setting_key_address__city\" ON \"Setting\" (\"key\", \"address__city\");",
            ]
        );
    }

    #[test]
    fn insert_skips_sequence() {
        let record = json!({ "id": "x", "seq": 9, "key": "k", "tags": [1] });
        let (sql, values) = insert("Setting", &project_instance(&schema(), &record));
        assert!(!sql.contains("\"seq\""));
        assert_eq!(values.len(), project(&schema()).len() - 1);
        assert_eq!(values[0], SqlValue::Text("x".into()));
        assert_eq!(values.last(), Some(&SqlValue::Text("[1]".into())));
    }

    #[test]
    fn update_binds_id_but_does_not_set_it() {
        let record = json!({ "id": "x", "key": "k" });
        let (sql, values) = update("Setting", &project_instance(&schema(), &record));
        assert!(sql.starts_with("UPDATE \"Setting\" SET \"owner\" = :owner"));
        assert!(sql.ends_with("WHERE \"id\" = :id;"));
        assert!(!sql.contains("\"seq\" ="));
        assert!(values.iter().any(|(k, v)| k == ":id" && *v == SqlValue::Text("x".into())));
        assert!(values.iter().all(|(k, _)| k != ":seq"));
    }

    #[test]
    fn aliases() {
        assert_eq!(column_name("address.city"), "address__city");
        assert_eq!(joined_alias("children", "name"), "joined_collections__children__name");
    }
}
