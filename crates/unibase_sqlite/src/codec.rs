//! Column value encoding.
//!
//! Identifiers are stored as hyphenated text, booleans as 0/1 and JSON
//! columns as JSON text. Decoding is driven by the declared storage tag of
//! the column so joined tables, whose schema is only known through
//! `PRAGMA table_info`, decode the same way as the queried table.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::{json, Value};
use unibase_core::ColumnType;

/// Quotes an identifier.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Encodes a JSON value for a column of type `ty`.
pub fn encode(ty: ColumnType, value: &Value) -> SqlValue {
    match (ty, value) {
        (_, Value::Null) => SqlValue::Null,
        (ColumnType::Json, v) => SqlValue::Text(v.to_string()),
        _ => encode_scalar(value),
    }
}

/// Encodes a filter operand.
pub fn encode_scalar(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Decodes a cell declared with storage tag `tag`.
pub fn decode(tag: Option<&str>, cell: ValueRef<'_>) -> Value {
    match (tag, cell) {
        (_, ValueRef::Null) => Value::Null,
        (Some(t), ValueRef::Integer(i)) if t.eq_ignore_ascii_case("boolean") => Value::Bool(i != 0),
        (Some(t), ValueRef::Text(text)) if t.eq_ignore_ascii_case("json") => {
            serde_json::from_slice(text)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(text).into_owned()))
        }
        (_, ValueRef::Integer(i)) => json!(i),
        (_, ValueRef::Real(f)) => json!(f),
        (_, ValueRef::Text(text)) => Value::String(String::from_utf8_lossy(text).into_owned()),
        (_, ValueRef::Blob(bytes)) => json!(bytes),
    }
}

/// Renders a bound value for logs.
pub fn render(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Integer(i) => i.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => format!("'{s}'"),
        SqlValue::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_by_column_type() {
        assert_eq!(encode(ColumnType::Boolean, &json!(true)), SqlValue::Integer(1));
        assert_eq!(encode(ColumnType::Integer, &json!(7)), SqlValue::Integer(7));
        assert_eq!(encode(ColumnType::Float, &json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(
            encode(ColumnType::Json, &json!(["a", 1])),
            SqlValue::Text("[\"a\",1]".into())
        );
        assert_eq!(encode(ColumnType::Json, &Value::Null), SqlValue::Null);
        assert_eq!(
            encode(ColumnType::Uuid, &json!("6f1c4a1e-8d7b-4a5e-9c2f-1b3d5e7f9a0b")),
            SqlValue::Text("6f1c4a1e-8d7b-4a5e-9c2f-1b3d5e7f9a0b".into())
        );
    }

    #[test]
    fn decodes_by_tag() {
        assert_eq!(decode(Some("boolean"), ValueRef::Integer(0)), json!(false));
        assert_eq!(decode(Some("JSON"), ValueRef::Text(b"{\"a\":1}")), json!({ "a": 1 }));
        assert_eq!(decode(Some("JSON"), ValueRef::Integer(5)), json!(5));
        assert_eq!(decode(Some("JSON"), ValueRef::Text(b"not json")), json!("not json"));
        assert_eq!(decode(Some("int"), ValueRef::Integer(3)), json!(3));
        assert_eq!(decode(None, ValueRef::Real(0.5)), json!(0.5));
        assert_eq!(decode(Some("GUID"), ValueRef::Null), Value::Null);
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote("Counter"), "\"Counter\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
