//! Column projection: flattening a schema into an ordered column list.

use super::{Field, FieldType, Schema};
use serde_json::{Map, Value};

/// Separator joining nested field names into one column name.
pub const SEPARATOR: &str = "__";

static NULL: Value = Value::Null;

/// Storage type of a flattened column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Text.
    Text,
    /// Boolean.
    Boolean,
    /// Identifier, stored as its hyphenated text form.
    Uuid,
    /// Structured value encoded as JSON text.
    Json,
}

impl ColumnType {
    /// Storage tag for this type.
    pub fn storage_tag(self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Float => "float",
            Self::Text => "text",
            Self::Boolean => "boolean",
            Self::Uuid => "GUID",
            Self::Json => "JSON",
        }
    }
}

/// One flattened column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Namespaced name, e.g. `address__city`.
    pub name: String,
    /// Field path from the record root.
    pub path: Vec<String>,
    /// Storage type.
    pub ty: ColumnType,
    /// Declared unique.
    pub unique: bool,
    /// Value taken from an instance, `None` for bare projections.
    pub value: Option<Value>,
}

impl Column {
    /// Dotted path, e.g. `address.city`.
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }

    /// Storage tag of the column type.
    pub fn storage_tag(&self) -> &'static str {
        self.ty.storage_tag()
    }
}

/// Projects a schema into its ordered column list.
///
/// The order is the declaration order with nested fields expanded in place,
/// so the same schema always yields the same list.
pub fn project(schema: &Schema) -> Vec<Column> {
    let mut out = Vec::new();
    flatten(schema, schema.fields(), &mut Vec::new(), None, &mut out);
    out
}

/// Projects a schema and attaches the values found in `instance`.
///
/// Missing values project as `Value::Null`.
pub fn project_instance(schema: &Schema, instance: &Value) -> Vec<Column> {
    let mut out = Vec::new();
    flatten(
        schema,
        schema.fields(),
        &mut Vec::new(),
        Some(instance),
        &mut out,
    );
    out
}

fn flatten(
    schema: &Schema,
    fields: &[Field],
    prefix: &mut Vec<String>,
    instance: Option<&Value>,
    out: &mut Vec<Column>,
) {
    for field in fields {
        prefix.push(field.name.clone());
        let value = instance.map(|v| v.get(&field.name).unwrap_or(&NULL));

        match &field.ty {
            FieldType::Nested(children) => flatten(schema, children, prefix, value, out),
            scalar => {
                if let Some(ty) = scalar.column_type() {
                    let dotted = prefix.join(".");
                    out.push(Column {
                        name: prefix.join(SEPARATOR),
                        path: prefix.clone(),
                        ty,
                        unique: schema.is_unique(&dotted),
                        value: value.cloned(),
                    });
                }
            }
        }
        prefix.pop();
    }
}

/// Rebuilds a nested object from `(column name, value)` pairs.
pub fn nest_columns<I>(columns: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = Map::new();
    for (name, value) in columns {
        let parts: Vec<&str> = name.split(SEPARATOR).collect();
        insert_path(&mut root, &parts, value);
    }
    root
}

fn insert_path(map: &mut Map<String, Value>, parts: &[&str], value: Value) {
    match parts {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let entry = map
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::builder()
            .text("key")
            .nested("address", |b| b.text("city").nested("geo", |g| g.float("lat")))
            .json("tags")
            .unique("key")
            .unique("address.city")
            .build()
    }

    #[test]
    fn flattens_nested_fields() {
        let columns = project(&schema());
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

        assert_eq!(names[0], "id");
        assert!(names.contains(&"created__timestamp"));
        assert!(names.contains(&"permissions__group__read"));
        assert_eq!(
            &names[names.len() - 4..],
            &["key", "address__city", "address__geo__lat", "tags"]
        );
    }

    #[test]
    fn storage_tags_and_unique() {
        let columns = project(&schema());
        let by_name = |n: &str| columns.iter().find(|c| c.name == n).unwrap();

        assert_eq!(by_name("id").storage_tag(), "GUID");
        assert_eq!(by_name("seq").storage_tag(), "int");
        assert_eq!(by_name("tags").storage_tag(), "JSON");
        assert_eq!(by_name("address__geo__lat").storage_tag(), "float");
        assert!(by_name("key").unique);
        assert!(by_name("address__city").unique);
        assert!(!by_name("tags").unique);
        assert_eq!(by_name("address__city").dotted(), "address.city");
    }

    #[test]
    fn instance_values() {
        let instance = json!({
            "key": "k1",
            "address": {"city": "Oslo"},
            "tags": ["a", "b"],
        });
        let columns = project_instance(&schema(), &instance);
        let value = |n: &str| {
            columns
                .iter()
                .find(|c| c.name == n)
                .and_then(|c| c.value.clone())
                .unwrap()
        };

        assert_eq!(value("key"), json!("k1"));
        assert_eq!(value("address__city"), json!("Oslo"));
        assert_eq!(value("address__geo__lat"), Value::Null);
        assert_eq!(value("tags"), json!(["a", "b"]));
    }

    #[test]
    fn nest_inverts_flattening() {
        let nested = nest_columns(vec![
            ("key".to_string(), json!("k")),
            ("address__city".to_string(), json!("Oslo")),
            ("address__geo__lat".to_string(), json!(1.5)),
        ]);
        assert_eq!(
            Value::Object(nested),
            json!({"key": "k", "address": {"city": "Oslo", "geo": {"lat": 1.5}}})
        );
    }

    proptest! {
        #[test]
        fn projection_is_deterministic(names in proptest::collection::btree_set("[a-z]{1,8}", 1..8)) {
            let build = || names
                .iter()
                .fold(Schema::builder(), |b, n| b.text(format!("f_{n}")))
                .build();
            let first = project(&build());
            let second = project(&build());
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), project(&Schema::builder().build()).len() + names.len());
        }
    }
}
