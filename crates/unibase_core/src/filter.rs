//! Portable filter trees.
//!
//! A filter is either a leaf `[field, operator, value]` or a one-key
//! composite `{"AND": [..]}` / `{"OR": [..]}` holding a non-empty list of
//! subtrees. Filters are parsed and validated here, before any backend sees
//! them; each backend lowers the validated tree into its native predicate.
//!
//! ```rust,ignore
//! let filter = Filter::parse(&json!({"OR": [
//!     ["count", "==", 1],
//!     ["count", "==", 10],
//! ]}))?;
//! ```

use crate::error::{Error, Result, ValidationError};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `regex`: case-insensitive contains/pattern match.
    Regex,
}

impl Operator {
    /// Parses an operator token.
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Ge,
            "<=" => Self::Le,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "regex" => Self::Regex,
            _ => return None,
        })
    }

    /// The operator token.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf value. UUID-shaped strings are coerced to identifiers.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Identifier.
    Uuid(Uuid),
    /// Any other JSON value.
    Json(Value),
}

impl FilterValue {
    /// Builds a value, coercing UUID-shaped strings.
    pub fn coerce(value: Value) -> Self {
        match &value {
            Value::String(s) if looks_like_uuid(s) => match Uuid::parse_str(s) {
                Ok(id) => Self::Uuid(id),
                Err(_) => Self::Json(value),
            },
            _ => Self::Json(value),
        }
    }

    /// JSON form; identifiers render as their hyphenated string.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Uuid(id) => Value::String(id.to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Text form used by substring matching.
    pub fn as_text(&self) -> String {
        match self {
            Self::Uuid(id) => id.to_string(),
            Self::Json(Value::String(s)) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }
}

fn looks_like_uuid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

/// A validated `[field, operator, value]` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Dotted field path.
    pub field: String,
    /// Operator.
    pub op: Operator,
    /// Comparison value.
    pub value: FilterValue,
}

/// A validated filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Leaf comparison.
    Condition(Condition),
    /// All subtrees must match.
    And(Vec<Filter>),
    /// At least one subtree must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Builds a leaf, validating the field name.
    pub fn condition(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Result<Self> {
        let field = field.into();
        validate_field_name(&field)?;
        Ok(Self::Condition(Condition {
            field,
            op,
            value: FilterValue::coerce(value.into()),
        }))
    }

    /// Conjunction of `filters`.
    pub fn and(filters: Vec<Filter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::filter("AND requires at least one condition"));
        }
        Ok(Self::And(filters))
    }

    /// Disjunction of `filters`.
    pub fn or(filters: Vec<Filter>) -> Result<Self> {
        if filters.is_empty() {
            return Err(Error::filter("OR requires at least one condition"));
        }
        Ok(Self::Or(filters))
    }

    /// Equality conjunction from a flat `field -> value` map, `None` if empty.
    pub fn from_query(query: &Map<String, Value>) -> Result<Option<Self>> {
        let mut leaves = query
            .iter()
            .map(|(k, v)| Self::condition(k.clone(), Operator::Eq, v.clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(match leaves.len() {
            0 => None,
            1 => leaves.pop(),
            _ => Some(Self::And(leaves)),
        })
    }

    /// Parses a JSON filter tree.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Array(items) => parse_leaf(items, value),
            Value::Object(map) => {
                if map.len() != 1 {
                    return Err(Error::filter(format!(
                        "composite filter needs exactly one key, got {value}"
                    )));
                }
                let Some((key, body)) = map.iter().next() else {
                    return Err(Error::filter("empty composite filter"));
                };
                let Value::Array(children) = body else {
                    return Err(Error::filter(format!("{key} body must be a list: {body}")));
                };
                let children = children
                    .iter()
                    .map(Self::parse)
                    .collect::<Result<Vec<_>>>()?;
                match key.as_str() {
                    "AND" => Self::and(children),
                    "OR" => Self::or(children),
                    other => Err(Error::filter(format!("unknown filter key: {other}"))),
                }
            }
            other => Err(Error::filter(format!("bad filter node: {other}"))),
        }
    }

    /// Field paths referenced by the tree, in first-seen order.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Condition(c) => {
                if !out.contains(&c.field.as_str()) {
                    out.push(&c.field);
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
        }
    }

    /// Renders back into the JSON tree form.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Condition(c) => Value::Array(vec![
                Value::String(c.field.clone()),
                Value::String(c.op.as_str().to_string()),
                c.value.to_json(),
            ]),
            Self::And(children) => {
                serde_json::json!({ "AND": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
            Self::Or(children) => {
                serde_json::json!({ "OR": children.iter().map(Self::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::parse(&value)
    }
}

fn parse_leaf(items: &[Value], leaf: &Value) -> Result<Filter> {
    let [field, op, value] = items else {
        return Err(Error::filter(format!(
            "filter leaf must have 3 elements: {leaf}"
        )));
    };
    let Value::String(field) = field else {
        return Err(Error::filter(format!("filter field must be a string: {leaf}")));
    };
    let op = op
        .as_str()
        .and_then(Operator::parse)
        .ok_or_else(|| Error::filter(format!("unknown filter operator: {leaf}")))?;
    if op == Operator::Regex && !value.is_string() {
        return Err(Error::filter(format!("regex value must be a string: {leaf}")));
    }

    validate_field_name(field).map_err(|_| Error::filter(format!("bad filter field: {leaf}")))?;
    Ok(Filter::Condition(Condition {
        field: field.clone(),
        op,
        value: FilterValue::coerce(value.clone()),
    }))
}

/// Accepts non-empty dotted paths of `[A-Za-z0-9_]` segments.
pub fn validate_field_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidFieldName {
            name: name.to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parses_leaf() {
        let filter = Filter::parse(&json!(["count", ">=", 5])).unwrap();
        assert_eq!(
            filter,
            Filter::Condition(Condition {
                field: "count".into(),
                op: Operator::Ge,
                value: FilterValue::Json(json!(5)),
            })
        );
    }

    #[test]
    fn parses_composite() {
        let filter = Filter::parse(&json!({"OR": [
            ["count", "==", 1],
            {"AND": [["a.b", "!=", null], ["name", "regex", "jo"]]},
        ]}))
        .unwrap();

        let Filter::Or(children) = &filter else {
            panic!("expected OR");
        };
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[1], Filter::And(inner) if inner.len() == 2));
        assert_eq!(filter.fields(), vec!["count", "a.b", "name"]);
    }

    #[test]
    fn coerces_uuid_strings() {
        let id = Uuid::new_v4();
        let filter = Filter::parse(&json!(["id", "==", id.to_string()])).unwrap();
        let Filter::Condition(c) = filter else {
            panic!("expected leaf");
        };
        assert_eq!(c.value, FilterValue::Uuid(id));
        assert_eq!(c.value.to_json(), json!(id.to_string()));

        let plain = FilterValue::coerce(json!("not-a-uuid"));
        assert_eq!(plain, FilterValue::Json(json!("not-a-uuid")));
    }

    #[test]
    fn rejects_malformed_trees() {
        let bad = [
            json!(["count", ">="]),
            json!(["count", "~", 1]),
            json!([1, "==", 1]),
            json!(["na me", "==", 1]),
            json!(["name", "regex", 5]),
            json!({"AND": []}),
            json!({"AND": ["x"]}),
            json!({"XOR": [["a", "==", 1]]}),
            json!({"AND": [["a", "==", 1]], "OR": [["a", "==", 1]]}),
            json!({"AND": ["a", "==", 1]}),
            json!({"OR": {"a": 1}}),
            json!("count >= 5"),
        ];
        for tree in bad {
            let err = Filter::parse(&tree).unwrap_err();
            assert!(err.is_client_error(), "{tree} -> {err}");
        }
    }

    #[test]
    fn error_names_offending_leaf() {
        let err = Filter::parse(&json!({"AND": [["a", "==", 1], ["b", "<>", 2]]})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("<>"), "{message}");
    }

    #[test]
    fn from_query_builds_equalities() {
        let mut query = Map::new();
        assert!(Filter::from_query(&query).unwrap().is_none());

        query.insert("a".into(), json!(1));
        assert!(matches!(Filter::from_query(&query).unwrap(), Some(Filter::Condition(_))));

        query.insert("b".into(), json!("x"));
        assert!(matches!(Filter::from_query(&query).unwrap(), Some(Filter::And(v)) if v.len() == 2));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        (
            "[a-z]{1,6}(\\.[a-z]{1,6})?",
            prop::sample::select(vec![">", "<", ">=", "<=", "==", "!="]),
            any::<i32>(),
        )
            .prop_map(|(f, op, v)| json!([f, op, v]))
    }

    fn tree() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 16, 4, |inner| {
            (
                prop::sample::select(vec!["AND", "OR"]),
                prop::collection::vec(inner, 1..4),
            )
                .prop_map(|(k, children)| json!({ k: children }))
        })
    }

    proptest! {
        #[test]
        fn parse_render_is_stable(value in tree()) {
            let filter = Filter::parse(&value).unwrap();
            prop_assert_eq!(filter.to_json(), value.clone());
            prop_assert_eq!(Filter::parse(&filter.to_json()).unwrap(), filter);
        }
    }
}
