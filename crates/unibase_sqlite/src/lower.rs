//! Filter lowering into `WHERE` fragments.

use crate::codec::encode_scalar;
use rusqlite::types::Value as SqlValue;
use unibase_core::{Condition, Error, Filter, Operator, Result};

/// Where a filter field lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Column of the queried table, as a qualified expression.
    Column(String),
    /// Column of a joined table, as a qualified expression.
    Joined(String),
}

/// Lowers `filter`, appending bound values to `values` in placeholder order.
///
/// `resolve` maps a field path to its column; unknown fields are a filter
/// error. Joined fields match by substring (`LIKE` / `NOT LIKE`) for
/// equality, inequality and regex.
pub fn lower_filter<F>(filter: &Filter, resolve: &F, values: &mut Vec<SqlValue>) -> Result<String>
where
    F: Fn(&str) -> Option<Target>,
{
    match filter {
        Filter::Condition(c) => {
            let target = resolve(&c.field)
                .ok_or_else(|| Error::filter(format!("unknown filter field: {}", c.field)))?;
            Ok(lower_condition(c, target, values))
        }
        Filter::And(children) => combine(children, " AND ", resolve, values),
        Filter::Or(children) => combine(children, " OR ", resolve, values),
    }
}

fn combine<F>(children: &[Filter], glue: &str, resolve: &F, values: &mut Vec<SqlValue>) -> Result<String>
where
    F: Fn(&str) -> Option<Target>,
{
    let parts = children
        .iter()
        .map(|child| lower_filter(child, resolve, values).map(|sql| format!("({sql})")))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(glue))
}

fn contains(c: &Condition) -> SqlValue {
    SqlValue::Text(format!("%{}%", c.value.as_text()))
}

fn lower_condition(c: &Condition, target: Target, values: &mut Vec<SqlValue>) -> String {
    let operand = c.value.to_json();
    match (target, c.op) {
        (Target::Joined(expr), Operator::Eq | Operator::Regex) => {
            values.push(contains(c));
            format!("{expr} LIKE ?")
        }
        (Target::Joined(expr), Operator::Ne) => {
            values.push(contains(c));
            format!("{expr} NOT LIKE ?")
        }
        (Target::Column(expr), Operator::Regex) => {
            values.push(contains(c));
            format!("{expr} LIKE ?")
        }
        (Target::Column(expr), Operator::Eq) if operand.is_null() => format!("{expr} IS NULL"),
        (Target::Column(expr), Operator::Ne) if operand.is_null() => format!("{expr} IS NOT NULL"),
        (Target::Column(expr), Operator::Ne) => {
            values.push(encode_scalar(&operand));
            format!("({expr} != ? OR {expr} IS NULL)")
        }
        (Target::Column(expr) | Target::Joined(expr), op) => {
            values.push(encode_scalar(&operand));
            format!("{expr} {} ?", sql_operator(op))
        }
    }
}

fn sql_operator(op: Operator) -> &'static str {
    match op {
        Operator::Gt => ">",
        Operator::Lt => "<",
        Operator::Ge => ">=",
        Operator::Le => "<=",
        Operator::Eq => "=",
        Operator::Ne => "!=",
        Operator::Regex => "LIKE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn resolve(field: &str) -> Option<Target> {
        match field {
            "count" | "name" | "address.city" => Some(Target::Column(format!(
                "base.\"{}\"",
                field.replace('.', "__")
            ))),
            "children.name" => Some(Target::Joined("j0.\"name\"".into())),
            _ => None,
        }
    }

    fn lower(tree: Value) -> (String, Vec<SqlValue>) {
        let mut values = Vec::new();
        let sql = lower_filter(&Filter::parse(&tree).unwrap(), &resolve, &mut values).unwrap();
        (sql, values)
    }

    #[test]
    fn comparison() {
        let (sql, values) = lower(json!(["count", ">=", 5]));
        assert_eq!(sql, "base.\"count\" >= ?");
        assert_eq!(values, vec![SqlValue::Integer(5)]);
    }

    #[test]
    fn regex_is_like_contains() {
        let (sql, values) = lower(json!(["name", "regex", "ali"]));
        assert_eq!(sql, "base.\"name\" LIKE ?");
        assert_eq!(values, vec![SqlValue::Text("%ali%".into())]);
    }

    #[test]
    fn null_equality() {
        assert_eq!(lower(json!(["name", "==", null])).0, "base.\"name\" IS NULL");
        assert_eq!(lower(json!(["name", "!=", null])).0, "base.\"name\" IS NOT NULL");
    }

    #[test]
    fn inequality_includes_nulls() {
        let (sql, values) = lower(json!(["count", "!=", 3]));
        assert_eq!(sql, "(base.\"count\" != ? OR base.\"count\" IS NULL)");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn joined_fields_use_substring_match() {
        let (sql, values) = lower(json!(["children.name", "==", "Bob"]));
        assert_eq!(sql, "j0.\"name\" LIKE ?");
        assert_eq!(values, vec![SqlValue::Text("%Bob%".into())]);
        assert_eq!(lower(json!(["children.name", "!=", "Bob"])).0, "j0.\"name\" NOT LIKE ?");
        assert_eq!(lower(json!(["children.name", ">", "B"])).0, "j0.\"name\" > ?");
    }

    #[test]
    fn composites_keep_placeholder_order() {
        let (sql, values) = lower(json!({ "OR": [
            ["count", "<", 2],
            { "AND": [["address.city", "==", "Oslo"], ["count", ">", 8]] }
        ]}));
        assert_eq!(
            sql,
            "(base.\"count\" < ?) OR ((base.\"address__city\" = ?) AND (base.\"count\" > ?))"
        );
        assert_eq!(
            values,
            vec![
                SqlValue::Integer(2),
                SqlValue::Text("Oslo".into()),
                SqlValue::Integer(8)
            ]
        );
    }

    #[test]
    fn unknown_field_is_filter_error() {
        let mut values = Vec::new();
        let filter = Filter::parse(&json!(["ghost", "==", 1])).unwrap();
        let err = lower_filter(&filter, &resolve, &mut values).unwrap_err();
        assert!(err.is_client_error());
    }
}
