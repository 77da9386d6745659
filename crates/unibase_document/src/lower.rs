//! Filter lowering into `$match` queries.
//!
//! Records live under `body`; the id is mirrored into `_id`. Fields prefixed
//! by a join output address the looked-up documents:
//!
//! | field             | path                                       |
//! |-------------------|--------------------------------------------|
//! | `id`              | `_id`                                      |
//! | `count`           | `body.count`                               |
//! | `address.city`    | `body.address.city`                        |
//! | `children.name`   | `body.joined_collections.children.body.name` |

use regex::Regex;
use serde_json::{json, Map, Value};
use unibase_core::{Condition, Error, Filter, Operator, Result};

/// Path under which a join output is looked up.
pub fn join_output_path(output: &str) -> String {
    format!("body.joined_collections.{output}")
}

/// Document path of a record field.
pub fn document_path(field: &str, joins: &[String]) -> String {
    if field == "id" {
        return "_id".to_string();
    }
    if let Some((head, rest)) = field.split_once('.') {
        if joins.iter().any(|j| j == head) {
            return format!("{}.body.{rest}", join_output_path(head));
        }
    }
    format!("body.{field}")
}

/// Lowers a filter tree into a `$match` query.
///
/// A `regex` operand that does not compile is a filter error.
pub fn lower_filter(filter: &Filter, joins: &[String]) -> Result<Value> {
    let lower_all = |children: &[Filter]| {
        children
            .iter()
            .map(|f| lower_filter(f, joins))
            .collect::<Result<Vec<_>>>()
    };
    match filter {
        Filter::Condition(c) => lower_condition(c, joins),
        Filter::And(children) => lower_all(children).map(|all| json!({ "$and": all })),
        Filter::Or(children) => lower_all(children).map(|all| json!({ "$or": all })),
    }
}

fn lower_condition(c: &Condition, joins: &[String]) -> Result<Value> {
    let mut predicate = Map::new();
    match c.op {
        Operator::Regex => {
            let pattern = c.value.as_text();
            Regex::new(&pattern).map_err(|e| {
                Error::filter(format!("invalid regex for {}: {e}", c.field))
            })?;
            predicate.insert("$regex".into(), Value::String(pattern));
            predicate.insert("$options".into(), Value::String("i".into()));
        }
        op => {
            predicate.insert(operator_name(op).into(), c.value.to_json());
        }
    }

    let mut query = Map::new();
    query.insert(document_path(&c.field, joins), Value::Object(predicate));
    Ok(Value::Object(query))
}

fn operator_name(op: Operator) -> &'static str {
    match op {
        Operator::Gt => "$gt",
        Operator::Lt => "$lt",
        Operator::Ge => "$gte",
        Operator::Le => "$lte",
        Operator::Eq => "$eq",
        Operator::Ne => "$ne",
        Operator::Regex => "$regex",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(tree: Value) -> Filter {
        Filter::parse(&tree).unwrap()
    }

    fn lower(tree: Value) -> Value {
        lower_filter(&parse(tree), &[]).unwrap()
    }

    #[test]
    fn leaf_paths() {
        let joins = vec!["children".to_string()];
        assert_eq!(document_path("id", &joins), "_id");
        assert_eq!(document_path("count", &joins), "body.count");
        assert_eq!(document_path("address.city", &joins), "body.address.city");
        assert_eq!(
            document_path("children.name", &joins),
            "body.joined_collections.children.body.name"
        );
        assert_eq!(document_path("children", &joins), "body.children");
    }

    #[test]
    fn lowers_comparison_leaf() {
        let query = lower(json!(["count", ">=", 5]));
        assert_eq!(query, json!({ "body.count": { "$gte": 5 } }));
    }

    #[test]
    fn regex_is_case_insensitive() {
        let query = lower(json!(["name", "regex", "ali"]));
        assert_eq!(
            query,
            json!({ "body.name": { "$regex": "ali", "$options": "i" } })
        );
    }

    #[test]
    fn invalid_regex_is_a_filter_error() {
        let err = lower_filter(&parse(json!(["name", "regex", "(unclosed"])), &[]).unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn uuid_values_render_as_strings() {
        let id = "6f1c4a1e-8d7b-4a5e-9c2f-1b3d5e7f9a0b";
        let query = lower(json!(["id", "==", id]));
        assert_eq!(query, json!({ "_id": { "$eq": id } }));
    }

    #[test]
    fn composites_nest() {
        let tree = json!({ "OR": [
            ["count", "<", 2],
            { "AND": [["count", ">", 8], ["name", "!=", "x"]] }
        ]});
        let query = lower(tree);
        assert_eq!(
            query,
            json!({ "$or": [
                { "body.count": { "$lt": 2 } },
                { "$and": [
                    { "body.count": { "$gt": 8 } },
                    { "body.name": { "$ne": "x" } }
                ]}
            ]})
        );
    }
}
