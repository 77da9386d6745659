//! Query evaluation over JSON documents.
//!
//! Comparison follows the document database conventions the pipeline
//! targets: values of different types order by type bracket
//! (null < numbers < strings < objects < arrays < booleans), range operators
//! only match within one bracket, and a path that crosses an array matches
//! if any element matches.

use crate::error::{DocumentError, DocumentResult};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Values reachable at a dotted `path`, descending into arrays.
pub(crate) fn values_at<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(doc, &parts, &mut out);
    out
}

fn collect<'a>(value: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect(item, rest, out);
                }
            }
            for item in items.iter().filter(|i| i.is_object()) {
                collect(item, parts, out);
            }
        }
        _ => {}
    }
}

/// Comparison candidates at `path`: each reachable value plus the elements
/// of reachable arrays. A missing path yields a single null.
pub(crate) fn candidates<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let found = values_at(doc, path);
    if found.is_empty() {
        return vec![&NULL];
    }
    let mut out = Vec::with_capacity(found.len());
    for value in found {
        out.push(value);
        if let Value::Array(items) = value {
            out.extend(items.iter());
        }
    }
    out
}

/// Object-only lookup of a dotted path.
pub(crate) fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |value, part| value.get(part))
}

/// Sets a dotted path, creating intermediate objects.
pub(crate) fn set_path(doc: &mut Value, path: &str, value: Value) {
    let mut parts = path.split('.').peekable();
    let mut current = doc;
    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

fn bracket(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values.
pub(crate) fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => bracket(a).cmp(&bracket(b)),
    }
}

/// Value equality with numeric widening.
pub(crate) fn equals(a: &Value, b: &Value) -> bool {
    bracket(a) == bracket(b) && compare(a, b) == Ordering::Equal
}

/// Whether `doc` satisfies the `$match` query.
pub(crate) fn matches(doc: &Value, query: &Value) -> DocumentResult<bool> {
    let Value::Object(clauses) = query else {
        return Err(DocumentError::Unsupported(format!("match query {query}")));
    };
    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => all_of(doc, condition)?,
            "$or" => any_of(doc, condition)?,
            op if op.starts_with('$') => {
                return Err(DocumentError::Unsupported(format!("query operator {op}")));
            }
            path => field_matches(doc, path, condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn subqueries(condition: &Value) -> DocumentResult<&Vec<Value>> {
    condition
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| DocumentError::Unsupported(format!("combinator body {condition}")))
}

fn all_of(doc: &Value, condition: &Value) -> DocumentResult<bool> {
    for query in subqueries(condition)? {
        if !matches(doc, query)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(doc: &Value, condition: &Value) -> DocumentResult<bool> {
    for query in subqueries(condition)? {
        if matches(doc, query)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn field_matches(doc: &Value, path: &str, condition: &Value) -> DocumentResult<bool> {
    let values = candidates(doc, path);
    let operators = match condition {
        Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => map,
        _ => return Ok(values.iter().any(|v| equals(v, condition))),
    };

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => values.iter().any(|v| equals(v, operand)),
            "$ne" => !values.iter().any(|v| equals(v, operand)),
            "$gt" => in_range(&values, operand, |o| o == Ordering::Greater),
            "$gte" => in_range(&values, operand, |o| o != Ordering::Less),
            "$lt" => in_range(&values, operand, |o| o == Ordering::Less),
            "$lte" => in_range(&values, operand, |o| o != Ordering::Greater),
            "$regex" => {
                let options = operators
                    .get("$options")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                regex_matches(&values, operand, options)?
            }
            "$options" => true,
            other => {
                return Err(DocumentError::Unsupported(format!("query operator {other}")));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_range(values: &[&Value], operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    values
        .iter()
        .filter(|v| bracket(v) == bracket(operand) && !v.is_array())
        .any(|v| accept(compare(v, operand)))
}

fn regex_matches(values: &[&Value], pattern: &Value, options: &str) -> DocumentResult<bool> {
    let Some(pattern) = pattern.as_str() else {
        return Err(DocumentError::Unsupported(format!("$regex pattern {pattern}")));
    };
    let re = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .build()?;
    Ok(values
        .iter()
        .filter_map(|v| v.as_str())
        .any(|s| re.is_match(s)))
}
