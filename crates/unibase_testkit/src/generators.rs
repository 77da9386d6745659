//! Property-based test generators using proptest.

use crate::models::{Counter, Person};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Labels used by generated counters.
pub const LABELS: &[&str] = &["alpha", "beta", "gamma"];

const CITIES: &[&str] = &["Oslo", "Lima", "Pune"];
const RANGE_OPERATORS: &[&str] = &[">", "<", ">=", "<=", "==", "!="];
const EQUALITY_OPERATORS: &[&str] = &["==", "!="];

/// Strategy for counters with small counts and a label from [`LABELS`].
pub fn counter_strategy() -> impl Strategy<Value = Counter> {
    (-20i64..20, prop::sample::select(LABELS)).prop_map(|(count, label)| Counter::new(count, label))
}

/// Strategy for a batch of counters.
pub fn counters_strategy(max: usize) -> impl Strategy<Value = Vec<Counter>> {
    prop::collection::vec(counter_strategy(), 0..max)
}

/// Strategy for people with a city from a small set.
pub fn person_strategy() -> impl Strategy<Value = Person> {
    (
        "[a-z]{1,8}",
        0i64..100,
        prop::sample::select(CITIES),
        prop::collection::vec("[a-z]{1,4}", 0..3),
    )
        .prop_map(|(name, age, city, tags)| {
            let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
            Person::new(name, age, city).tagged(&tags)
        })
}

fn counter_condition() -> impl Strategy<Value = Value> {
    prop_oneof![
        (prop::sample::select(RANGE_OPERATORS), -20i64..20)
            .prop_map(|(op, n)| json!(["count", op, n])),
        (prop::sample::select(EQUALITY_OPERATORS), prop::sample::select(LABELS))
            .prop_map(|(op, label)| json!(["label", op, label])),
    ]
}

/// Strategy for filter trees over [`Counter`] fields, as their JSON form.
pub fn counter_filter_strategy() -> impl Strategy<Value = Value> {
    counter_condition().prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(|c| json!({ "AND": c })),
            prop::collection::vec(inner, 1..3).prop_map(|c| json!({ "OR": c })),
        ]
    })
}

/// Evaluates a filter tree from [`counter_filter_strategy`] against a counter.
pub fn counter_matches(filter: &Value, counter: &Counter) -> bool {
    if let Some(children) = filter.get("AND").and_then(Value::as_array) {
        return children.iter().all(|c| counter_matches(c, counter));
    }
    if let Some(children) = filter.get("OR").and_then(Value::as_array) {
        return children.iter().any(|c| counter_matches(c, counter));
    }
    let field = filter[0].as_str().unwrap_or_default();
    let op = filter[1].as_str().unwrap_or_default();
    if field == "label" {
        let label = filter[2].as_str().unwrap_or_default();
        return match op {
            "==" => counter.label == label,
            _ => counter.label != label,
        };
    }
    let n = filter[2].as_i64().unwrap_or_default();
    match op {
        ">" => counter.count > n,
        "<" => counter.count < n,
        ">=" => counter.count >= n,
        "<=" => counter.count <= n,
        "==" => counter.count == n,
        _ => counter.count != n,
    }
}

/// Strategy for `[from, to)` windows, `to` absent or not below `from`.
pub fn window_strategy(max: u64) -> impl Strategy<Value = (u64, Option<u64>)> {
    (0..=max).prop_flat_map(move |from| {
        (
            Just(from),
            prop_oneof![Just(None), (from..=max + 2).prop_map(Some)],
        )
    })
}
