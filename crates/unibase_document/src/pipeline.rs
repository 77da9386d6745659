//! Aggregation pipeline stages.
//!
//! Stages render to the MongoDB JSON form so the same pipeline can be sent
//! to a server or interpreted by [`MemoryDocumentStore`](crate::MemoryDocumentStore).

use serde_json::{json, Map, Value};
use std::fmt;

/// Sort direction as stored in a `$sort` stage.
pub const ASCENDING: i32 = 1;
/// Descending `$sort` direction.
pub const DESCENDING: i32 = -1;

/// One aggregation stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `{"$match": query}`.
    Match(Value),
    /// `{"$sort": {path: 1 | -1}}`.
    Sort {
        /// Document path.
        path: String,
        /// [`ASCENDING`] or [`DESCENDING`].
        direction: i32,
    },
    /// `{"$skip": n}`.
    Skip(u64),
    /// `{"$limit": n}`, `n > 0`.
    Limit(u64),
    /// `{"$lookup": {...}}`.
    Lookup {
        /// Foreign collection.
        from: String,
        /// Path in the local document.
        local_field: String,
        /// Path in the foreign documents.
        foreign_field: String,
        /// Path receiving the matched documents.
        output: String,
    },
    /// `{"$project": {path: 1, ...}}` inclusion projection.
    Project(Vec<String>),
    /// `{"$count": field}`.
    Count(String),
}

impl Stage {
    /// Renders the stage as a MongoDB pipeline document.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Match(query) => json!({ "$match": query }),
            Self::Sort { path, direction } => {
                let mut keys = Map::new();
                keys.insert(path.clone(), json!(direction));
                json!({ "$sort": keys })
            }
            Self::Skip(n) => json!({ "$skip": n }),
            Self::Limit(n) => json!({ "$limit": n }),
            Self::Lookup {
                from,
                local_field,
                foreign_field,
                output,
            } => json!({
                "$lookup": {
                    "from": from,
                    "localField": local_field,
                    "foreignField": foreign_field,
                    "as": output,
                }
            }),
            Self::Project(paths) => {
                let fields = paths
                    .iter()
                    .map(|p| (p.clone(), json!(1)))
                    .collect::<Map<_, _>>();
                json!({ "$project": fields })
            }
            Self::Count(field) => json!({ "$count": field }),
        }
    }

    /// Whether the stage narrows the result window.
    pub fn is_window(&self) -> bool {
        matches!(self, Self::Skip(_) | Self::Limit(_))
    }
}

/// Renders a whole pipeline.
pub fn render(stages: &[Stage]) -> Value {
    Value::Array(stages.iter().map(Stage::to_value).collect())
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Collects the field paths a `$match` query references, skipping operators.
pub fn referenced_paths(query: &Value, out: &mut Vec<String>) {
    match query {
        Value::Object(map) => {
            for (key, value) in map {
                if !key.starts_with('$') && !out.contains(key) {
                    out.push(key.clone());
                }
                referenced_paths(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                referenced_paths(item, out);
            }
        }
        _ => {}
    }
}
