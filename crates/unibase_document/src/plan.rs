//! Aggregation plans behind document cursors.

use crate::error::backend_error;
use crate::lower::{document_path, join_output_path, lower_filter};
use crate::pipeline::{referenced_paths, render, Stage, ASCENDING, DESCENDING};
use crate::store::DocumentStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use unibase_core::{CacheLookup, Filter, Join, QueryCache, QueryPlan, Result, SortOrder};

/// Path of the default sort key, newest records first.
pub const DEFAULT_SORT: &str = "body.created.timestamp";

const COUNT_FIELD: &str = "count";

/// Pipeline accumulated by a document cursor.
///
/// `$match` and `$lookup` stages keep their call order; the sort and window
/// stages are appended when the pipeline is rendered.
pub struct DocumentPlan {
    store: Arc<dyn DocumentStore>,
    cache: Arc<QueryCache>,
    collection: String,
    stages: Vec<Stage>,
    joins: Vec<String>,
    sort: Option<(String, i32)>,
    skip: u64,
    limit: Option<u64>,
}

impl DocumentPlan {
    /// Starts a plan over `collection`.
    pub fn new(store: Arc<dyn DocumentStore>, cache: Arc<QueryCache>, collection: &str) -> Self {
        Self {
            store,
            cache,
            collection: collection.to_string(),
            stages: Vec::new(),
            joins: Vec::new(),
            sort: None,
            skip: 0,
            limit: None,
        }
    }

    fn joined_collections(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter_map(|stage| match stage {
                Stage::Lookup { from, .. } => Some(from.clone()),
                _ => None,
            })
            .collect()
    }

    /// Full fetch pipeline.
    pub fn pipeline(&self) -> Vec<Stage> {
        let mut stages = self.stages.clone();
        let (path, direction) = self
            .sort
            .clone()
            .unwrap_or_else(|| (DEFAULT_SORT.to_string(), DESCENDING));
        stages.push(Stage::Sort { path, direction });
        if self.skip > 0 {
            stages.push(Stage::Skip(self.skip));
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            stages.push(Stage::Limit(limit));
        }
        stages
    }

    /// Count pipeline: the filter and join stages without sort or window,
    /// narrowed to the referenced paths when there are no joins. Paths nested
    /// under another referenced path are dropped from the projection.
    pub fn count_pipeline(&self) -> Vec<Stage> {
        let mut stages = Vec::with_capacity(self.stages.len() + 3);
        if self.joins.is_empty() {
            let mut paths = Vec::new();
            for stage in &self.stages {
                if let Stage::Match(query) = stage {
                    referenced_paths(query, &mut paths);
                }
            }
            if !paths.iter().any(|p| p == "_id") {
                paths.push("_id".to_string());
            }
            let covered = paths.clone();
            paths.retain(|p| !covered.iter().any(|q| p.starts_with(&format!("{q}."))));
            stages.push(Stage::Project(paths));
        }
        stages.extend(self.stages.iter().cloned());
        stages.push(Stage::Project(vec!["_id".to_string()]));
        stages.push(Stage::Count(COUNT_FIELD.to_string()));
        stages
    }

    fn window_is_empty(&self) -> bool {
        self.limit == Some(0)
    }
}

/// Unwraps `{_id, body}` into the flat record, unwrapping joined documents
/// the same way.
fn unwrap_document(mut document: Value) -> Value {
    let mut body = document
        .get_mut("body")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if let Some(joined) = body
        .get_mut("joined_collections")
        .and_then(Value::as_object_mut)
    {
        for entry in joined.values_mut() {
            if let Value::Array(items) = entry {
                for item in items.iter_mut() {
                    let inner = item.get_mut("body").map(Value::take);
                    if let Some(inner) = inner {
                        *item = inner;
                    }
                }
            }
        }
    }
    body
}

impl QueryPlan for DocumentPlan {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn filter(&mut self, filter: &Filter) -> Result<()> {
        let query = lower_filter(filter, &self.joins)?;
        self.stages.push(Stage::Match(query));
        Ok(())
    }

    fn sort(&mut self, key: &str, order: SortOrder) -> Result<()> {
        let direction = match order {
            SortOrder::Asc => ASCENDING,
            SortOrder::Desc => DESCENDING,
        };
        self.sort = Some((document_path(key, &self.joins), direction));
        Ok(())
    }

    fn limit(&mut self, from: u64, to: Option<u64>) -> Result<()> {
        self.skip = from;
        self.limit = to.map(|to| to.saturating_sub(from));
        Ok(())
    }

    fn join(&mut self, join: &Join) -> Result<()> {
        let foreign_field = match join.foreign_field.as_str() {
            "id" => "_id".to_string(),
            other => format!("body.{other}"),
        };
        self.stages.push(Stage::Lookup {
            from: join.table.clone(),
            local_field: document_path(&join.local_field, &self.joins),
            foreign_field,
            output: join_output_path(&join.output),
        });
        self.joins.push(join.output.clone());
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        let pipeline = self.count_pipeline();
        let signature = QueryCache::signature(&render(&pipeline).to_string());
        let generation = match self.cache.get(&self.collection, &signature) {
            CacheLookup::Hit(count) => return Ok(count),
            CacheLookup::Miss(generation) => generation,
        };

        debug!(collection = %self.collection, pipeline = %render(&pipeline), "document count");
        let rows = self
            .store
            .aggregate(&self.collection, &pipeline)
            .map_err(|e| backend_error("error counting documents", e))?;
        let count = rows
            .first()
            .and_then(|row| row.get(COUNT_FIELD))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.cache.set(
            &self.collection,
            &self.joined_collections(),
            &signature,
            count,
            generation,
        );
        Ok(count)
    }

    fn fetch(&self) -> Result<Vec<Value>> {
        if self.window_is_empty() {
            return Ok(Vec::new());
        }
        let pipeline = self.pipeline();
        debug!(collection = %self.collection, pipeline = %render(&pipeline), "document fetch");
        let documents = self
            .store
            .aggregate(&self.collection, &pipeline)
            .map_err(|e| backend_error("error fetching documents", e))?;
        Ok(documents.into_iter().map(unwrap_document).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDocumentStore;
    use serde_json::json;

    fn plan() -> DocumentPlan {
        DocumentPlan::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(QueryCache::new(true, 10)),
            "Counter",
        )
    }

    #[test]
    fn default_sort_is_newest_first() {
        let p = plan();
        assert_eq!(
            p.pipeline(),
            vec![Stage::Sort {
                path: DEFAULT_SORT.into(),
                direction: DESCENDING
            }]
        );
    }

    #[test]
    fn window_goes_last() {
        let mut p = plan();
        p.limit(10, Some(15)).unwrap();
        p.sort("count", SortOrder::Asc).unwrap();
        p.filter(&Filter::parse(&json!(["count", ">", 1])).unwrap())
            .unwrap();

        let stages = p.pipeline();
        assert!(matches!(stages[0], Stage::Match(_)));
        assert_eq!(
            stages[1],
            Stage::Sort {
                path: "body.count".into(),
                direction: ASCENDING
            }
        );
        assert_eq!(stages[2], Stage::Skip(10));
        assert_eq!(stages[3], Stage::Limit(5));
    }

    #[test]
    fn zero_width_window_fetches_nothing() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert_one("Counter", json!({ "_id": "a", "body": { "id": "a" } }))
            .unwrap();
        let mut p = DocumentPlan::new(store, Arc::new(QueryCache::new(false, 0)), "Counter");
        p.limit(0, Some(0)).unwrap();
        assert!(p.fetch().unwrap().is_empty());
        assert_eq!(p.count().unwrap(), 1);
    }

    #[test]
    fn count_projects_referenced_paths() {
        let mut p = plan();
        p.filter(&Filter::parse(&json!(["count", ">", 1])).unwrap())
            .unwrap();
        p.limit(0, Some(2)).unwrap();
        let stages = p.count_pipeline();
        assert_eq!(
            stages[0],
            Stage::Project(vec!["body.count".into(), "_id".into()])
        );
        assert!(stages.iter().all(|s| !s.is_window()));
        assert_eq!(stages.last(), Some(&Stage::Count("count".into())));
    }

    #[test]
    fn joins_rewrite_paths_and_skip_projection() {
        let mut p = plan();
        p.join(&Join::new("Child", "id", "children").on("parent"))
            .unwrap();
        p.filter(&Filter::parse(&json!(["children.name", "==", "Bob"])).unwrap())
            .unwrap();

        assert_eq!(
            p.stages[0],
            Stage::Lookup {
                from: "Child".into(),
                local_field: "_id".into(),
                foreign_field: "body.parent".into(),
                output: "body.joined_collections.children".into(),
            }
        );
        assert_eq!(
            p.stages[1],
            Stage::Match(json!({
                "body.joined_collections.children.body.name": { "$eq": "Bob" }
            }))
        );
        assert!(matches!(p.count_pipeline()[0], Stage::Lookup { .. }));
    }

    #[test]
    fn unwraps_bodies() {
        let doc = json!({
            "_id": "p",
            "body": {
                "id": "p",
                "joined_collections": {
                    "children": [{ "_id": "c", "body": { "id": "c", "name": "Bob" } }]
                }
            }
        });
        assert_eq!(
            unwrap_document(doc),
            json!({
                "id": "p",
                "joined_collections": { "children": [{ "id": "c", "name": "Bob" }] }
            })
        );
    }
}
