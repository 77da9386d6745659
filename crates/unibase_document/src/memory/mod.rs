//! In-process document store.

mod eval;

use crate::error::{DocumentError, DocumentResult};
use crate::pipeline::Stage;
use crate::store::{DocumentStore, IndexSpec, WriteOutcome};
use eval::{candidates, compare, equals, get_path, matches, set_path};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

const DUMP_EXTENSION: &str = "json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Collection {
    indexes: Vec<IndexSpec>,
    documents: Vec<Value>,
}

impl Collection {
    fn position(&self, id: &str) -> Option<usize> {
        self.documents
            .iter()
            .position(|d| d.get("_id").and_then(Value::as_str) == Some(id))
    }

    /// Whether `candidate` collides on a unique index with any document
    /// other than the one at `skip`. A key whose parts are all null never
    /// collides, as in SQL.
    fn violates_unique(&self, candidate: &Value, skip: Option<usize>) -> bool {
        self.indexes.iter().filter(|i| i.unique).any(|index| {
            let key = index_key(candidate, index);
            if key.iter().all(Value::is_null) {
                return false;
            }
            self.documents
                .iter()
                .enumerate()
                .filter(|(pos, _)| Some(*pos) != skip)
                .any(|(_, other)| {
                    index_key(other, index)
                        .iter()
                        .zip(&key)
                        .all(|(l, r)| equals(l, r))
                })
        })
    }
}

fn index_key(document: &Value, index: &IndexSpec) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|k| get_path(document, k).cloned().unwrap_or(Value::Null))
        .collect()
}

fn document_id(collection: &str, document: &Value) -> DocumentResult<String> {
    document
        .get("_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DocumentError::malformed(collection, "missing string _id"))
}

/// Document store kept in process memory.
///
/// Interprets the same pipeline stages a server would receive and enforces
/// unique indexes, so it doubles as the test double for the document
/// backend. Dumps are one JSON file per collection.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the collections holding documents or indexes.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    /// Indexes declared on `collection`.
    pub fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    fn insert_into(
        coll: &mut Collection,
        name: &str,
        document: Value,
    ) -> DocumentResult<WriteOutcome> {
        let id = document_id(name, &document)?;
        if coll.position(&id).is_some() || coll.violates_unique(&document, None) {
            return Ok(WriteOutcome::Duplicate);
        }
        coll.documents.push(document);
        Ok(WriteOutcome::Applied)
    }

    fn run(
        collections: &BTreeMap<String, Collection>,
        collection: &str,
        pipeline: &[Stage],
    ) -> DocumentResult<Vec<Value>> {
        let mut docs = collections
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default();

        for stage in pipeline {
            docs = match stage {
                Stage::Match(query) => {
                    let mut kept = Vec::with_capacity(docs.len());
                    for doc in docs {
                        if matches(&doc, query)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                Stage::Sort { path, direction } => {
                    let key = |d: &Value| candidates(d, path).first().map(|v| (*v).clone());
                    let mut keyed: Vec<(Option<Value>, Value)> =
                        docs.into_iter().map(|d| (key(&d), d)).collect();
                    keyed.sort_by(|(a, _), (b, _)| {
                        let ord = compare(
                            a.as_ref().unwrap_or(&Value::Null),
                            b.as_ref().unwrap_or(&Value::Null),
                        );
                        if *direction < 0 {
                            ord.reverse()
                        } else {
                            ord
                        }
                    });
                    keyed.into_iter().map(|(_, d)| d).collect()
                }
                Stage::Skip(n) => docs.into_iter().skip(*n as usize).collect(),
                Stage::Limit(n) => docs.into_iter().take(*n as usize).collect(),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    output,
                } => {
                    let foreign = collections
                        .get(from)
                        .map(|c| c.documents.as_slice())
                        .unwrap_or_default();
                    docs.into_iter()
                        .map(|mut doc| {
                            let joined = lookup(&doc, local_field, foreign, foreign_field);
                            set_path(&mut doc, output, Value::Array(joined));
                            doc
                        })
                        .collect()
                }
                Stage::Project(paths) => docs.iter().map(|d| project(d, paths)).collect(),
                Stage::Count(field) => {
                    if docs.is_empty() {
                        Vec::new()
                    } else {
                        let mut out = Map::new();
                        out.insert(field.clone(), json!(docs.len()));
                        vec![Value::Object(out)]
                    }
                }
            };
        }
        Ok(docs)
    }
}

fn lookup(doc: &Value, local_field: &str, foreign: &[Value], foreign_field: &str) -> Vec<Value> {
    let local = candidates(doc, local_field);
    foreign
        .iter()
        .filter(|f| {
            candidates(f, foreign_field)
                .iter()
                .any(|fv| local.iter().any(|lv| equals(lv, fv)))
        })
        .cloned()
        .collect()
}

fn project(doc: &Value, paths: &[String]) -> Value {
    let mut out = Value::Object(Map::new());
    if let Some(id) = doc.get("_id") {
        set_path(&mut out, "_id", id.clone());
    }
    for path in paths {
        if let Some(value) = get_path(doc, path) {
            set_path(&mut out, path, value.clone());
        }
    }
    out
}

impl DocumentStore for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> bool {
        true
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentResult<()> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        if !coll.indexes.contains(index) {
            debug!(collection, index = %index.name(), unique = index.unique, "index created");
            coll.indexes.push(index.clone());
        }
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Value) -> DocumentResult<WriteOutcome> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        Self::insert_into(coll, collection, document)
    }

    fn update_body(&self, collection: &str, id: &str, body: Value) -> DocumentResult<WriteOutcome> {
        let mut collections = self.collections.write();
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(WriteOutcome::NotFound);
        };
        let Some(pos) = coll.position(id) else {
            return Ok(WriteOutcome::NotFound);
        };

        let mut candidate = coll.documents[pos].clone();
        set_path(&mut candidate, "body", body);
        if coll.violates_unique(&candidate, Some(pos)) {
            return Ok(WriteOutcome::Duplicate);
        }
        coll.documents[pos] = candidate;
        Ok(WriteOutcome::Applied)
    }

    fn delete_one(&self, collection: &str, id: &str) -> DocumentResult<WriteOutcome> {
        let mut collections = self.collections.write();
        let removed = collections
            .get_mut(collection)
            .and_then(|coll| coll.position(id).map(|pos| coll.documents.remove(pos)));
        Ok(match removed {
            Some(_) => WriteOutcome::Applied,
            None => WriteOutcome::NotFound,
        })
    }

    fn find_one(&self, collection: &str, id: &str) -> DocumentResult<Option<Value>> {
        let collections = self.collections.read();
        Ok(collections
            .get(collection)
            .and_then(|coll| coll.position(id).map(|pos| coll.documents[pos].clone())))
    }

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> DocumentResult<Vec<Value>> {
        let collections = self.collections.read();
        Self::run(&collections, collection, pipeline)
    }

    fn increment(&self, collection: &str, key: &str, field: &str) -> DocumentResult<i64> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        match coll.position(key) {
            Some(pos) => {
                let doc = &mut coll.documents[pos];
                let next = get_path(doc, field).and_then(Value::as_i64).unwrap_or(0) + 1;
                set_path(doc, field, json!(next));
                Ok(next)
            }
            None => {
                let mut doc = json!({ "_id": key });
                set_path(&mut doc, field, json!(1));
                coll.documents.push(doc);
                Ok(1)
            }
        }
    }

    fn dump(&self, dir: &Path) -> DocumentResult<()> {
        fs::create_dir_all(dir)?;
        let collections = self.collections.read();
        for (name, coll) in collections.iter() {
            let path = dir.join(format!("{name}.{DUMP_EXTENSION}"));
            fs::write(&path, serde_json::to_vec(coll)?)?;
        }
        debug!(dir = %dir.display(), collections = collections.len(), "memory store dumped");
        Ok(())
    }

    fn restore(&self, dir: &Path, drop: bool) -> DocumentResult<()> {
        let mut loaded = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DUMP_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let coll: Collection = serde_json::from_slice(&fs::read(&path)?)?;
            loaded.push((name.to_string(), coll));
        }

        let mut collections = self.collections.write();
        if drop {
            collections.clear();
        }
        let mut skipped = 0usize;
        for (name, dumped) in loaded {
            let coll = collections.entry(name.clone()).or_default();
            for index in dumped.indexes {
                if !coll.indexes.contains(&index) {
                    coll.indexes.push(index);
                }
            }
            for document in dumped.documents {
                if Self::insert_into(coll, &name, document)? != WriteOutcome::Applied {
                    skipped += 1;
                }
            }
        }
        debug!(dir = %dir.display(), drop, skipped, "memory store restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ASCENDING, DESCENDING};
    use tempfile::tempdir;

    fn store_with(docs: &[Value]) -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        for doc in docs {
            store.insert_one("Counter", doc.clone()).unwrap();
        }
        store
    }

    fn counters() -> MemoryDocumentStore {
        store_with(&[
            json!({ "_id": "a", "body": { "id": "a", "count": 3 } }),
            json!({ "_id": "b", "body": { "id": "b", "count": 1 } }),
            json!({ "_id": "c", "body": { "id": "c", "count": 2 } }),
        ])
    }

    fn ids(docs: &[Value]) -> Vec<&str> {
        docs.iter().filter_map(|d| d["_id"].as_str()).collect()
    }

    #[test]
    fn sort_skip_limit() {
        let store = counters();
        let asc = store
            .aggregate(
                "Counter",
                &[Stage::Sort {
                    path: "body.count".into(),
                    direction: ASCENDING,
                }],
            )
            .unwrap();
        assert_eq!(ids(&asc), vec!["b", "c", "a"]);

        let page = store
            .aggregate(
                "Counter",
                &[
                    Stage::Sort {
                        path: "body.count".into(),
                        direction: DESCENDING,
                    },
                    Stage::Skip(1),
                    Stage::Limit(1),
                ],
            )
            .unwrap();
        assert_eq!(ids(&page), vec!["c"]);
    }

    #[test]
    fn count_on_empty_input_yields_nothing() {
        let store = counters();
        let none = store
            .aggregate(
                "Counter",
                &[
                    Stage::Match(json!({ "body.count": { "$gt": 10 } })),
                    Stage::Count("count".into()),
                ],
            )
            .unwrap();
        assert!(none.is_empty());

        let some = store
            .aggregate("Counter", &[Stage::Count("count".into())])
            .unwrap();
        assert_eq!(some, vec![json!({ "count": 3 })]);
        assert!(store.aggregate("Missing", &[]).unwrap().is_empty());
    }

    #[test]
    fn project_keeps_id_and_paths() {
        let store = counters();
        let docs = store
            .aggregate("Counter", &[Stage::Project(vec!["body.count".into()])])
            .unwrap();
        assert_eq!(docs[0], json!({ "_id": "a", "body": { "count": 3 } }));
    }

    #[test]
    fn lookup_attaches_matches() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("Parent", json!({ "_id": "p1", "body": { "id": "p1" } }))
            .unwrap();
        store
            .insert_one("Parent", json!({ "_id": "p2", "body": { "id": "p2" } }))
            .unwrap();
        for (id, parent) in [("c1", "p1"), ("c2", "p1"), ("c3", "p2")] {
            store
                .insert_one(
                    "Child",
                    json!({ "_id": id, "body": { "id": id, "parent": parent } }),
                )
                .unwrap();
        }

        let docs = store
            .aggregate(
                "Parent",
                &[Stage::Lookup {
                    from: "Child".into(),
                    local_field: "body.id".into(),
                    foreign_field: "body.parent".into(),
                    output: "body.joined_collections.children".into(),
                }],
            )
            .unwrap();
        let children = docs[0]["body"]["joined_collections"]["children"]
            .as_array()
            .unwrap();
        assert_eq!(ids(children), vec!["c1", "c2"]);
        assert_eq!(
            docs[1]["body"]["joined_collections"]["children"]
                .as_array()
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn lookup_matches_array_elements() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one("Tag", json!({ "_id": "t1", "body": { "id": "t1" } }))
            .unwrap();
        store
            .insert_one("Tag", json!({ "_id": "t2", "body": { "id": "t2" } }))
            .unwrap();
        store
            .insert_one("Post", json!({ "_id": "p", "body": { "tags": ["t2", "t9"] } }))
            .unwrap();

        let docs = store
            .aggregate(
                "Post",
                &[Stage::Lookup {
                    from: "Tag".into(),
                    local_field: "body.tags".into(),
                    foreign_field: "_id".into(),
                    output: "body.joined_collections.tags".into(),
                }],
            )
            .unwrap();
        let tags = docs[0]["body"]["joined_collections"]["tags"].as_array().unwrap();
        assert_eq!(ids(tags), vec!["t2"]);
    }

    #[test]
    fn unique_index_rejects_duplicates() {
        let store = MemoryDocumentStore::new();
        store
            .create_index("Setting", &IndexSpec::unique("body.key"))
            .unwrap();
        let first = json!({ "_id": "1", "body": { "key": "theme" } });
        let second = json!({ "_id": "2", "body": { "key": "theme" } });
        let third = json!({ "_id": "3", "body": { "key": "lang" } });

        assert_eq!(store.insert_one("Setting", first.clone()).unwrap(), WriteOutcome::Applied);
        assert_eq!(store.insert_one("Setting", first).unwrap(), WriteOutcome::Duplicate);
        assert_eq!(store.insert_one("Setting", second).unwrap(), WriteOutcome::Duplicate);
        assert_eq!(store.insert_one("Setting", third).unwrap(), WriteOutcome::Applied);

        let clash = store
            .update_body("Setting", "3", json!({ "key": "theme" }))
            .unwrap();
        assert_eq!(clash, WriteOutcome::Duplicate);
        let same = store
            .update_body("Setting", "3", json!({ "key": "lang", "v": 2 }))
            .unwrap();
        assert_eq!(same, WriteOutcome::Applied);
    }

    #[test]
    fn missing_unique_keys_do_not_collide() {
        let store = MemoryDocumentStore::new();
        store
            .create_index("Setting", &IndexSpec::unique("body.key"))
            .unwrap();
        let blank = json!({ "_id": "1", "body": {} });
        let null = json!({ "_id": "2", "body": { "key": null } });

        assert_eq!(store.insert_one("Setting", blank).unwrap(), WriteOutcome::Applied);
        assert_eq!(store.insert_one("Setting", null).unwrap(), WriteOutcome::Applied);
    }

    #[test]
    fn writes_on_missing_documents() {
        let store = counters();
        assert_eq!(
            store.update_body("Counter", "zz", json!({})).unwrap(),
            WriteOutcome::NotFound
        );
        assert_eq!(store.delete_one("Counter", "zz").unwrap(), WriteOutcome::NotFound);
        assert_eq!(store.delete_one("Counter", "a").unwrap(), WriteOutcome::Applied);
        assert!(store.find_one("Counter", "a").unwrap().is_none());
        assert!(store.find_one("Counter", "b").unwrap().is_some());
    }

    #[test]
    fn increment_starts_at_one() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.increment("auto_increment", "Counter", "seq").unwrap(), 1);
        assert_eq!(store.increment("auto_increment", "Counter", "seq").unwrap(), 2);
        assert_eq!(store.increment("auto_increment", "Other", "seq").unwrap(), 1);
    }

    #[test]
    fn dump_and_restore() {
        let dir = tempdir().unwrap();
        let store = counters();
        store
            .create_index("Counter", &IndexSpec::single("body.count"))
            .unwrap();
        store.dump(dir.path()).unwrap();

        let target = MemoryDocumentStore::new();
        target
            .insert_one("Counter", json!({ "_id": "a", "body": { "count": 99 } }))
            .unwrap();
        target.restore(dir.path(), false).unwrap();
        let a = target.find_one("Counter", "a").unwrap().unwrap();
        assert_eq!(a["body"]["count"], 99);
        assert_eq!(target.aggregate("Counter", &[]).unwrap().len(), 3);
        assert_eq!(target.indexes("Counter").len(), 1);

        target.restore(dir.path(), true).unwrap();
        let a = target.find_one("Counter", "a").unwrap().unwrap();
        assert_eq!(a["body"]["count"], 3);
    }
}
