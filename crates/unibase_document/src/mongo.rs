//! MongoDB driver adapter.

use crate::error::{DocumentError, DocumentResult};
use crate::pipeline::Stage;
use crate::store::{DocumentStore, IndexSpec, WriteOutcome};
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;
use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

const DUPLICATE_KEY: i32 = 11000;

/// Document store backed by a MongoDB server.
pub struct MongoStore {
    database: Database,
    uri: String,
    name: String,
}

impl MongoStore {
    /// Connects to `uri` and selects the `database`.
    pub fn connect(uri: &str, database: &str) -> DocumentResult<Self> {
        let client = Client::with_uri_str(uri)?;
        info!(database, "connected to mongodb");
        Ok(Self {
            database: client.database(database),
            uri: uri.to_string(),
            name: database.to_string(),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }

    fn run_tool(tool: &str, command: &mut Command) -> DocumentResult<()> {
        debug!(tool, "running external tool");
        let status = command.status()?;
        if status.success() {
            Ok(())
        } else {
            Err(DocumentError::Tool {
                tool: tool.to_string(),
                status: status.to_string(),
            })
        }
    }
}

fn is_duplicate(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn to_bson(value: &Value) -> DocumentResult<Bson> {
    bson::to_bson(value).map_err(|e| DocumentError::Bson(e.to_string()))
}

fn to_document(value: &Value) -> DocumentResult<Document> {
    bson::to_document(value).map_err(|e| DocumentError::Bson(e.to_string()))
}

fn to_value(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

impl DocumentStore for MongoStore {
    fn name(&self) -> &str {
        "mongodb"
    }

    fn ping(&self) -> bool {
        self.database.run_command(doc! { "ping": 1 }).run().is_ok()
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> DocumentResult<()> {
        let mut keys = Document::new();
        for key in &index.keys {
            keys.insert(key.as_str(), 1_i32);
        }
        let model = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(index.unique).build())
            .build();
        self.collection(collection).create_index(model).run()?;
        Ok(())
    }

    fn insert_one(&self, collection: &str, document: Value) -> DocumentResult<WriteOutcome> {
        match self
            .collection(collection)
            .insert_one(to_document(&document)?)
            .run()
        {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) if is_duplicate(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    fn update_body(&self, collection: &str, id: &str, body: Value) -> DocumentResult<WriteOutcome> {
        let update = doc! { "$set": { "body": to_bson(&body)? } };
        match self
            .collection(collection)
            .update_one(doc! { "_id": id }, update)
            .run()
        {
            Ok(result) if result.matched_count == 0 => Ok(WriteOutcome::NotFound),
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(e) if is_duplicate(&e) => Ok(WriteOutcome::Duplicate),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_one(&self, collection: &str, id: &str) -> DocumentResult<WriteOutcome> {
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id })
            .run()?;
        Ok(if result.deleted_count == 0 {
            WriteOutcome::NotFound
        } else {
            WriteOutcome::Applied
        })
    }

    fn find_one(&self, collection: &str, id: &str) -> DocumentResult<Option<Value>> {
        let found = self
            .collection(collection)
            .find_one(doc! { "_id": id })
            .run()?;
        Ok(found.map(to_value))
    }

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> DocumentResult<Vec<Value>> {
        let stages = pipeline
            .iter()
            .map(|stage| to_document(&stage.to_value()))
            .collect::<DocumentResult<Vec<_>>>()?;
        let cursor = self
            .collection(collection)
            .aggregate(stages)
            .allow_disk_use(true)
            .run()?;

        let mut out = Vec::new();
        for document in cursor {
            out.push(to_value(document?));
        }
        Ok(out)
    }

    fn increment(&self, collection: &str, key: &str, field: &str) -> DocumentResult<i64> {
        let mut inc = Document::new();
        inc.insert(field, 1_i64);
        let updated = self
            .collection(collection)
            .find_one_and_update(doc! { "_id": key }, doc! { "$inc": inc })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .run()?
            .ok_or_else(|| DocumentError::malformed(collection, "counter upsert returned nothing"))?;

        match updated.get(field) {
            Some(Bson::Int64(n)) => Ok(*n),
            Some(Bson::Int32(n)) => Ok(i64::from(*n)),
            _ => Err(DocumentError::malformed(
                collection,
                format!("counter {key} has no integer {field}"),
            )),
        }
    }

    fn dump(&self, dir: &Path) -> DocumentResult<()> {
        Self::run_tool(
            "mongodump",
            Command::new("mongodump")
                .arg(format!("--uri={}", self.uri))
                .arg(format!("--db={}", self.name))
                .arg("--out")
                .arg(dir),
        )
    }

    fn restore(&self, dir: &Path, drop: bool) -> DocumentResult<()> {
        if drop {
            self.database.drop().run()?;
            info!(database = %self.name, "database dropped before restore");
        }
        Self::run_tool(
            "mongorestore",
            Command::new("mongorestore")
                .arg(format!("--uri={}", self.uri))
                .arg(format!("--nsInclude={}.*", self.name))
                .arg(dir),
        )
    }
}
