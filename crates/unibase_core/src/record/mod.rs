//! Stored records.
//!
//! Every persisted entity is a [`Stored<T>`]: the fixed base record fields
//! (identity, ownership, sequence, activation flag, audit stamps, permission
//! bits) composed with a user payload `T: Model`. The payload's fields are
//! flattened next to the base fields on the wire, so a stored `Setting`
//! serializes as one flat object.
//!
//! ```rust,ignore
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Setting { key: String, value: serde_json::Value }
//!
//! impl Model for Setting {
//!     const NAME: &'static str = "Setting";
//!     fn schema() -> Schema {
//!         Schema::builder().text("key").json("value").unique("key").build()
//!     }
//! }
//!
//! let mut record = Stored::new(Setting { key: "theme".into(), value: json!("dark") });
//! db.create(&mut record, None)?;
//! ```

mod meta;

pub use meta::{timestamp_ms, ModelMeta, Permission, Permissions};

use crate::error::Result;
use crate::schema::Schema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Fields the base record owns; user payloads must not reuse them.
pub const BASE_FIELDS: &[&str] = &[
    "id",
    "owner",
    "parent",
    "seq",
    "enabled",
    "note",
    "created",
    "updated",
    "accessed",
    "permissions",
    "joined_collections",
];

/// Fields a partial update never overwrites.
pub const PATCH_EXCLUDE: &[&str] = &[
    "id",
    "seq",
    "created",
    "updated",
    "accessed",
    "permissions",
    "joined_collections",
];

/// A user-defined record payload.
pub trait Model: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection/table name.
    const NAME: &'static str;

    /// Field and index declarations.
    fn schema() -> Schema;
}

/// A record as persisted: base fields plus the model payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    /// Immutable identity, assigned at construction.
    pub id: Uuid,
    /// Owning identity.
    #[serde(default)]
    pub owner: Option<Uuid>,
    /// Parent record.
    #[serde(default)]
    pub parent: Option<Uuid>,
    /// Backend-assigned per-collection sequence, 0 until created.
    #[serde(default)]
    pub seq: i64,
    /// Activation flag.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Free-form note.
    #[serde(default)]
    pub note: String,
    /// Set once at insertion.
    #[serde(default)]
    pub created: ModelMeta,
    /// Bumped by updates.
    #[serde(default)]
    pub updated: ModelMeta,
    /// Bumped by reads that record access.
    #[serde(default)]
    pub accessed: ModelMeta,
    /// Permission tiers.
    #[serde(default)]
    pub permissions: Permissions,
    /// Model payload.
    #[serde(flatten)]
    pub data: T,
    /// Sub-collections attached by cursor joins, keyed by output field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joined_collections: BTreeMap<String, Vec<Value>>,
}

fn enabled_default() -> bool {
    true
}

impl<T: Model> Stored<T> {
    /// Wraps a payload with a fresh id and default metadata.
    pub fn new(data: T) -> Self {
        Self::with_id(Uuid::new_v4(), data)
    }

    /// Wraps a payload with an explicit id.
    pub fn with_id(id: Uuid, data: T) -> Self {
        Self {
            id,
            owner: None,
            parent: None,
            seq: 0,
            enabled: true,
            note: String::new(),
            created: ModelMeta::now(None),
            updated: ModelMeta::default(),
            accessed: ModelMeta::default(),
            permissions: Permissions::default(),
            data,
            joined_collections: BTreeMap::new(),
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn owned_by(mut self, owner: Uuid) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Sets the parent.
    #[must_use]
    pub fn child_of(mut self, parent: Uuid) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the permission tiers.
    #[must_use]
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Key used to lock this record across workers.
    pub fn lock_key(&self) -> String {
        format!("{}_{}.lock", T::NAME, self.id)
    }

    /// Serializes to the flat wire object.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes from a flat wire object.
    ///
    /// Joined sub-collection entries without an `id` (unmatched outer-join
    /// fragments) are dropped.
    pub fn from_value(mut value: Value) -> Result<Self> {
        clean_joined(&mut value);
        Ok(serde_json::from_value(value)?)
    }
}

/// Normalizes `joined_collections`: non-list entries become one-element
/// lists and entries without an id are removed.
pub fn clean_joined(value: &mut Value) {
    let Some(joined) = value
        .get_mut("joined_collections")
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    for entry in joined.values_mut() {
        if !entry.is_array() {
            *entry = Value::Array(vec![entry.take()]);
        }
        if let Value::Array(items) = entry {
            items.retain(|item| item.get("id").is_some_and(|id| !id.is_null()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        tags: Vec<String>,
    }

    impl Model for Note {
        const NAME: &'static str = "Note";
        fn schema() -> Schema {
            Schema::builder().text("title").json("tags").build()
        }
    }

    fn note() -> Stored<Note> {
        Stored::new(Note {
            title: "hello".into(),
            tags: vec!["a".into()],
        })
    }

    #[test]
    fn wire_shape_is_flat() {
        let record = note();
        let value = record.to_value().unwrap();

        assert_eq!(value["title"], json!("hello"));
        assert_eq!(value["enabled"], json!(true));
        assert_eq!(value["permissions"]["group"]["write"], json!(true));
        assert!(value.get("data").is_none());
        assert!(value.get("joined_collections").is_none());
    }

    #[test]
    fn value_round_trip() {
        let record = note().owned_by(Uuid::new_v4());
        let back = Stored::<Note>::from_value(record.to_value().unwrap()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_base_fields_default() {
        let id = Uuid::new_v4();
        let back = Stored::<Note>::from_value(json!({
            "id": id,
            "title": "t",
            "tags": [],
        }))
        .unwrap();
        assert_eq!(back.id, id);
        assert!(back.enabled);
        assert_eq!(back.seq, 0);
        assert_eq!(back.permissions, Permissions::default());
    }

    #[test]
    fn joined_fragments_are_cleaned() {
        let child = Uuid::new_v4();
        let mut value = note().to_value().unwrap();
        value["joined_collections"] = json!({
            "children": [{"id": child, "name": "c"}, {"id": null, "name": null}],
            "single": {"id": child},
        });

        let record = Stored::<Note>::from_value(value).unwrap();
        assert_eq!(record.joined_collections["children"].len(), 1);
        assert_eq!(record.joined_collections["single"].len(), 1);
    }

    #[test]
    fn lock_key_names_type_and_id() {
        let record = note();
        assert_eq!(record.lock_key(), format!("Note_{}.lock", record.id));
    }
}
