//! Sample models.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use unibase_core::{Model, Schema};

/// A labelled integer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    /// Value.
    pub count: i64,
    /// Free-form label.
    pub label: String,
}

impl Counter {
    /// Creates a counter.
    pub fn new(count: i64, label: impl Into<String>) -> Self {
        Self {
            count,
            label: label.into(),
        }
    }
}

impl Model for Counter {
    const NAME: &'static str = "Counter";

    fn schema() -> Schema {
        Schema::builder()
            .integer("count")
            .text("label")
            .index("count")
            .build()
    }
}

/// Postal address, flattened into its owner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Address {
    /// City.
    pub city: String,
    /// Postal code.
    pub zip: String,
}

/// A person with a nested address and a list field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: i64,
    /// Home address.
    pub address: Address,
    /// Tags, stored encoded.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Person {
    /// Creates a person living in `city`.
    pub fn new(name: impl Into<String>, age: i64, city: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            address: Address {
                city: city.into(),
                zip: String::new(),
            },
            tags: Vec::new(),
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn tagged(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }
}

impl Model for Person {
    const NAME: &'static str = "Person";

    fn schema() -> Schema {
        Schema::builder()
            .text("name")
            .integer("age")
            .nested("address", |b| b.text("city").text("zip"))
            .json("tags")
            .compound_index(&["address.city", "age"])
            .build()
    }
}

/// Parent side of a one-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parent {
    /// Name.
    pub name: String,
}

impl Model for Parent {
    const NAME: &'static str = "Parent";

    fn schema() -> Schema {
        Schema::builder().text("name").build()
    }
}

/// Child side; points at its parent through the base `parent` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    /// Name.
    pub name: String,
}

impl Model for Child {
    const NAME: &'static str = "Child";

    fn schema() -> Schema {
        Schema::builder().text("name").index("parent").build()
    }
}

/// Key/value pair with a unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// Unique key.
    pub key: String,
    /// Any value.
    pub value: Value,
}

impl Setting {
    /// Creates a setting.
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Model for Setting {
    const NAME: &'static str = "Setting";

    fn schema() -> Schema {
        Schema::builder().text("key").json("value").unique("key").build()
    }
}
