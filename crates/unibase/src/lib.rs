//! # unibase
//!
//! One record API over a document store and an embedded relational store.
//!
//! The storage engine is picked from the scheme of the configured connection
//! string:
//!
//! | scheme | backend |
//! |---|---|
//! | `sqlite://<path>` | [`SqliteBackend`], `:memory:` or an empty path for a private in-memory database |
//! | `memory://` | [`DocumentBackend`] over the in-process [`MemoryDocumentStore`] |
//! | `mongodb://`, `mongodb+srv://` | [`DocumentBackend`] over MongoDB (feature `mongodb`) |
//!
//! ## Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use unibase::{Config, Filter, Model, Schema, SortOrder, Stored};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Counter {
//!     count: i64,
//! }
//!
//! impl Model for Counter {
//!     const NAME: &'static str = "Counter";
//!     fn schema() -> Schema {
//!         Schema::builder().integer("count").build()
//!     }
//! }
//!
//! let db = unibase::open(Config::new().database_string("sqlite://:memory:")).unwrap();
//! for count in [3, 1, 2] {
//!     db.create(&mut Stored::new(Counter { count }), None).unwrap();
//! }
//!
//! let items = db
//!     .find::<Counter>(None).unwrap()
//!     .filter(Filter::parse(&json!(["count", ">=", 2])).unwrap()).unwrap()
//!     .sort("count", SortOrder::Asc).unwrap()
//!     .fetch().unwrap();
//! assert_eq!(items.iter().map(|c| c.data.count).collect::<Vec<_>>(), vec![2, 3]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod open;

pub use open::{open, open_backend};
pub use unibase_core::*;
pub use unibase_document::{DocumentBackend, DocumentStore, MemoryDocumentStore};
#[cfg(feature = "mongodb")]
pub use unibase_document::MongoStore;
pub use unibase_sqlite::SqliteBackend;
