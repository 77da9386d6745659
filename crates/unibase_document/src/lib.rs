//! # unibase document backend
//!
//! Stores records as `{_id, body}` documents and lowers cursors into
//! aggregation pipelines.
//!
//! ## Stores
//!
//! - [`MemoryDocumentStore`] - in-process, used for `memory://` and tests
//! - `MongoStore` - MongoDB over the sync driver (feature `mongodb`)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use unibase_core::{Backend, QueryCache};
//! use unibase_document::{DocumentBackend, MemoryDocumentStore};
//!
//! let backend = DocumentBackend::new(
//!     Arc::new(MemoryDocumentStore::new()),
//!     Arc::new(QueryCache::new(false, 0)),
//! );
//! assert!(backend.ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
pub mod lower;
mod memory;
#[cfg(feature = "mongodb")]
mod mongo;
pub mod pipeline;
mod plan;
mod store;

pub use backend::{DocumentBackend, SEQUENCE_COLLECTION};
pub use error::{DocumentError, DocumentResult};
pub use memory::MemoryDocumentStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;
pub use pipeline::Stage;
pub use plan::{DocumentPlan, DEFAULT_SORT};
pub use store::{DocumentStore, IndexSpec, WriteOutcome};
