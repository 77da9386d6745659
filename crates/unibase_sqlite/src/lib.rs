//! # unibase SQLite backend
//!
//! Stores each record type in its own table with one column per flattened
//! field (`address.city` becomes `address__city`), and lowers cursors into a
//! single `SELECT` with `LEFT OUTER JOIN`s.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use unibase_core::{Backend, QueryCache};
//! use unibase_sqlite::SqliteBackend;
//!
//! let backend = SqliteBackend::in_memory(Arc::new(QueryCache::new(false, 0))).unwrap();
//! assert!(backend.ok());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod codec;
mod engine;
mod error;
pub mod lower;
mod plan;
pub mod sql;

pub use backend::{SqliteBackend, DUMP_FILE};
pub use engine::IN_MEMORY;
pub use error::{SqliteError, SqliteResult};
pub use plan::SqlitePlan;
