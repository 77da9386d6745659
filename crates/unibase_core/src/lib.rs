//! # unibase core
//!
//! Storage-independent half of unibase.
//!
//! This crate provides:
//! - The stored record shape ([`Stored`], [`Model`]) and its metadata
//! - Schemas and the column projector used for DDL and row codecs
//! - The portable filter algebra
//! - Cursors over backend query plans, and serializable query params
//! - Write-path events, the count cache, export archives and the task pool
//! - The [`Database`] façade and the [`Backend`] seam implemented by the
//!   document and relational backends

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
mod backend;
mod cache;
mod config;
mod cursor;
mod database;
mod error;
pub mod events;
mod filter;
mod params;
pub mod record;
pub mod schema;
mod stats;
mod tasks;

pub use backend::{Backend, BackendKind};
pub use cache::{CacheLookup, QueryCache};
pub use config::{Config, Scheme};
pub use cursor::{Cursor, Join, QueryPlan, SortOrder};
pub use database::Database;
pub use error::{BoxError, Error, ErrorKind, Result, ValidationError};
pub use events::{Event, EventBus, EventKind, ListenerId};
pub use filter::{validate_field_name, Condition, Filter, FilterValue, Operator};
pub use params::{Items, Page, QueryParams};
pub use record::{Model, ModelMeta, Permission, Permissions, Stored};
pub use schema::{Column, ColumnType, Field, FieldType, Schema, SchemaBuilder};
pub use stats::{BackendCounters, DatabaseStats, StatsSnapshot};
pub use tasks::{TaskHandle, TaskPool};
