//! # unibase testkit
//!
//! Test utilities for unibase.
//!
//! This crate provides:
//! - Sample models covering nested fields, list fields, parent/child
//!   relations and unique keys
//! - Throwaway databases over every bundled backend
//! - Property-based generators for records, filters and windows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use unibase_testkit::prelude::*;
//!
//! #[test]
//! fn counts_match() {
//!     for_each_backend(|db| {
//!         db.register::<Counter>().unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod models;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::models::*;
}

pub use fixtures::*;
pub use generators::*;
pub use models::*;
