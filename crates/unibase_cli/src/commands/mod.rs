//! CLI command implementations.

pub mod count;
pub mod info;
pub mod maintenance;
