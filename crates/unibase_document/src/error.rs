//! Error types for document store operations.

use std::io;
use thiserror::Error;

/// Result type for document store operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors raised by a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Error)]
pub enum DocumentError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A document or dump file could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `$regex` pattern did not compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A pipeline stage or operator is not understood by the store.
    #[error("unsupported pipeline: {0}")]
    Unsupported(String),

    /// A stored document does not have the expected shape.
    #[error("malformed document in {collection}: {reason}")]
    Malformed {
        /// Collection holding the document.
        collection: String,
        /// What was wrong.
        reason: String,
    },

    /// An external dump/restore tool failed.
    #[error("{tool} exited with {status}")]
    Tool {
        /// Program name.
        tool: String,
        /// Exit status rendering.
        status: String,
    },

    /// The MongoDB driver reported an error.
    #[cfg(feature = "mongodb")]
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A document could not be converted to or from BSON.
    #[cfg(feature = "mongodb")]
    #[error("bson error: {0}")]
    Bson(String),
}

impl DocumentError {
    pub(crate) fn malformed(collection: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }
}

/// Wraps a store error into the façade's backend error with `context`.
pub(crate) fn backend_error(context: &str, err: DocumentError) -> unibase_core::Error {
    unibase_core::Error::backend(format!("{context}: {err}"), err)
}
