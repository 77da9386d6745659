//! Error types for SQLite operations.

use std::io;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Errors raised by the SQLite backend.
#[derive(Debug, Error)]
pub enum SqliteError {
    /// The engine rejected a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record did not carry the column the statement needs.
    #[error("record for {table} has no {column}")]
    MissingColumn {
        /// Target table.
        table: String,
        /// Missing column.
        column: String,
    },
}

impl SqliteError {
    /// Whether the engine reported a constraint violation (UNIQUE, NOT NULL).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Wraps an engine error into the façade's backend error with `context`.
pub(crate) fn backend_error(context: &str, err: impl Into<SqliteError>) -> unibase_core::Error {
    let err = err.into();
    unibase_core::Error::backend(format!("{context}: {err}"), err)
}
