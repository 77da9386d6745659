//! Error types for unibase.

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by backend errors.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Coarse classification of an [`Error`].
///
/// Validation errors are client-fixable and raised before any I/O.
/// Not-found and conflict outcomes are normally reported as `None` by the
/// write/read operations; the kinds exist so callers that do turn them into
/// errors can classify them. Everything else is a server error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input (filter, limit, sort key, scheme, identifier).
    Validation,
    /// Record does not exist.
    NotFound,
    /// Uniqueness violation.
    Conflict,
    /// Backend failure, maintenance window, serialization or I/O failure.
    Server,
}

/// Malformed query intent or configuration detected before touching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `limit_from` was negative.
    #[error("limit_from is less than 0")]
    NegativeLimit,

    /// `limit_from` was greater than `limit_to`.
    #[error("limit_from ({from}) is higher than limit_to ({to})")]
    LimitOrder {
        /// Start of the window.
        from: i64,
        /// End of the window.
        to: i64,
    },

    /// Sort key is empty or not part of the record schema.
    #[error("sort key not found: {key:?}")]
    UnknownSortKey {
        /// The rejected key.
        key: String,
    },

    /// Field path contains characters that cannot be lowered safely.
    #[error("invalid field name: {name:?}")]
    InvalidFieldName {
        /// The rejected name.
        name: String,
    },

    /// Storage connection string has an unknown scheme.
    #[error("unknown database type: {scheme:?}")]
    UnknownScheme {
        /// The rejected scheme.
        scheme: String,
    },

    /// A join directive did not have 3 or 4 components.
    #[error("bad join params: {params:?}")]
    BadJoin {
        /// The rejected directive.
        params: Vec<String>,
    },

    /// Permission mode string was not three octal digits.
    #[error("invalid permission mode: {mode:?}")]
    InvalidMode {
        /// The rejected mode.
        mode: String,
    },
}

/// Errors surfaced by the database façade and its backends.
#[derive(Debug, Error)]
pub enum Error {
    /// Client-fixable input problem.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed filter tree.
    #[error("error filtering data: {message}")]
    Filter {
        /// Description naming the offending node.
        message: String,
    },

    /// Export or import is running; writes are rejected.
    #[error("database is under maintenance")]
    Maintenance,

    /// Storage engine failure with the original cause preserved.
    #[error("{message}")]
    Backend {
        /// Operation context.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<BoxError>,
    },

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a filter error.
    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter {
            message: message.into(),
        }
    }

    /// Creates a backend error wrapping `source`.
    pub fn backend(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a backend error without an underlying cause.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Filter { .. } => ErrorKind::Validation,
            Self::Maintenance | Self::Backend { .. } | Self::Serialization(_) | Self::Io(_) => {
                ErrorKind::Server
            }
        }
    }

    /// Returns true for errors the caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Collapses anything that is not a validation error into a backend
    /// error carrying `context`, preserving the original as its source.
    pub(crate) fn at_boundary(self, context: &str) -> Self {
        match self {
            Self::Validation(_) | Self::Filter { .. } | Self::Maintenance => self,
            Self::Backend { .. } => self,
            other => Self::backend(format!("{context}: {other}"), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kinds() {
        let err = Error::from(ValidationError::NegativeLimit);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.is_client_error());
        assert_eq!(Error::filter("bad").kind(), ErrorKind::Validation);
    }

    #[test]
    fn boundary_preserves_source() {
        let io = io::Error::other("disk gone");
        let err = Error::from(io).at_boundary("error creating database record");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.to_string().contains("disk gone"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn boundary_keeps_validation() {
        let err = Error::filter("bad leaf").at_boundary("finding");
        assert!(matches!(err, Error::Filter { .. }));
    }
}
