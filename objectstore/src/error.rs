//! Error types for object store operations.

use common::StorageError;

/// Error type for object store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Storage-related errors from the underlying byte store.
    Storage(String),

    /// Encoding or decoding errors for keys, records or the catalog.
    Encoding(String),

    /// Invalid arguments, such as an empty database name or version zero.
    InvalidInput(String),

    /// A named object store or index does not exist.
    NotFound(String),

    /// A write would violate a primary key or unique index constraint, or a
    /// schema change names a store or index that already exists.
    Constraint(String),

    /// A record is not shaped the way its store requires, e.g. it is missing
    /// its primary key or the key is not a valid key value.
    Data(String),

    /// A write was attempted inside a read-only transaction.
    ReadOnly(String),

    /// The connection was closed before or while the request was issued.
    InvalidState(String),

    /// The requested version is lower than the stored version.
    Version(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::Constraint(msg) => write!(f, "Constraint error: {}", msg),
            Error::Data(msg) => write!(f, "Data error: {}", msg),
            Error::ReadOnly(msg) => write!(f, "Read-only error: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Version(msg) => write!(f, "Version error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Storage(msg) => Error::Storage(msg),
            StorageError::Internal(msg) => Error::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Result type alias for object store operations.
pub type Result<T> = std::result::Result<T, Error>;
