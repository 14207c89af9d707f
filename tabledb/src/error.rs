//! Error types for TableDb construction.
//!
//! Table operations report through [`ResponseMessage`](crate::ResponseMessage);
//! this type only covers failures that happen before a database exists.

/// Error type for opening a [`Database`](crate::Database) or
/// [`Memory`](crate::Memory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid input or parameter errors, e.g. an empty database name.
    InvalidInput(String),

    /// The engine could not open the database.
    Storage(objectstore::Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::Storage(err) => write!(f, "Failed to open database: {}", err),
        }
    }
}

impl From<objectstore::Error> for Error {
    fn from(err: objectstore::Error) -> Self {
        Error::Storage(err)
    }
}

/// Result type alias for TableDb construction.
pub type Result<T> = std::result::Result<T, Error>;
