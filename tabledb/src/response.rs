//! The response envelope shared by every table operation.

use serde::{Serialize, Serializer};

/// Outcome status, numbered after the HTTP status it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "u16")]
pub enum Status {
    Ok,
    Created,
    BadRequest,
    NotFound,
    Conflict,
    Internal,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::BadRequest => 400,
            Status::NotFound => 404,
            Status::Conflict => 409,
            Status::Internal => 500,
        }
    }
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        status.code()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Uniform result shape for success and failure.
///
/// `error` carries the engine error behind a 500; `schema` echoes the
/// registered columns after table creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMessage {
    pub message: String,
    pub status: Status,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<objectstore::Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<String>>,
}

fn serialize_error<S: Serializer>(
    error: &Option<objectstore::Error>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.collect_str(error),
        None => serializer.serialize_none(),
    }
}

impl ResponseMessage {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            error: None,
            schema: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(Status::Ok, message)
    }

    pub fn created(message: impl Into<String>) -> Self {
        Self::new(Status::Created, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Status::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Status::Conflict, message)
    }

    /// A 500 carrying the engine error that caused it.
    pub fn internal(message: impl Into<String>, error: objectstore::Error) -> Self {
        Self {
            error: Some(error),
            ..Self::new(Status::Internal, message)
        }
    }

    pub fn with_schema(mut self, schema: Vec<String>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn code(&self) -> u16 {
        self.status.code()
    }
}

impl std::fmt::Display for ResponseMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{} {} ({})", self.status, self.message, error),
            None => write!(f, "{} {}", self.status, self.message),
        }
    }
}

impl std::error::Error for ResponseMessage {}

/// Result of an envelope-producing operation. Both sides carry a
/// [`ResponseMessage`] (or the looked-up data on success).
pub type Outcome<T = ResponseMessage> = std::result::Result<T, ResponseMessage>;

/// Result of a point lookup. A missing record is a normal outcome carrying
/// a 404 envelope, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    NotFound(ResponseMessage),
}

impl<T> Lookup<T> {
    pub(crate) fn missing() -> Self {
        Lookup::NotFound(ResponseMessage::not_found("Record not found."))
    }

    pub fn status(&self) -> Status {
        match self {
            Lookup::Found(_) => Status::Ok,
            Lookup::NotFound(response) => response.status,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound(_) => None,
        }
    }
}
