//! Error types for the engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Front-end errors
    #[error("Lexical error at position {position}: {message}")]
    Lex { message: String, position: usize },

    #[error("Syntax error{}: {message}", .position.map(|p| format!(" at position {p}")).unwrap_or_default())]
    Syntax {
        message: String,
        position: Option<usize>,
    },

    // Catalog errors
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Ambiguous column reference: {0}")]
    AmbiguousColumn(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("View already exists: {0}")]
    ViewAlreadyExists(String),

    #[error("Database not found: {0}")]
    DatabaseNotFound(String),

    #[error("Database already exists: {0}")]
    DatabaseAlreadyExists(String),

    // Value errors
    #[error("Data type error: {0}")]
    DataType(String),

    // Constraint errors
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Conflict resolution error: {0}")]
    ConflictResolution(String),

    #[error("View linkage error: {0}")]
    ViewLinkage(String),

    // System errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    pub(crate) fn syntax(message: impl Into<String>, position: Option<usize>) -> Self {
        Self::Syntax {
            message: message.into(),
            position,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl<T: std::fmt::Debug> From<ciborium::ser::Error<T>> for Error {
    fn from(e: ciborium::ser::Error<T>) -> Self {
        Self::Storage(format!("failed to encode: {e}"))
    }
}

impl<T: std::fmt::Debug> From<ciborium::de::Error<T>> for Error {
    fn from(e: ciborium::de::Error<T>) -> Self {
        Self::Storage(format!("failed to decode: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_message_with_position() {
        let err = Error::syntax("expected ')'", Some(12));
        assert_eq!(err.to_string(), "Syntax error at position 12: expected ')'");

        let err = Error::syntax("unexpected end of input", None);
        assert_eq!(err.to_string(), "Syntax error: unexpected end of input");
    }

    #[test]
    fn test_io_error_becomes_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert!(matches!(Error::from(io), Error::Storage(_)));
    }
}
