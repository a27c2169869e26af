//! Common error types for the flight log

use serde::Serialize;
use thiserror::Error;

/// Common result type for flight log operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error kinds surfaced by the core
///
/// Unresolved references met while writing (soft skips) and external sink
/// failures are absorbed where they happen and never become an `Error`.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Integrity violation on insert/update/delete
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Shape or range violation on input
    #[error("Validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    /// Missing, malformed or expired credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Access gate denial
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Shorthand for a validation error on one field
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(vec![FieldViolation::new(field, message)])
    }

    /// Map a sqlx error to `Conflict` when it is an integrity violation
    ///
    /// `hint` names the entity being written so the caller learns which
    /// constraint fired. Other database errors pass through unchanged.
    pub fn from_integrity(err: sqlx::Error, hint: &str) -> Self {
        if let Some(db_err) = err.as_database_error() {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return Error::Conflict(format!("{hint}: already exists ({})", db_err.message()));
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return Error::Conflict(format!("{hint}: still referenced ({})", db_err.message()));
                }
                sqlx::error::ErrorKind::CheckViolation | sqlx::error::ErrorKind::NotNullViolation => {
                    return Error::Conflict(format!("{hint}: constraint failed ({})", db_err.message()));
                }
                _ => {}
            }
        }
        Error::Database(err)
    }
}
