//! Repository utilities.

use diesel::result::DatabaseErrorInformation;

/// Largest id list bound into a single `IN (...)` clause.
pub const BATCH_SIZE: usize = 500;

/// Simple error info wrapper for database errors.
#[derive(Debug)]
pub struct DbErrorInfo(pub String);

impl DatabaseErrorInformation for DbErrorInfo {
    fn message(&self) -> &str {
        &self.0
    }
    fn details(&self) -> Option<&str> {
        None
    }
    fn hint(&self) -> Option<&str> {
        None
    }
    fn table_name(&self) -> Option<&str> {
        None
    }
    fn column_name(&self) -> Option<&str> {
        None
    }
    fn constraint_name(&self) -> Option<&str> {
        None
    }
    fn statement_position(&self) -> Option<i32> {
        None
    }
}

/// Convert any displayable error to a diesel error with proper message.
pub fn to_diesel_error(e: impl std::fmt::Display) -> diesel::result::Error {
    diesel::result::Error::DatabaseError(
        diesel::result::DatabaseErrorKind::Unknown,
        Box::new(DbErrorInfo(e.to_string())),
    )
}

/// Wrap a JSON column decode failure.
pub fn json_error(column: &str, e: serde_json::Error) -> diesel::result::Error {
    diesel::result::Error::DeserializationError(format!("Invalid JSON in {}: {}", column, e).into())
}

/// Wrap an unknown enum value read from a text column.
pub fn enum_error(column: &str, value: &str) -> diesel::result::Error {
    diesel::result::Error::DeserializationError(
        format!("Invalid {}: '{}'", column, value).into(),
    )
}
