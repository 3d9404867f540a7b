//! Database value parsing utilities
//!
//! Provides error-safe parsing of stored values.

use rusqlite::Error as SqlError;
use serde_json::Value;

/// Parse a JSON document body from a database text column
pub fn parse_body(s: &str) -> Result<Value, SqlError> {
    serde_json::from_str(s).map_err(|e| {
        SqlError::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse an optional body; `NULL` marks a deleted document
pub fn parse_body_opt(s: Option<String>) -> Result<Option<Value>, SqlError> {
    s.map(|s| parse_body(&s)).transpose()
}

/// Versions are stored as SQLite integers
pub fn version_from_i64(value: i64) -> u64 {
    value.max(0) as u64
}

/// Extension trait for converting rusqlite Results to Option
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, SqlError>;
}

impl<T> OptionalExt<T> for Result<T, SqlError> {
    fn optional(self) -> Result<Option<T>, SqlError> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(SqlError::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
