//! Warehouse and checkpoint error types.

use settle_types::key::KeyError;

/// Errors produced by sessions and the checkpoint store.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Underlying `PostgreSQL` failure.
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored checkpoint does not match the pipeline's key schema.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] KeyError),

    /// A column value could not be read as the requested type.
    #[error("column {column}: expected {expected}, found {found}")]
    Decode {
        column: usize,
        expected: &'static str,
        found: String,
    },

    /// Result column of a type the value model does not cover.
    #[error("column `{column}` has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    /// Schema or table name that cannot be used as an identifier.
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_error_displays_context() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(1),
            Some("table not found".into()),
        );
        let err = StateError::Sqlite(inner);
        let msg = err.to_string();
        assert!(msg.contains("sqlite"), "got: {msg}");
    }

    #[test]
    fn decode_error_names_column_and_types() {
        let err = StateError::Decode {
            column: 2,
            expected: "int",
            found: "text".into(),
        };
        assert_eq!(err.to_string(), "column 2: expected int, found text");
    }

    #[test]
    fn key_error_wraps() {
        let err = StateError::from(KeyError::UnsupportedVersion(3));
        assert!(err.to_string().contains("unsupported checkpoint version 3"));
    }
}
