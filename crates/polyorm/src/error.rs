//! Error types for polyorm

use std::time::Duration;
use thiserror::Error;

/// Result type alias for polyorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for statement synthesis and execution
#[derive(Debug, Error)]
pub enum OrmError {
    /// Table or column name failed identifier validation
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// INSERT/UPDATE called without any column to write
    #[error("No columns to write for table '{table}'")]
    EmptyColumnSet { table: String },

    /// Catalog query failed or returned nothing usable
    #[error("Schema lookup failed for '{table}': {message}")]
    SchemaLookupFailed { table: String, message: String },

    /// Zero rows affected while optimistic locking was engaged and the row exists
    #[error("Version conflict on '{table}': expected version {expected}")]
    VersionConflict { table: String, expected: i64 },

    /// Fewer arguments than placeholders
    #[error("Placeholder count mismatch: statement has {expected} placeholders, got {actual} arguments")]
    PlaceholderCountMismatch { expected: usize, actual: usize },

    /// Opaque error from the underlying driver, annotated with the attempted SQL
    #[error("{}", format_driver(message, sql.as_deref(), *elapsed))]
    Driver {
        message: String,
        sql: Option<String>,
        elapsed: Option<Duration>,
    },

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The client cannot perform the requested capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Operation cancelled after its timeout expired
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// A batch aborted part-way; `affected` rows were written before the failure
    #[error("Batch aborted after {affected} affected rows: {source}")]
    Batch {
        affected: u64,
        #[source]
        source: Box<OrmError>,
    },

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),
}

fn format_driver(message: &str, sql: Option<&str>, elapsed: Option<Duration>) -> String {
    let mut out = format!("Driver error: {message}");
    if let Some(elapsed) = elapsed {
        out.push_str(&format!(" (after {elapsed:?})"));
    }
    if let Some(sql) = sql {
        out.push_str(&format!(" [sql: {sql}]"));
    }
    out
}

impl OrmError {
    /// Wrap a driver error without annotation.
    pub fn driver(err: impl std::fmt::Display) -> Self {
        Self::Driver {
            message: err.to_string(),
            sql: None,
            elapsed: None,
        }
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a version conflict error
    pub fn version_conflict(table: impl Into<String>, expected: i64) -> Self {
        Self::VersionConflict {
            table: table.into(),
            expected,
        }
    }

    /// Attach the attempted SQL and elapsed time to a driver error.
    ///
    /// Other variants pass through untouched.
    pub fn annotate(self, sql: &str, elapsed: Duration) -> Self {
        match self {
            Self::Driver {
                message,
                sql: None,
                elapsed: None,
            } => Self::Driver {
                message,
                sql: Some(sql.to_string()),
                elapsed: Some(elapsed),
            },
            other => other,
        }
    }

    /// Check if this is a version conflict error
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Check if this error came from the driver
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::Driver { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for OrmError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::driver(err)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for OrmError {
    fn from(err: rusqlite::Error) -> Self {
        Self::driver(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_adds_sql_and_duration_to_driver_errors() {
        let err = OrmError::driver("syntax error").annotate("SELECT x", Duration::from_millis(3));
        match &err {
            OrmError::Driver { sql, elapsed, .. } => {
                assert_eq!(sql.as_deref(), Some("SELECT x"));
                assert_eq!(*elapsed, Some(Duration::from_millis(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
        let text = err.to_string();
        assert!(text.contains("syntax error"));
        assert!(text.contains("SELECT x"));
    }

    #[test]
    fn annotate_leaves_other_errors_alone() {
        let err = OrmError::version_conflict("items", 3).annotate("UPDATE", Duration::ZERO);
        assert!(err.is_version_conflict());
    }
}
