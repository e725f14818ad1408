//! Error types for relkit database operations.
//!
//! Every component raises [`Error`]. Driver failures are classified once,
//! when they leave the driver, into busy, constraint, and other failures so
//! the executor can decide between retrying, surfacing, and closing.

use std::fmt;

use thiserror::Error;

/// Kind of integrity constraint that rejected a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `UNIQUE` or `PRIMARY KEY` conflict.
    Unique,
    /// `NOT NULL` violation.
    NotNull,
    /// `FOREIGN KEY` violation.
    ForeignKey,
    /// `CHECK` constraint or other integrity failure.
    Check,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::NotNull => "not-null",
            ConstraintKind::ForeignKey => "foreign-key",
            ConstraintKind::Check => "check",
        })
    }
}

/// Errors that can occur during relkit database operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Requested relation does not exist.
    #[error("relation not found: {0}")]
    RelationNotFound(String),

    /// Requested attribute does not exist in the relation.
    #[error("attribute '{attribute}' not found in relation '{relation}'")]
    AttributeNotFound {
        /// Relation that was searched.
        relation: String,
        /// Missing attribute.
        attribute: String,
    },

    /// An integrity constraint rejected the statement.
    #[error("{kind} constraint violated: {message}")]
    ConstraintViolation {
        /// Constraint family.
        kind: ConstraintKind,
        /// Engine message.
        message: String,
    },

    /// Another process held the lock longer than the retry budget allows.
    #[error("database still locked after {attempts} attempts")]
    LockTimeout {
        /// Statement attempts made, including the first.
        attempts: u32,
    },

    /// The engine reported the database as busy or locked.
    ///
    /// Drivers raise this; the executor retries it and converts an
    /// exhausted budget into [`Error::LockTimeout`].
    #[error("database is locked: {0}")]
    Busy(String),

    /// The active backend dialect does not offer this capability.
    #[error("unsupported operation on this backend: {0}")]
    UnsupportedOperation(String),

    /// Rebuild-and-copy failed after the original table was renamed.
    ///
    /// The original rows are still in `temporary`.
    #[error(
        "rebuilding relation '{relation}' failed; original rows are preserved in '{temporary}': {source}"
    )]
    SchemaRebuildFailure {
        /// Relation being rebuilt.
        relation: String,
        /// Temporary table holding the original rows.
        temporary: String,
        /// Failure that interrupted the rebuild.
        #[source]
        source: Box<Error>,
    },

    /// A lookup found nothing and no replacement value was configured.
    #[error("no value found for {0}")]
    ValueNotFound(String),

    /// Name or value rejected before reaching the engine.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The connection was closed, either explicitly or after a fatal error.
    #[error("database connection is closed")]
    Closed,

    /// A callback called back into the database while one of its
    /// statements was still running, for example from a lock event.
    #[error("database re-entered while a statement is in progress")]
    Reentrant,

    /// Any other driver failure.
    #[error("database error: {0}")]
    Driver(#[from] rusqlite::Error),

    /// Identifier or schema validation failure.
    #[error("schema error: {0}")]
    Core(#[from] relkit_core::CoreError),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] relkit_config::ConfigError),

    /// JSON serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns `true` for busy/locked failures that may succeed on retry.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Returns `true` for failures that leave the connection usable.
    ///
    /// Constraint violations and lookup failures are surfaced to the caller
    /// as-is; everything else coming out of the driver is fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Driver(_))
    }

    pub(crate) fn attribute_not_found(relation: &str, attribute: &str) -> Self {
        Error::AttributeNotFound {
            relation: relation.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

/// Classifies a raw driver error.
pub(crate) fn classify_driver_error(error: rusqlite::Error) -> Error {
    use rusqlite::ErrorCode;

    if let rusqlite::Error::SqliteFailure(failure, message) = &error {
        let message = message.clone().unwrap_or_else(|| failure.to_string());
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                return Error::Busy(message);
            }
            ErrorCode::ConstraintViolation => {
                let kind = constraint_kind(failure.extended_code, &message);
                return Error::ConstraintViolation { kind, message };
            }
            _ => {}
        }
    }
    Error::Driver(error)
}

fn constraint_kind(extended_code: i32, message: &str) -> ConstraintKind {
    match extended_code {
        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
            ConstraintKind::Unique
        }
        rusqlite::ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
        rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
        _ if message.contains("UNIQUE") => ConstraintKind::Unique,
        _ if message.contains("NOT NULL") => ConstraintKind::NotNull,
        _ => ConstraintKind::Check,
    }
}

/// Convenience alias for results with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_is_classified() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT UNIQUE); INSERT INTO t VALUES ('x');")
            .unwrap();
        let raw = conn.execute("INSERT INTO t VALUES ('x')", []).unwrap_err();
        let err = classify_driver_error(raw);
        assert!(matches!(
            err,
            Error::ConstraintViolation {
                kind: ConstraintKind::Unique,
                ..
            }
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_not_null_violation_is_classified() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT NOT NULL)").unwrap();
        let raw = conn.execute("INSERT INTO t VALUES (NULL)", []).unwrap_err();
        assert!(matches!(
            classify_driver_error(raw),
            Error::ConstraintViolation {
                kind: ConstraintKind::NotNull,
                ..
            }
        ));
    }

    #[test]
    fn test_syntax_error_is_fatal() {
        let conn = Connection::open_in_memory().unwrap();
        let raw = conn.execute("SELEC 1", []).unwrap_err();
        let err = classify_driver_error(raw);
        assert!(matches!(err, Error::Driver(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_rebuild_failure_names_temporary_table() {
        let err = Error::SchemaRebuildFailure {
            relation: "Users".into(),
            temporary: "Users__rebuild".into(),
            source: Box::new(Error::Closed),
        };
        assert!(err.to_string().contains("Users__rebuild"));
    }
}
