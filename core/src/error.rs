//! Error types for core schema and identifier handling.

use thiserror::Error;

/// Errors raised while normalizing identifiers or building schemas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Identifier is empty or contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid identifier '{0}': must be non-empty, alphanumeric or underscore, and not start with a digit")]
    InvalidIdentifier(String),

    /// Declared SQL type could not be mapped to a logical data type.
    #[error("unknown data type: {0}")]
    UnknownDataType(String),

    /// A relation definition names the same attribute twice.
    #[error("duplicate attribute '{attribute}' in relation '{relation}'")]
    DuplicateAttribute {
        /// Relation being defined.
        relation: String,
        /// Repeated attribute name.
        attribute: String,
    },

    /// A relation definition declares more than one primary key.
    #[error("relation '{0}' declares more than one primary key")]
    MultiplePrimaryKeys(String),
}

/// Convenience alias for results with [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;
