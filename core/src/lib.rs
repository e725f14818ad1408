//! Core value, criteria and schema types for relkit.
//!
//! This crate defines the vocabulary every relkit backend speaks:
//!
//! - [`Value`]: one cell, mirroring the engine's storage classes.
//! - [`Criteria`]: a query slot holding a scalar, a list, or a mapping.
//! - [`RelationSchema`] / [`AttributeDef`] / [`ForeignLink`]: the relation
//!   data model, as introspected or as requested.
//! - [`RelationDefinition`]: composes reusable field groups
//!   ([`ChoiceFields`], [`EditableFields`], [`DateFields`]) into a schema.
//!
//! Normalization helpers ([`validate_identifier`], [`quote_identifier`],
//! [`ensure_list`], [`coerce_bool`]) canonicalize caller input once so the
//! query compiler never has to re-inspect it.
//!
//! # Example
//!
//! ```
//! use relkit_core::*;
//!
//! let users = RelationSchema::new("Users")
//!     .with_attribute(AttributeDef::primary_key("id"))
//!     .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"))
//!     .with_attribute(AttributeDef::new("age", DataType::Integer));
//!
//! assert!(users.validate().is_ok());
//! assert_eq!(users.primary_key(), Some("id"));
//! assert_eq!(users.foreign_links()["name"], ForeignLink::new("Names", "first_name"));
//! ```

mod criteria;
mod error;
mod field_groups;
mod normalize;
mod schema;
mod value;

pub use criteria::Criteria;
pub use error::{CoreError, Result};
pub use field_groups::{
    ChoiceFields, DateFields, EditableFields, RelationDefinition, TIMESTAMP_FORMAT,
};
pub use normalize::{coerce_bool, dedup_names, ensure_list, quote_identifier, validate_identifier};
pub use schema::{AttributeDef, DataType, ForeignLink, RelationSchema, SchemaReport};
pub use value::Value;
