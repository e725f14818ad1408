//! Dynamic relational access over SQLite.
//!
//! `relkit-sqlite` builds queries, inserts and updates at runtime from
//! relation and attribute names, and keeps *foreign links* transparent: an
//! attribute linked to `Names.first_name` stores the primary key of a
//! `Names` row, while callers read and write the first name itself.
//!
//! # Architecture
//!
//! - **`driver`**: the [`Driver`] seam and the [`SqliteDriver`]; dialects
//!   advertise which catalogue calls they support.
//! - **`execute`**: runs statements, retries while another process holds
//!   the lock and closes the connection on fatal errors.
//! - **`introspect`**: cached relation, attribute and schema lookups.
//! - **`foreign`** / **`usage`**: the foreign key catalogue, surrogate key
//!   resolution and per-row reference counts.
//! - **`location`**: compiles [`Location`] criteria to a `WHERE` clause.
//! - **`format`**: reverse lookups, aliases, formatters and result
//!   [`Shape`]s.
//! - **`mutation`**: DDL, including rebuild-and-copy for changes
//!   `ALTER TABLE` cannot make.
//! - **`migration`**: schema comparison and recorded revisions.
//!
//! # Quick start
//!
//! ```
//! use relkit_core::{AttributeDef, DataType, RelationSchema, Value};
//! use relkit_sqlite::{
//!     ChangeOptions, CreateOptions, Database, Get, InsertOptions, Location, Shape,
//! };
//!
//! let db = Database::open_in_memory().unwrap();
//! for schema in [
//!     RelationSchema::new("Names")
//!         .with_attribute(AttributeDef::primary_key("id"))
//!         .with_attribute(AttributeDef::new("first_name", DataType::Text)),
//!     RelationSchema::new("Users")
//!         .with_attribute(AttributeDef::primary_key("id"))
//!         .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"))
//!         .with_attribute(AttributeDef::new("age", DataType::Integer)),
//! ] {
//!     db.create_relation(&schema, CreateOptions::default()).unwrap();
//! }
//!
//! db.add_tuple("Users", [("name", Value::from("Lorem")), ("age", Value::from(26))], InsertOptions::default())
//!     .unwrap();
//! db.change_tuple("Users", [("name", "Ipsum")], &Location::new().next_to("age", 26), ChangeOptions::default())
//!     .unwrap();
//!
//! let get = Get::new().select("Users", ["name"]).location(Location::new().next_to("age", 26));
//! assert_eq!(db.get_value(&get).unwrap(), Shape::from("Ipsum"));
//! ```

mod cache;
mod database;
mod driver;
mod error;
mod events;
mod execute;
mod foreign;
mod format;
mod introspect;
mod location;
mod migration;
mod mutation;
mod query;
mod schema;
mod session;
mod usage;

pub use cache::LfuCache;
pub use database::Database;
pub use driver::{
    Capabilities, ColumnInfo, Dialect, Driver, ForeignKeyInfo, Rows, SqliteDriver,
};
pub use error::{ConstraintKind, Error, Result};
pub use events::{BEGIN_WAITING_FOR_LOCK, EventBus, LOCK_RETRY, SubscriptionId};
pub use execute::Executor;
pub use foreign::ForeignCatalogue;
pub use format::{
    Alias, FormatFn, FormatOptions, Key, Shape, ShapeOptions, ValueFormatter,
};
pub use introspect::Introspector;
pub use location::{Condition, Location, Operator, Predicate};
pub use migration::{
    AppliedRevision, MigrationStatus, REVISIONS_TABLE, Revision, SchemaDifference,
};
pub use query::{ChangeOptions, CreateOptions, Get, InsertOptions, OnConflict, Order};
pub use schema::{
    REBUILD_SUFFIX, add_column_sql, column_definition, create_table_sql, drop_table_sql,
    ColumnDefault, insert_sql, literal, parse_default, rebuild_table_name, rename_table_sql,
};
pub use usage::{UsageCounts, UsageFilter, UsageKey};
