//! Connection settings for relkit databases.
//!
//! The settings file itself belongs to the host application; this crate
//! only turns whatever it holds (a flat key/value mapping, a YAML file, or
//! a JSON file) into a validated [`DatabaseConfig`] and derives the lock
//! [`RetryPolicy`] from it.
//!
//! # Example
//!
//! ```
//! use relkit_config::DatabaseConfig;
//!
//! let config: DatabaseConfig = serde_yaml::from_str("fileName: app.db\nmultiProcess: 5\n").unwrap();
//! assert_eq!(config.retry_policy().max_retries, Some(5));
//! ```

mod config;
mod error;

pub use config::{ConnectionType, DatabaseConfig, RetryPolicy};
pub use error::{ConfigError, Result};
