//! Database connection settings.
//!
//! [`DatabaseConfig`] holds everything a relkit database needs to open a
//! connection: where the data lives, which driver family to use, how to
//! react to another process holding the lock, and whether writes are
//! committed automatically.
//!
//! Settings usually come from an external settings file. The external key
//! names (`fileName`, `connectionType`, `multiProcess`, ...) are accepted by
//! every loader.
//!
//! # Example YAML
//!
//! ```yaml
//! fileName: data/app.db
//! connectionType: sqlite
//! multiProcess: -1
//! multiProcess_delay: 250
//! readOnly: false
//! ```

use std::collections::HashMap;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Driver family used to reach the database.
///
/// The families differ in what catalogue metadata they expose: the
/// embedded engine reports keys and foreign links, the ODBC-style drivers
/// only report tables and columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Embedded file-based engine (the default).
    #[default]
    Sqlite,
    /// Desktop-file database reached through an ODBC driver.
    Access,
    /// Generic ODBC data source.
    Odbc,
}

impl FromStr for ConnectionType {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "access" | "msaccess" => Ok(Self::Access),
            "odbc" => Ok(Self::Odbc),
            _ => Err(ConfigError::InvalidValue {
                key: "connectionType".to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

/// How long and how often to wait for a lock held by another process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first busy failure; `None` retries forever.
    pub max_retries: Option<u32>,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Policy that surfaces the first busy failure immediately.
    pub fn none() -> Self {
        Self {
            max_retries: Some(0),
            delay: Duration::ZERO,
        }
    }

    /// Returns `true` if another attempt is allowed after `retries_done`.
    pub fn allows(&self, retries_done: u32) -> bool {
        self.max_retries.is_none_or(|max| retries_done < max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

fn default_delay() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    256
}

/// Connection settings for one database.
///
/// # Examples
///
/// ```
/// use relkit_config::{ConnectionType, DatabaseConfig};
///
/// let config = DatabaseConfig::sqlite("app.db");
/// assert_eq!(config.connection_type, ConnectionType::Sqlite);
/// assert!(config.auto_save);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file; `":memory:"` opens a private in-memory database.
    #[serde(rename = "fileName", default)]
    pub file_name: Option<PathBuf>,
    /// Server host for ODBC data sources.
    #[serde(default)]
    pub host: Option<String>,
    /// Server port for ODBC data sources.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login name.
    #[serde(default)]
    pub user: Option<String>,
    /// Login password.
    #[serde(default)]
    pub password: Option<String>,
    /// Driver family.
    #[serde(rename = "connectionType", default)]
    pub connection_type: ConnectionType,
    /// Lock retry budget: `0` disables retrying, `n > 0` allows `n`
    /// retries, any negative value retries until the lock is released.
    #[serde(rename = "multiProcess", default)]
    pub multi_process: i64,
    /// Milliseconds to sleep between lock retries.
    #[serde(rename = "multiProcess_delay", default = "default_delay")]
    pub multi_process_delay: u64,
    /// Opens the database without write access.
    #[serde(rename = "readOnly", default)]
    pub read_only: bool,
    /// Commits after every write operation.
    #[serde(rename = "autoSave", default = "default_true")]
    pub auto_save: bool,
    /// Entries kept per result cache before least-frequently-used eviction.
    #[serde(rename = "cacheCapacity", default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: None,
            host: None,
            port: None,
            user: None,
            password: None,
            connection_type: ConnectionType::Sqlite,
            multi_process: 0,
            multi_process_delay: default_delay(),
            read_only: false,
            auto_save: true,
            cache_capacity: default_cache_capacity(),
        }
    }
}

impl DatabaseConfig {
    /// Settings for an embedded database file.
    pub fn sqlite(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Settings for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::sqlite(":memory:")
    }

    /// Builds settings from a flat key/value mapping.
    ///
    /// Keys use the external names (`fileName`, `multiProcess_delay`, ...).
    /// Unknown keys are ignored so a shared settings file can carry other
    /// sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a known key holds a value
    /// that does not parse.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use relkit_config::DatabaseConfig;
    ///
    /// let mut map = HashMap::new();
    /// map.insert("fileName".to_string(), "app.db".to_string());
    /// map.insert("multiProcess".to_string(), "-1".to_string());
    ///
    /// let config = DatabaseConfig::from_map(&map).unwrap();
    /// assert_eq!(config.retry_policy().max_retries, None);
    /// ```
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "fileName" => config.file_name = non_empty(value).map(PathBuf::from),
                "host" => config.host = non_empty(value).map(str::to_string),
                "port" => config.port = non_empty(value).map(|v| parse(key, v)).transpose()?,
                "user" => config.user = non_empty(value).map(str::to_string),
                "password" => config.password = non_empty(value).map(str::to_string),
                "connectionType" => config.connection_type = value.parse()?,
                "multiProcess" => config.multi_process = parse(key, value)?,
                "multiProcess_delay" => config.multi_process_delay = parse(key, value)?,
                "readOnly" => config.read_only = parse_flag(key, value)?,
                "autoSave" => config.auto_save = parse_flag(key, value)?,
                "cacheCapacity" => config.cache_capacity = parse(key, value)?,
                _ => {}
            }
        }
        Ok(config)
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read, or
    /// [`ConfigError::YamlError`] if parsing fails.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read, or
    /// [`ConfigError::JsonError`] if parsing fails.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Saves the settings as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be written, or
    /// [`ConfigError::YamlError`] if serialization fails.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Checks that the settings name a database to open.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingLocation`] when neither `fileName`
    /// nor `host` is set.
    pub fn validate(&self) -> Result<()> {
        if self.file_name.is_none() && self.host.is_none() {
            return Err(ConfigError::MissingLocation);
        }
        Ok(())
    }

    /// Returns `true` for a private in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.file_name
            .as_deref()
            .is_some_and(|path| path == Path::new(":memory:"))
    }

    /// Lock retry policy derived from `multiProcess` settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        let max_retries = if self.multi_process < 0 {
            None
        } else {
            Some(u32::try_from(self.multi_process).unwrap_or(u32::MAX))
        };
        RetryPolicy {
            max_retries,
            delay: Duration::from_millis(self.multi_process_delay),
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
fileName: data/app.db
connectionType: sqlite
multiProcess: 3
multiProcess_delay: 250
readOnly: true
"#
    }

    fn map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_deserialize_yaml_with_defaults() {
        let config: DatabaseConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.file_name, Some(PathBuf::from("data/app.db")));
        assert_eq!(config.multi_process, 3);
        assert_eq!(config.multi_process_delay, 250);
        assert!(config.read_only);
        assert!(config.auto_save);
        assert_eq!(config.cache_capacity, 256);
    }

    #[test]
    fn test_from_map_parses_known_keys() {
        let config = DatabaseConfig::from_map(&map(&[
            ("fileName", "app.db"),
            ("connectionType", "Access"),
            ("multiProcess", "2"),
            ("multiProcess_delay", "10"),
            ("readOnly", "yes"),
            ("theme", "dark"),
        ]))
        .unwrap();
        assert_eq!(config.connection_type, ConnectionType::Access);
        assert!(config.read_only);
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                max_retries: Some(2),
                delay: Duration::from_millis(10),
            }
        );
    }

    #[test]
    fn test_from_map_rejects_bad_values() {
        let err = DatabaseConfig::from_map(&map(&[("multiProcess", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "multiProcess"));

        let err = DatabaseConfig::from_map(&map(&[("connectionType", "oracle")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_negative_multi_process_retries_forever() {
        let config = DatabaseConfig {
            multi_process: -1,
            ..DatabaseConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, None);
        assert!(policy.allows(1_000_000));
    }

    #[test]
    fn test_bounded_policy() {
        let policy = RetryPolicy {
            max_retries: Some(2),
            delay: Duration::ZERO,
        };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
        assert!(!RetryPolicy::none().allows(0));
    }

    #[test]
    fn test_validate_requires_location() {
        assert!(matches!(
            DatabaseConfig::default().validate(),
            Err(ConfigError::MissingLocation)
        ));
        let remote = DatabaseConfig {
            host: Some("db.local".into()),
            connection_type: ConnectionType::Odbc,
            ..DatabaseConfig::default()
        };
        assert!(remote.validate().is_ok());
    }

    #[test]
    fn test_in_memory() {
        assert!(DatabaseConfig::in_memory().is_in_memory());
        assert!(!DatabaseConfig::sqlite("a.db").is_in_memory());
    }

    #[test]
    fn test_yaml_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.yml");
        let original: DatabaseConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        original.save_yaml(&path).unwrap();
        assert_eq!(DatabaseConfig::load_yaml(&path).unwrap(), original);
    }

    #[test]
    fn test_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, r#"{"fileName": "x.db", "autoSave": false}"#).unwrap();
        let config = DatabaseConfig::load_json(&path).unwrap();
        assert_eq!(config.file_name, Some(PathBuf::from("x.db")));
        assert!(!config.auto_save);
    }
}
