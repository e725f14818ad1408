//! Driver seam between relkit and the SQL engine.
//!
//! [`Driver`] is the only place SQL actually runs. Everything above it
//! (introspection, predicate compilation, foreign-key bookkeeping) talks to
//! the engine through this trait, so a backend only has to provide
//! statement execution and whatever catalogue metadata it can.
//!
//! Backends differ in catalogue support: the embedded engine reports
//! primary keys, unique indexes and foreign keys; ODBC-style drivers for
//! desktop-file databases only report tables and columns. The default
//! catalogue methods therefore fail with
//! [`Error::UnsupportedOperation`] and [`SqliteDriver`] overrides them.

use std::path::Path;

use relkit_config::ConnectionType;
use relkit_core::{Value, quote_identifier};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, params_from_iter};
use tracing::debug;

use crate::error::{Error, Result, classify_driver_error};

/// Result rows of a query, column names first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Row values, one vector per row in column order.
    pub values: Vec<Vec<Value>>,
}

impl Rows {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the query produced no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// First value of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.values.first().and_then(|row| row.first())
    }

    /// Values of column `index` across all rows.
    pub fn column(&self, index: usize) -> Vec<Value> {
        self.values
            .iter()
            .filter_map(|row| row.get(index).cloned())
            .collect()
    }
}

/// One column as reported by the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared SQL type, possibly empty.
    pub declared_type: String,
    /// `NOT NULL` flag.
    pub not_null: bool,
    /// Default expression as SQL text.
    pub default_sql: Option<String>,
    /// 1-based position in the primary key, `0` if not part of it.
    pub primary_key_position: u32,
}

/// One foreign key edge as reported by the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// Domestic column.
    pub from: String,
    /// Referenced relation.
    pub table: String,
    /// Referenced column.
    pub to: String,
}

/// SQL dialect family of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Embedded file engine.
    Sqlite,
    /// Desktop-file database through ODBC.
    Access,
    /// Generic ODBC data source.
    Odbc,
}

impl From<ConnectionType> for Dialect {
    fn from(connection_type: ConnectionType) -> Self {
        match connection_type {
            ConnectionType::Sqlite => Dialect::Sqlite,
            ConnectionType::Access => Dialect::Access,
            ConnectionType::Odbc => Dialect::Odbc,
        }
    }
}

/// Catalogue and DDL capabilities of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Foreign keys can be listed.
    pub foreign_keys: bool,
    /// Primary keys and unique indexes can be listed.
    pub primary_keys: bool,
    /// Tables can be renamed, which rebuild-and-copy depends on.
    pub rename_table: bool,
}

impl Dialect {
    /// Capabilities of the dialect.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Dialect::Sqlite => Capabilities {
                foreign_keys: true,
                primary_keys: true,
                rename_table: true,
            },
            Dialect::Access => Capabilities {
                foreign_keys: false,
                primary_keys: false,
                rename_table: false,
            },
            Dialect::Odbc => Capabilities {
                foreign_keys: false,
                primary_keys: true,
                rename_table: true,
            },
        }
    }
}

/// Statement execution and catalogue access for one connection.
pub trait Driver: Send {
    /// Dialect family.
    fn dialect(&self) -> Dialect;

    /// Capabilities; defaults to the dialect's.
    fn capabilities(&self) -> Capabilities {
        self.dialect().capabilities()
    }

    /// Runs a statement that returns no rows; returns affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Runs several `;`-separated statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Runs a query and collects every row.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows>;

    /// Row id generated by the most recent successful insert.
    fn last_insert_id(&self) -> i64;

    /// Starts an explicit transaction.
    fn begin(&mut self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    /// Commits the open transaction, if any.
    fn commit(&mut self) -> Result<()>;

    /// Rolls back the open transaction, if any.
    fn rollback(&mut self) -> Result<()>;

    /// Returns `true` while an explicit transaction is open.
    fn in_transaction(&self) -> bool;

    /// Names of all user relations.
    fn relation_names(&mut self) -> Result<Vec<String>>;

    /// Column metadata for `relation`; empty if the relation is unknown.
    fn table_info(&mut self, relation: &str) -> Result<Vec<ColumnInfo>>;

    /// Foreign keys declared on `relation`.
    fn foreign_key_list(&mut self, relation: &str) -> Result<Vec<ForeignKeyInfo>> {
        let _ = relation;
        Err(Error::UnsupportedOperation(
            "foreign key catalogue".to_string(),
        ))
    }

    /// Column lists of the unique indexes on `relation`, primary key excluded.
    fn unique_indexes(&mut self, relation: &str) -> Result<Vec<Vec<String>>> {
        let _ = relation;
        Err(Error::UnsupportedOperation("unique index catalogue".to_string()))
    }

    /// Stored `CREATE TABLE` text, when the catalogue keeps it.
    fn create_sql(&mut self, relation: &str) -> Result<Option<String>> {
        let _ = relation;
        Ok(None)
    }

    /// Releases the connection. Later calls fail with [`Error::Closed`].
    fn close(&mut self);

    /// Returns `true` after [`close`](Self::close).
    fn is_closed(&self) -> bool;
}

/// [`Driver`] for the embedded SQLite engine.
pub struct SqliteDriver {
    conn: Option<Connection>,
}

impl SqliteDriver {
    /// Opens (or creates) a database file.
    ///
    /// `read_only` opens the file without write access; it must already exist.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let opened = if path == Path::new(":memory:") {
            Connection::open_in_memory()
        } else if read_only {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI,
            )
        } else {
            Connection::open(path)
        };
        let conn = opened.map_err(classify_driver_error)?;
        debug!(path = %path.display(), read_only, "opened sqlite connection");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(classify_driver_error)?)
    }

    /// Wraps an existing connection.
    ///
    /// Foreign links are logical: the declared referenced column holds the
    /// caller-visible value while the domestic column stores the referenced
    /// row id, so engine-level enforcement stays off.
    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(classify_driver_error)?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(Error::Closed)
    }
}

fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(v) => rusqlite::types::Value::Integer(*v),
        Value::Real(v) => rusqlite::types::Value::Real(*v),
        Value::Text(v) => rusqlite::types::Value::Text(v.clone()),
        Value::Blob(v) => rusqlite::types::Value::Blob(v.clone()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let conn = self.conn()?;
        conn.execute(sql, params_from_iter(params.iter().map(to_sql_value)))
            .map_err(classify_driver_error)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn()?
            .execute_batch(sql)
            .map_err(classify_driver_error)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(classify_driver_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sql_value)))
            .map_err(classify_driver_error)?;
        let mut values = Vec::new();
        while let Some(row) = rows.next().map_err(classify_driver_error)? {
            let mut record = Vec::with_capacity(width);
            for index in 0..width {
                record.push(from_sql_value(
                    row.get_ref(index).map_err(classify_driver_error)?,
                ));
            }
            values.push(record);
        }
        Ok(Rows { columns, values })
    }

    fn last_insert_id(&self) -> i64 {
        self.conn
            .as_ref()
            .map(Connection::last_insert_rowid)
            .unwrap_or_default()
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction() {
            self.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|conn| !conn.is_autocommit())
    }

    fn relation_names(&mut self) -> Result<Vec<String>> {
        let rows = self.query(
            r"SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\_%' ESCAPE '\' ORDER BY name",
            &[],
        )?;
        Ok(rows
            .column(0)
            .into_iter()
            .filter_map(|v| v.as_text().map(str::to_string))
            .collect())
    }

    fn table_info(&mut self, relation: &str) -> Result<Vec<ColumnInfo>> {
        let rows = self.query(
            &format!("PRAGMA table_info({})", quote_identifier(relation)?),
            &[],
        )?;
        // cid, name, type, notnull, dflt_value, pk
        Ok(rows
            .values
            .into_iter()
            .map(|row| ColumnInfo {
                name: row[1].as_text().unwrap_or_default().to_string(),
                declared_type: row[2].as_text().unwrap_or_default().to_string(),
                not_null: row[3].truthy(),
                default_sql: row[4].as_text().map(str::to_string),
                primary_key_position: row[5]
                    .as_integer()
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or(0),
            })
            .collect())
    }

    fn foreign_key_list(&mut self, relation: &str) -> Result<Vec<ForeignKeyInfo>> {
        let rows = self.query(
            &format!("PRAGMA foreign_key_list({})", quote_identifier(relation)?),
            &[],
        )?;
        // id, seq, table, from, to, on_update, on_delete, match
        Ok(rows
            .values
            .into_iter()
            .map(|row| ForeignKeyInfo {
                table: row[2].as_text().unwrap_or_default().to_string(),
                from: row[3].as_text().unwrap_or_default().to_string(),
                to: row[4].as_text().unwrap_or_default().to_string(),
            })
            .collect())
    }

    fn unique_indexes(&mut self, relation: &str) -> Result<Vec<Vec<String>>> {
        let indexes = self.query(
            &format!("PRAGMA index_list({})", quote_identifier(relation)?),
            &[],
        )?;
        let mut unique = Vec::new();
        // seq, name, unique, origin, partial
        for index in indexes.values {
            if !index[2].truthy() || index[3].as_text() == Some("pk") {
                continue;
            }
            let Some(index_name) = index[1].as_text() else {
                continue;
            };
            let info = self.query(
                &format!("PRAGMA index_info(\"{}\")", index_name.replace('"', "\"\"")),
                &[],
            )?;
            // seqno, cid, name
            let columns: Vec<String> = info
                .values
                .iter()
                .filter_map(|row| row[2].as_text().map(str::to_string))
                .collect();
            if !columns.is_empty() {
                unique.push(columns);
            }
        }
        Ok(unique)
    }

    fn create_sql(&mut self, relation: &str) -> Result<Option<String>> {
        let rows = self.query(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::from(relation)],
        )?;
        Ok(rows.scalar().and_then(Value::as_text).map(str::to_string))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                debug!(error = %err, "error while closing sqlite connection");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver_with_users() -> SqliteDriver {
        let mut driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .execute_batch(
                "CREATE TABLE Names (id INTEGER PRIMARY KEY AUTOINCREMENT, first_name TEXT UNIQUE);
                 CREATE TABLE Users (id INTEGER PRIMARY KEY, name INTEGER, age INTEGER NOT NULL DEFAULT 0,
                     FOREIGN KEY (name) REFERENCES Names(first_name));",
            )
            .unwrap();
        driver
    }

    #[test]
    fn test_query_returns_columns_and_values() {
        let mut driver = driver_with_users();
        driver
            .execute("INSERT INTO Users (name, age) VALUES (?1, ?2)", &[Value::Null, Value::Integer(3)])
            .unwrap();
        let rows = driver.query("SELECT id, name, age FROM Users", &[]).unwrap();
        assert_eq!(rows.columns, vec!["id", "name", "age"]);
        assert_eq!(rows.values, vec![vec![Value::Integer(1), Value::Null, Value::Integer(3)]]);
        assert_eq!(driver.last_insert_id(), 1);
    }

    #[test]
    fn test_catalogue_calls() {
        let mut driver = driver_with_users();
        assert_eq!(driver.relation_names().unwrap(), vec!["Names", "Users"]);

        let info = driver.table_info("Users").unwrap();
        assert_eq!(info.len(), 3);
        assert_eq!(info[0].primary_key_position, 1);
        assert!(info[2].not_null);
        assert_eq!(info[2].default_sql.as_deref(), Some("0"));

        let fks = driver.foreign_key_list("Users").unwrap();
        assert_eq!(
            fks,
            vec![ForeignKeyInfo {
                from: "name".into(),
                table: "Names".into(),
                to: "first_name".into()
            }]
        );

        assert_eq!(driver.unique_indexes("Names").unwrap(), vec![vec!["first_name"]]);
        assert!(driver.create_sql("Names").unwrap().unwrap().contains("AUTOINCREMENT"));
        assert!(driver.table_info("Missing").unwrap().is_empty());
    }

    #[test]
    fn test_transactions() {
        let mut driver = driver_with_users();
        assert!(!driver.in_transaction());
        driver.begin().unwrap();
        assert!(driver.in_transaction());
        driver.execute("INSERT INTO Users (age) VALUES (1)", &[]).unwrap();
        driver.rollback().unwrap();
        assert!(!driver.in_transaction());
        let rows = driver.query("SELECT COUNT(*) FROM Users", &[]).unwrap();
        assert_eq!(rows.scalar(), Some(&Value::Integer(0)));
    }

    #[test]
    fn test_closed_driver_rejects_statements() {
        let mut driver = driver_with_users();
        driver.close();
        assert!(driver.is_closed());
        assert!(matches!(driver.query("SELECT 1", &[]), Err(Error::Closed)));
    }

    #[test]
    fn test_dialect_capabilities() {
        assert!(Dialect::Sqlite.capabilities().foreign_keys);
        assert!(!Dialect::Access.capabilities().foreign_keys);
        assert!(!Dialect::Access.capabilities().primary_keys);
        assert_eq!(Dialect::from(ConnectionType::Odbc), Dialect::Odbc);
    }

    #[test]
    fn test_unique_indexes_keep_composite_column_lists() {
        let mut driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .execute_batch(
                "CREATE TABLE Log (id INTEGER PRIMARY KEY, a TEXT, b TEXT, tag TEXT UNIQUE, UNIQUE (a, b))",
            )
            .unwrap();
        let mut indexes = driver.unique_indexes("Log").unwrap();
        indexes.sort();
        assert_eq!(indexes, vec![vec!["a".to_string(), "b".to_string()], vec!["tag".to_string()]]);
    }

    #[test]
    fn test_relation_names_hide_only_engine_tables() {
        let mut driver = SqliteDriver::open_in_memory().unwrap();
        driver
            .execute_batch(
                "CREATE TABLE sqliteXlog (id INTEGER PRIMARY KEY AUTOINCREMENT, line TEXT);
                 INSERT INTO sqliteXlog (line) VALUES ('x');",
            )
            .unwrap();
        // AUTOINCREMENT creates sqlite_sequence, which stays hidden.
        assert_eq!(driver.relation_names().unwrap(), vec!["sqliteXlog"]);
    }
}
