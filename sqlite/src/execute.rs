//! Statement execution with lock retry and failure policy.
//!
//! [`Executor`] wraps the [`Driver`] so every statement goes through the
//! same path:
//!
//! - busy/locked failures sleep and retry per the [`RetryPolicy`],
//!   publishing [`BEGIN_WAITING_FOR_LOCK`] before the first retry;
//! - constraint violations and other recoverable failures are returned
//!   untouched;
//! - any other driver failure is logged with the statement, its
//!   parameters and the previous statement, and the connection is closed
//!   before the error is returned.

use std::sync::Arc;

use relkit_config::RetryPolicy;
use relkit_core::Value;
use tracing::{debug, error, warn};

use crate::driver::{Capabilities, ColumnInfo, Dialect, Driver, ForeignKeyInfo, Rows};
use crate::error::{Error, Result};
use crate::events::{BEGIN_WAITING_FOR_LOCK, EventBus, LOCK_RETRY};

/// Serial statement runner over one driver.
pub struct Executor {
    driver: Box<dyn Driver>,
    policy: RetryPolicy,
    events: Arc<EventBus>,
    last_command: Option<String>,
}

impl Executor {
    /// Creates an executor over `driver`.
    pub fn new(driver: Box<dyn Driver>, policy: RetryPolicy) -> Self {
        Self {
            driver,
            policy,
            events: Arc::new(EventBus::new()),
            last_command: None,
        }
    }

    /// Replaces the driver, keeping subscriptions and policy.
    pub fn replace_driver(&mut self, driver: Box<dyn Driver>) {
        self.driver.close();
        self.driver = driver;
        self.last_command = None;
    }

    /// Event bus used for lock notifications.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Active retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Dialect of the underlying driver.
    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    /// Capabilities of the underlying driver.
    pub fn capabilities(&self) -> Capabilities {
        self.driver.capabilities()
    }

    /// Most recent statement that completed successfully.
    pub fn last_command(&self) -> Option<&str> {
        self.last_command.as_deref()
    }

    /// Returns `true` once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.driver.is_closed()
    }

    /// Runs a statement that returns no rows.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        self.run(sql, params, |driver| driver.execute(sql, params))
    }

    /// Runs several parameterless statements.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.run(sql, &[], |driver| driver.execute_batch(sql))
    }

    /// Runs a query and collects its rows.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
        self.run(sql, params, |driver| driver.query(sql, params))
    }

    /// Row id generated by the most recent insert.
    pub fn last_insert_id(&self) -> i64 {
        self.driver.last_insert_id()
    }

    /// Opens an explicit transaction unless one is already open.
    pub fn begin(&mut self) -> Result<()> {
        if self.driver.in_transaction() {
            return Ok(());
        }
        self.run("BEGIN", &[], |driver| driver.begin())
    }

    /// Commits the open transaction, if any.
    pub fn commit(&mut self) -> Result<()> {
        self.run("COMMIT", &[], |driver| driver.commit())
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback(&mut self) -> Result<()> {
        self.run("ROLLBACK", &[], |driver| driver.rollback())
    }

    /// Returns `true` while an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.driver.in_transaction()
    }

    /// Catalogue: user relation names.
    pub fn relation_names(&mut self) -> Result<Vec<String>> {
        self.run("<relation names>", &[], |driver| driver.relation_names())
    }

    /// Catalogue: column metadata.
    pub fn table_info(&mut self, relation: &str) -> Result<Vec<ColumnInfo>> {
        self.run("<table info>", &[], |driver| driver.table_info(relation))
    }

    /// Catalogue: foreign keys.
    pub fn foreign_key_list(&mut self, relation: &str) -> Result<Vec<ForeignKeyInfo>> {
        self.run("<foreign key list>", &[], |driver| {
            driver.foreign_key_list(relation)
        })
    }

    /// Catalogue: column lists of unique indexes.
    pub fn unique_indexes(&mut self, relation: &str) -> Result<Vec<Vec<String>>> {
        self.run("<unique indexes>", &[], |driver| {
            driver.unique_indexes(relation)
        })
    }

    /// Catalogue: stored `CREATE TABLE` text.
    pub fn create_sql(&mut self, relation: &str) -> Result<Option<String>> {
        self.run("<create sql>", &[], |driver| driver.create_sql(relation))
    }

    /// Closes the connection.
    pub fn close(&mut self) {
        if !self.driver.is_closed() {
            debug!("closing connection");
            self.driver.close();
        }
    }

    fn run<T>(
        &mut self,
        command: &str,
        params: &[Value],
        mut statement: impl FnMut(&mut dyn Driver) -> Result<T>,
    ) -> Result<T> {
        if self.driver.is_closed() {
            return Err(Error::Closed);
        }
        let mut retries: u32 = 0;
        loop {
            match statement(self.driver.as_mut()) {
                Ok(value) => {
                    self.last_command = Some(command.to_string());
                    return Ok(value);
                }
                Err(err) if err.is_busy() => {
                    if !self.policy.allows(retries) {
                        warn!(command, attempts = retries + 1, "giving up on locked database");
                        return Err(Error::LockTimeout {
                            attempts: retries + 1,
                        });
                    }
                    if retries == 0 {
                        self.events.publish(BEGIN_WAITING_FOR_LOCK);
                    }
                    self.events.publish(LOCK_RETRY);
                    retries += 1;
                    debug!(command, retry = retries, delay = ?self.policy.delay, "database locked, waiting");
                    std::thread::sleep(self.policy.delay);
                }
                Err(err) if err.is_recoverable() => return Err(err),
                Err(err) => {
                    error!(
                        command,
                        params = ?params,
                        previous = self.last_command.as_deref().unwrap_or("<none>"),
                        error = %err,
                        "statement failed; closing connection"
                    );
                    self.driver.close();
                    return Err(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("dialect", &self.driver.dialect())
            .field("policy", &self.policy)
            .field("last_command", &self.last_command)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Driver whose statements report "busy" a fixed number of times.
    struct BusyDriver {
        inner: SqliteDriver,
        busy_left: usize,
    }

    impl Driver for BusyDriver {
        fn dialect(&self) -> Dialect {
            Dialect::Sqlite
        }
        fn execute(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
            if self.busy_left > 0 {
                self.busy_left -= 1;
                return Err(Error::Busy("database is locked".into()));
            }
            self.inner.execute(sql, params)
        }
        fn execute_batch(&mut self, sql: &str) -> Result<()> {
            self.inner.execute_batch(sql)
        }
        fn query(&mut self, sql: &str, params: &[Value]) -> Result<Rows> {
            self.inner.query(sql, params)
        }
        fn last_insert_id(&self) -> i64 {
            self.inner.last_insert_id()
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.inner.rollback()
        }
        fn in_transaction(&self) -> bool {
            self.inner.in_transaction()
        }
        fn relation_names(&mut self) -> Result<Vec<String>> {
            self.inner.relation_names()
        }
        fn table_info(&mut self, relation: &str) -> Result<Vec<ColumnInfo>> {
            self.inner.table_info(relation)
        }
        fn close(&mut self) {
            self.inner.close()
        }
        fn is_closed(&self) -> bool {
            self.inner.is_closed()
        }
    }

    fn busy_executor(busy: usize, max_retries: Option<u32>) -> Executor {
        let inner = SqliteDriver::open_in_memory().unwrap();
        let mut exec = Executor::new(
            Box::new(BusyDriver {
                inner,
                busy_left: busy,
            }),
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(1),
            },
        );
        exec.execute_batch("CREATE TABLE t (a INTEGER)").unwrap();
        exec
    }

    #[test]
    fn test_busy_statement_is_retried_and_announced_once() {
        let mut exec = busy_executor(3, None);
        let waits = Arc::new(AtomicUsize::new(0));
        let retries = Arc::new(AtomicUsize::new(0));
        let w = Arc::clone(&waits);
        let r = Arc::clone(&retries);
        exec.events().subscribe(BEGIN_WAITING_FOR_LOCK, move || {
            w.fetch_add(1, Ordering::SeqCst);
        });
        exec.events().subscribe(LOCK_RETRY, move || {
            r.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(exec.execute("INSERT INTO t VALUES (1)", &[]).unwrap(), 1);
        assert_eq!(waits.load(Ordering::SeqCst), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_budget_exhaustion_is_lock_timeout() {
        let mut exec = busy_executor(5, Some(2));
        let err = exec.execute("INSERT INTO t VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { attempts: 3 }));
        assert!(!exec.is_closed());
    }

    #[test]
    fn test_constraint_violation_keeps_connection_open() {
        let mut exec = Executor::new(
            Box::new(SqliteDriver::open_in_memory().unwrap()),
            RetryPolicy::none(),
        );
        exec.execute_batch("CREATE TABLE u (a TEXT UNIQUE)").unwrap();
        exec.execute("INSERT INTO u VALUES ('x')", &[]).unwrap();
        let err = exec.execute("INSERT INTO u VALUES ('x')", &[]).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation { .. }));
        assert!(!exec.is_closed());
    }

    #[test]
    fn test_fatal_error_closes_connection() {
        let mut exec = Executor::new(
            Box::new(SqliteDriver::open_in_memory().unwrap()),
            RetryPolicy::none(),
        );
        assert!(matches!(
            exec.query("SELECT * FROM nowhere", &[]),
            Err(Error::Driver(_))
        ));
        assert!(exec.is_closed());
        assert!(matches!(exec.query("SELECT 1", &[]), Err(Error::Closed)));
    }

    #[test]
    fn test_last_command_tracks_successes() {
        let mut exec = Executor::new(
            Box::new(SqliteDriver::open_in_memory().unwrap()),
            RetryPolicy::none(),
        );
        exec.query("SELECT 1", &[]).unwrap();
        assert_eq!(exec.last_command(), Some("SELECT 1"));
    }
}
