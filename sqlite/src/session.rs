//! Per-database state shared by every operation.
//!
//! A [`Session`] bundles the executor with everything derived from the
//! live database: introspection caches, the foreign key catalogue, usage
//! counts and the reverse-lookup cache. `Database` keeps it in a
//! `RefCell` behind a reentrant lock, so the methods spread over the
//! crate's modules can call each other freely on `&mut Session`.

use relkit_config::DatabaseConfig;
use relkit_core::Value;
use tracing::{debug, warn};

use crate::cache::LfuCache;
use crate::error::{Error, Result};
use crate::execute::Executor;
use crate::foreign::ForeignCatalogue;
use crate::introspect::Introspector;
use crate::usage::UsageCounts;

/// Cache key for reverse foreign lookups: domestic relation, attribute and
/// stored surrogate key.
pub(crate) type LookupKey = (String, String, Value);

/// Connection plus derived state.
pub(crate) struct Session {
    pub(crate) exec: Executor,
    pub(crate) introspector: Introspector,
    pub(crate) catalogue: ForeignCatalogue,
    pub(crate) usage: UsageCounts,
    pub(crate) lookups: LfuCache<LookupKey, Value>,
    pub(crate) auto_save: bool,
    pub(crate) read_only: bool,
}

impl Session {
    pub(crate) fn new(exec: Executor, config: &DatabaseConfig) -> Self {
        Self {
            exec,
            introspector: Introspector::new(config.cache_capacity),
            catalogue: ForeignCatalogue::default(),
            usage: UsageCounts::new(),
            lookups: LfuCache::new(config.cache_capacity),
            auto_save: config.auto_save,
            read_only: config.read_only,
        }
    }

    /// Discards every cache and rebuilds catalogue and usage counts from
    /// the live database.
    pub(crate) fn load(&mut self) -> Result<()> {
        self.introspector.clear();
        self.lookups.clear();
        self.usage.clear();
        self.usage.clear_pending();
        if self.exec.capabilities().foreign_keys {
            self.refresh_catalogue()?;
            self.rebuild_usage()?;
        } else {
            debug!(dialect = ?self.exec.dialect(), "driver has no foreign key catalogue; links disabled");
            self.catalogue = ForeignCatalogue::default();
        }
        Ok(())
    }

    /// Fails for read-only databases.
    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::UnsupportedOperation(
                "write on a read-only database".to_string(),
            ));
        }
        Ok(())
    }

    /// Runs one write operation.
    ///
    /// Opens a transaction if none is open and commits it afterwards when
    /// auto-save is on. If the operation fails inside a transaction it
    /// opened itself, that transaction is rolled back and usage counts are
    /// rebuilt so they match the restored rows. Foreign rows created by the
    /// operation stop being pending once it returns.
    pub(crate) fn write<T>(&mut self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        self.ensure_writable()?;
        let began = !self.exec.in_transaction();
        self.exec.begin()?;
        let outcome = op(self);
        self.usage.clear_pending();
        match outcome {
            Ok(value) => {
                if self.auto_save {
                    self.exec.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if began && !self.exec.is_closed() {
                    warn!(error = %err, "write failed; rolling back");
                    if let Err(rollback) = self.exec.rollback() {
                        warn!(error = %rollback, "rollback failed");
                    }
                    self.lookups.clear();
                    if self.exec.capabilities().foreign_keys && !self.exec.is_closed() {
                        if let Err(recount) = self.rebuild_usage() {
                            warn!(error = %recount, "could not recount foreign usage");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Commits pending work ahead of a schema change.
    pub(crate) fn commit_before_ddl(&mut self) -> Result<()> {
        if self.exec.in_transaction() {
            debug!("committing open transaction before schema change");
            self.exec.commit()?;
        }
        Ok(())
    }

    /// Invalidates caches touched by DDL on `relation`.
    pub(crate) fn invalidate(&mut self, relation: &str) {
        self.introspector.invalidate(relation);
        self.lookups.clear();
    }
}
