//! The public entry point: one connection plus everything derived from it.
//!
//! [`Database`] locks its session once per call behind a reentrant lock.
//! Caller callbacks that may call back in (value formatters) run after the
//! session is released. Writes follow the same
//! sequence: resolve foreign values, compile the location, execute, update
//! usage counts, then commit when auto-save is on. A failed write is rolled
//! back and its usage changes are recounted from the database.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use relkit_config::{ConnectionType, DatabaseConfig};
use relkit_core::{
    AttributeDef, ForeignLink, RelationSchema, SchemaReport, Value, quote_identifier,
};
use tracing::{debug, info, warn};

use crate::driver::{Driver, SqliteDriver};
use crate::error::{Error, Result};
use crate::events::{EventBus, SubscriptionId};
use crate::execute::Executor;
use crate::foreign::ForeignCatalogue;
use crate::format::{Shape, Table, shape};
use crate::location::{Location, Predicate};
use crate::query::{ChangeOptions, CreateOptions, Get, InsertOptions, OnConflict, Selection};
use crate::schema::insert_sql_with;
use crate::session::Session;
use crate::usage::{UsageFilter, UsageKey};

/// A relational database with foreign key bookkeeping.
///
/// # Examples
///
/// ```
/// use relkit_core::{AttributeDef, DataType, RelationSchema, Value};
/// use relkit_sqlite::{CreateOptions, Database, Get, InsertOptions, Location, Shape};
///
/// let db = Database::open_in_memory().unwrap();
/// db.create_relation(
///     &RelationSchema::new("Names")
///         .with_attribute(AttributeDef::primary_key("id"))
///         .with_attribute(AttributeDef::new("first_name", DataType::Text)),
///     CreateOptions::default(),
/// ).unwrap();
/// db.create_relation(
///     &RelationSchema::new("Users")
///         .with_attribute(AttributeDef::primary_key("id"))
///         .with_attribute(AttributeDef::new("name", DataType::Integer).references("Names", "first_name"))
///         .with_attribute(AttributeDef::new("age", DataType::Integer)),
///     CreateOptions::default(),
/// ).unwrap();
///
/// db.add_tuple("Users", [("name", Value::from("Lorem")), ("age", Value::from(26))], InsertOptions::default()).unwrap();
///
/// let name = db.get_value(&Get::new().select("Users", ["name"]).location(Location::new().next_to("age", 26))).unwrap();
/// assert_eq!(name, Shape::from("Lorem"));
/// ```
pub struct Database {
    config: DatabaseConfig,
    events: Arc<EventBus>,
    session: ReentrantMutex<RefCell<Session>>,
}

impl Database {
    /// Opens the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOperation`] for connection types without
    /// a built-in driver; use [`Database::with_driver`] for those.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        config.validate()?;
        let driver = open_driver(&config)?;
        Self::with_driver(driver, config)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(DatabaseConfig::in_memory())
    }

    /// Wraps an already opened driver.
    pub fn with_driver(driver: Box<dyn Driver>, config: DatabaseConfig) -> Result<Self> {
        let dialect = driver.dialect();
        let exec = Executor::new(driver, config.retry_policy());
        let events = Arc::clone(exec.events());
        let mut session = Session::new(exec, &config);
        session.load()?;
        info!(?dialect, read_only = config.read_only, "opened database");
        Ok(Self {
            config,
            events,
            session: ReentrantMutex::new(RefCell::new(session)),
        })
    }

    /// Settings the database was opened with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Commits pending work when auto-save is on, then closes the
    /// connection.
    pub fn close(&self) -> Result<()> {
        self.with_session(|session| {
            if session.exec.in_transaction() && session.auto_save {
                if let Err(err) = session.exec.commit() {
                    warn!(error = %err, "commit on close failed");
                }
            }
            session.exec.close();
            session.introspector.clear();
            session.lookups.clear();
            info!("closed database");
            Ok(())
        })
    }

    /// Opens a fresh connection with the original settings and reloads
    /// every cache.
    pub fn reopen(&self) -> Result<()> {
        let driver = open_driver(&self.config)?;
        self.with_session(|session| {
            session.exec.replace_driver(driver);
            session.load()?;
            info!("reopened database");
            Ok(())
        })
    }

    /// Returns `true` once the connection is closed.
    pub fn is_closed(&self) -> bool {
        let guard = self.session.lock();
        // a session busy with a statement is open
        guard
            .try_borrow()
            .map(|session| session.exec.is_closed())
            .unwrap_or(false)
    }

    /// Commits the open transaction, if any.
    pub fn save(&self) -> Result<()> {
        self.with_session(|session| {
            if session.exec.in_transaction() {
                session.exec.commit()?;
                debug!("saved database");
            }
            Ok(())
        })
    }

    /// Registers `callback` for the named event.
    ///
    /// See [`BEGIN_WAITING_FOR_LOCK`](crate::BEGIN_WAITING_FOR_LOCK) and
    /// [`LOCK_RETRY`](crate::LOCK_RETRY). Callbacks run while the waiting
    /// statement is still in progress; calling back into this database
    /// from one returns [`Error::Reentrant`].
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.events.subscribe(event, callback)
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    // Reads and writes

    /// Reads the values selected by `get`.
    ///
    /// A location with `force_match` set may insert foreign rows; such a
    /// read runs as a write. The caller's formatter runs after the session
    /// is released and may use this database.
    pub fn get_value(&self, get: &Get) -> Result<Shape> {
        get.ensure_selection()?;
        let mut tables = self.with_session(|session| {
            if get.location.force_match {
                session.write(|s| s.read_tables(get))
            } else {
                session.read_tables(get)
            }
        })?;
        for table in &mut tables {
            table.apply_formatter(&get.format.formatter);
        }
        Ok(shape(tables, &get.shape))
    }

    /// Inserts one row and returns its row id, or `None` when
    /// [`OnConflict::Ignore`] skipped it.
    pub fn add_tuple<K, V>(
        &self,
        relation: &str,
        row: impl IntoIterator<Item = (K, V)>,
        options: InsertOptions,
    ) -> Result<Option<i64>>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let row = collect_pairs(row);
        self.with_session(|session| session.write(|s| s.insert_row(relation, &row, options)))
    }

    /// Sets `changes` on every row matching `location` and returns the
    /// number of rows changed.
    pub fn change_tuple<K, V>(
        &self,
        relation: &str,
        changes: impl IntoIterator<Item = (K, V)>,
        location: &Location,
        options: ChangeOptions,
    ) -> Result<usize>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let changes = collect_pairs(changes);
        self.with_session(|session| {
            session.write(|s| s.update_rows(relation, &changes, location, options))
        })
    }

    /// Deletes every row matching `location` and returns how many went.
    pub fn remove_tuple(&self, relation: &str, location: &Location) -> Result<usize> {
        self.with_session(|session| session.write(|s| s.delete_rows(relation, location)))
    }

    // Introspection

    /// Relation names in catalogue order.
    pub fn relation_names(&self) -> Result<Vec<String>> {
        self.with_session(|session| {
            let Session {
                exec, introspector, ..
            } = session;
            introspector.relation_names(exec)
        })
    }

    /// Returns `true` if `relation` exists.
    pub fn has_relation(&self, relation: &str) -> Result<bool> {
        self.with_session(|session| {
            let Session {
                exec, introspector, ..
            } = session;
            introspector.has_relation(exec, relation)
        })
    }

    /// Attribute names of `relation` in column order, minus `exclude`.
    pub fn attribute_names(&self, relation: &str, exclude: &[&str]) -> Result<Vec<String>> {
        self.with_session(|session| {
            let Session {
                exec, introspector, ..
            } = session;
            introspector.attribute_names(exec, relation, exclude)
        })
    }

    /// Primary key attribute of `relation`, if it has one.
    pub fn primary_key(&self, relation: &str) -> Result<Option<String>> {
        self.with_session(|session| {
            let Session {
                exec, introspector, ..
            } = session;
            introspector.primary_key(exec, relation)
        })
    }

    /// Live schema of `relation`.
    pub fn schema(&self, relation: &str) -> Result<RelationSchema> {
        self.with_session(|session| {
            let Session {
                exec, introspector, ..
            } = session;
            introspector.schema(exec, relation)
        })
    }

    /// Per-property view of [`schema`](Self::schema).
    pub fn schema_report(&self, relation: &str) -> Result<SchemaReport> {
        Ok(self.schema(relation)?.report())
    }

    // Foreign keys and usage

    /// Rescans every relation's foreign keys and recounts usage.
    pub fn refresh_foreign_catalogue(&self) -> Result<()> {
        self.with_session(|session| {
            if !session.exec.capabilities().foreign_keys {
                return Err(Error::UnsupportedOperation(
                    "foreign key catalogue".to_string(),
                ));
            }
            session.refresh_catalogue()?;
            session.rebuild_usage()
        })
    }

    /// Snapshot of the foreign key catalogue.
    pub fn foreign_catalogue(&self) -> Result<ForeignCatalogue> {
        self.with_session(|session| Ok(session.catalogue.clone()))
    }

    /// Link declared on `relation.attribute`.
    pub fn foreign_link(&self, relation: &str, attribute: &str) -> Result<Option<ForeignLink>> {
        self.with_session(|session| Ok(session.catalogue.link(relation, attribute).cloned()))
    }

    /// Links declared on `relation`, keyed by attribute.
    pub fn foreign_links(&self, relation: &str) -> Result<BTreeMap<String, ForeignLink>> {
        self.with_session(|session| {
            Ok(session
                .catalogue
                .links_of(relation)
                .cloned()
                .unwrap_or_default())
        })
    }

    /// Surrogate key stored for a logical value of `relation.attribute`.
    ///
    /// With `force_match` a missing foreign row is inserted. Unlinked
    /// attributes return `value` unchanged.
    pub fn resolve_foreign_value(
        &self,
        relation: &str,
        attribute: &str,
        value: impl Into<Value>,
        force_match: bool,
    ) -> Result<Option<Value>> {
        let value = value.into();
        self.with_session(|session| {
            if force_match {
                session.write(|s| s.resolve_foreign_value(relation, attribute, &value, true))
            } else {
                session.resolve_foreign_value(relation, attribute, &value, false)
            }
        })
    }

    /// Logical value behind a stored surrogate key, or `None` if the
    /// foreign row is gone.
    pub fn lookup_foreign_value(
        &self,
        relation: &str,
        attribute: &str,
        stored: impl Into<Value>,
    ) -> Result<Option<Value>> {
        let stored = stored.into();
        self.with_session(|session| session.reverse_lookup(relation, attribute, &stored))
    }

    /// Points the rows counted in `old_ids` at `new_value`; see
    /// [`ChangeOptions::update_foreign`] for when the old foreign row is
    /// renamed instead.
    pub fn change_foreign_value(
        &self,
        relation: &str,
        attribute: &str,
        old_ids: &BTreeMap<i64, u64>,
        new_value: impl Into<Value>,
        update_foreign: Option<bool>,
    ) -> Result<Value> {
        let new_value = new_value.into();
        self.with_session(|session| {
            session.write(|s| {
                s.change_foreign_value(relation, attribute, old_ids, &new_value, update_foreign)
            })
        })
    }

    /// Total references matching `filter`.
    pub fn usage_count(&self, filter: &UsageFilter) -> Result<u64> {
        self.with_session(|session| Ok(session.usage.count(filter)))
    }

    /// Matching usage entries with their counts.
    pub fn usage_breakdown(&self, filter: &UsageFilter) -> Result<Vec<(UsageKey, u64)>> {
        self.with_session(|session| Ok(session.usage.breakdown(filter)))
    }

    /// Records `delta` extra references.
    pub fn add_usage(&self, key: UsageKey, delta: u64) -> Result<()> {
        self.with_session(|session| {
            session.usage.add(key, delta);
            Ok(())
        })
    }

    /// Removes up to `delta` references and returns what remains.
    pub fn remove_usage(&self, key: &UsageKey, delta: u64, filter_empty: bool) -> Result<u64> {
        self.with_session(|session| Ok(session.usage.remove(key, delta, filter_empty)))
    }

    /// Deletes foreign rows nothing references.
    ///
    /// **Destructive.** The catalogue and usage counts are rebuilt from the
    /// database first; every unreferenced row of a foreign relation is then
    /// deleted, except rows listed in `exclude`. `only` limits cleaning
    /// to the named foreign relations. Returns the number of rows deleted.
    pub fn clean_foreign_keys(&self, only: Option<&[&str]>, exclude: &[(&str, i64)]) -> Result<usize> {
        self.with_session(|session| {
            session.write(|s| s.clean_unused_foreign_rows(only, exclude))
        })
    }

    /// Compiles `location` against `relation` without running it.
    pub fn compile_location(&self, relation: &str, location: &Location) -> Result<Predicate> {
        self.with_session(|session| session.compile_location(relation, location))
    }

    // Schema changes

    /// Creates a relation; returns `false` if it already existed.
    pub fn create_relation(&self, schema: &RelationSchema, options: CreateOptions) -> Result<bool> {
        self.with_session(|session| session.create_relation(schema, options))
    }

    /// Drops a relation.
    pub fn drop_relation(&self, relation: &str) -> Result<()> {
        self.with_session(|session| session.drop_relation(relation))
    }

    /// Renames a relation.
    pub fn rename_relation(&self, from: &str, to: &str) -> Result<()> {
        self.with_session(|session| session.rename_relation(from, to))
    }

    /// Adds an attribute, or redefines it if it exists.
    pub fn add_attribute(&self, relation: &str, attribute: &AttributeDef) -> Result<()> {
        self.with_session(|session| session.add_attribute(relation, attribute))
    }

    /// Removes an attribute and its values.
    pub fn remove_attribute(&self, relation: &str, attribute: &str) -> Result<()> {
        self.with_session(|session| session.remove_attribute(relation, attribute))
    }

    /// Applies `delta` and `remove` to the schema of `relation`.
    pub fn set_schema(&self, relation: &str, delta: &[AttributeDef], remove: &[&str]) -> Result<()> {
        self.with_session(|session| session.set_schema(relation, delta, remove))
    }

    /// Runs `op` on the session.
    ///
    /// The lock is reentrant, so a callback on this thread may call back in
    /// once the session is free again; a call made while `op` is still
    /// running returns [`Error::Reentrant`].
    pub(crate) fn with_session<T>(&self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let guard = self.session.lock();
        let Ok(mut session) = guard.try_borrow_mut() else {
            warn!("database re-entered while busy");
            return Err(Error::Reentrant);
        };
        op(&mut *session)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Most keys bound in one `WHERE key IN (...)`, well below the engine's
/// bound variable limit.
const KEY_BATCH: usize = 500;

fn open_driver(config: &DatabaseConfig) -> Result<Box<dyn Driver>> {
    match config.connection_type {
        ConnectionType::Sqlite => {
            let Some(path) = &config.file_name else {
                return Err(Error::InvalidRequest(
                    "an sqlite connection needs a file name".to_string(),
                ));
            };
            Ok(Box::new(SqliteDriver::open(path, config.read_only)?))
        }
        other => Err(Error::UnsupportedOperation(format!(
            "no built-in driver for {other:?} connections"
        ))),
    }
}

fn collect_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Vec<(String, Value)>
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn quote_all(names: &[String]) -> Result<Vec<String>> {
    names.iter().map(|n| Ok(quote_identifier(n)?)).collect()
}

impl Session {
    fn read_tables(&mut self, get: &Get) -> Result<Vec<Table>> {
        let mut tables = Vec::with_capacity(get.selections.len());
        for (relation, selection) in &get.selections {
            tables.push(self.read_table(relation, selection, get)?);
        }
        Ok(tables)
    }

    fn read_table(&mut self, relation: &str, selection: &Selection, get: &Get) -> Result<Table> {
        let all = self
            .introspector
            .attribute_names(&mut self.exec, relation, &[])?;
        let attributes = match selection {
            Selection::All => all.clone(),
            Selection::Attributes(names) => names.clone(),
        };
        if attributes.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "no attributes selected from '{relation}'"
            )));
        }
        for attribute in attributes.iter().chain(get.order_by.iter().map(|(a, _)| a)) {
            if !all.contains(attribute) {
                return Err(Error::attribute_not_found(relation, attribute));
            }
        }

        let predicate = self.compile_location(relation, &get.location)?;
        let sql = format!(
            "SELECT {}{} FROM {}{}{}",
            if get.distinct { "DISTINCT " } else { "" },
            quote_all(&attributes)?.join(", "),
            quote_identifier(relation)?,
            predicate.where_clause(),
            get.tail_sql()?
        );
        let rows = self.exec.query(&sql, &predicate.params)?;

        let format = &get.format;
        let columns = attributes
            .iter()
            .map(|a| format.alias.attribute_name(a, attributes.len()))
            .collect();
        let mut row_keys = Vec::with_capacity(rows.len());
        let mut formatted = Vec::with_capacity(rows.len());
        for (index, row) in rows.values.into_iter().enumerate() {
            row_keys.push(format.alias.row_key(index, format.alias_replacement.as_deref()));
            let mut values = Vec::with_capacity(row.len());
            for (attribute, stored) in attributes.iter().zip(row) {
                values.push(self.logical_value(relation, attribute, stored, format)?);
            }
            formatted.push(values);
        }
        debug!(relation, rows = formatted.len(), "read rows");
        Ok(Table {
            relation: relation.to_string(),
            attributes,
            columns,
            row_keys,
            rows: formatted,
        })
    }

    fn insert_row(
        &mut self,
        relation: &str,
        row: &[(String, Value)],
        options: InsertOptions,
    ) -> Result<Option<i64>> {
        let attributes = self
            .introspector
            .attribute_names(&mut self.exec, relation, &[])?;
        let mut columns: Vec<String> = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (attribute, value) in row {
            if !attributes.contains(attribute) {
                return Err(Error::attribute_not_found(relation, attribute));
            }
            if columns.contains(attribute) {
                return Err(Error::InvalidRequest(format!(
                    "attribute '{attribute}' given twice"
                )));
            }
            let stored = if options.check_foreign {
                self.resolve_foreign_value(relation, attribute, value, true)?
                    .unwrap_or(Value::Null)
            } else {
                value.clone()
            };
            columns.push(attribute.clone());
            values.push(stored);
        }

        let sql = insert_sql_with(options.on_conflict.verb(), relation, &columns)?;
        if self.exec.execute(&sql, &values)? == 0 {
            debug!(relation, "insert ignored on conflict");
            return Ok(None);
        }
        let id = self.exec.last_insert_id();
        if options.on_conflict == OnConflict::Replace {
            self.forget_lookups_into(relation);
        }

        if options.on_conflict == OnConflict::Replace && self.catalogue.links_of(relation).is_some() {
            // a replaced row may have held references of its own
            self.rebuild_usage()?;
        } else {
            for (attribute, stored) in columns.iter().zip(&values) {
                if let (Some(link), Some(key)) =
                    (self.catalogue.link(relation, attribute), stored.as_integer())
                {
                    let usage = UsageKey::new(&link.relation, &link.attribute, key, relation);
                    self.usage.add(usage, 1);
                }
            }
        }
        debug!(relation, id, "inserted row");
        Ok(Some(id))
    }

    fn update_rows(
        &mut self,
        relation: &str,
        changes: &[(String, Value)],
        location: &Location,
        options: ChangeOptions,
    ) -> Result<usize> {
        let attributes = self
            .introspector
            .attribute_names(&mut self.exec, relation, &[])?;
        for (index, (attribute, _)) in changes.iter().enumerate() {
            if !attributes.contains(attribute) {
                return Err(Error::attribute_not_found(relation, attribute));
            }
            if changes[..index].iter().any(|(a, _)| a == attribute) {
                return Err(Error::InvalidRequest(format!(
                    "attribute '{attribute}' given twice"
                )));
            }
        }
        if changes.is_empty() {
            return Ok(0);
        }

        let mut location = location.clone();
        location.force_match = options.force_match;
        let predicate = self.compile_location(relation, &location)?;
        let linked: Vec<(String, ForeignLink)> = changes
            .iter()
            .filter_map(|(a, _)| self.catalogue.link(relation, a).map(|l| (a.clone(), l.clone())))
            .collect();

        if linked.is_empty() {
            let assignments = changes
                .iter()
                .map(|(a, _)| Ok(format!("{} = ?", quote_identifier(a)?)))
                .collect::<Result<Vec<_>>>()?;
            let mut params: Vec<Value> = changes.iter().map(|(_, v)| v.clone()).collect();
            params.extend(predicate.params.iter().cloned());
            let changed = self.exec.execute(
                &format!(
                    "UPDATE {} SET {}{}",
                    quote_identifier(relation)?,
                    assignments.join(", "),
                    predicate.where_clause()
                ),
                &params,
            )?;
            if changed > 0 {
                self.forget_lookups_into(relation);
            }
            debug!(relation, changed, "updated rows");
            return Ok(changed);
        }

        let key = self.introspector.key_column(&mut self.exec, relation)?;
        let mut selected = vec![key.clone()];
        selected.extend(linked.iter().map(|(a, _)| a.clone()));
        let before = self.exec.query(
            &format!(
                "SELECT {} FROM {}{}",
                quote_all(&selected)?.join(", "),
                quote_identifier(relation)?,
                predicate.where_clause()
            ),
            &predicate.params,
        )?;
        if before.is_empty() {
            return Ok(0);
        }

        let mut assignments = Vec::with_capacity(changes.len());
        let mut params = Vec::with_capacity(changes.len());
        for (attribute, value) in changes {
            let stored = match linked.iter().position(|(a, _)| a == attribute) {
                Some(column) if options.check_foreign => {
                    let mut old_ids: BTreeMap<i64, u64> = BTreeMap::new();
                    for id in before.column(column + 1).iter().filter_map(Value::as_integer) {
                        *old_ids.entry(id).or_insert(0) += 1;
                    }
                    self.change_foreign_value(relation, attribute, &old_ids, value, options.update_foreign)?
                }
                _ => value.clone(),
            };
            assignments.push(format!("{} = ?", quote_identifier(attribute)?));
            params.push(stored);
        }
        let keys = before.column(0);
        let sql_prefix = format!(
            "UPDATE {} SET {} WHERE {} IN ",
            quote_identifier(relation)?,
            assignments.join(", "),
            quote_identifier(&key)?
        );
        let mut changed = 0;
        for batch in keys.chunks(KEY_BATCH) {
            let mut batch_params = params.clone();
            batch_params.extend(batch.iter().cloned());
            changed += self.exec.execute(
                &format!("{sql_prefix}({})", vec!["?"; batch.len()].join(", ")),
                &batch_params,
            )?;
        }
        if changed > 0 {
            self.forget_lookups_into(relation);
        }

        for (column, (attribute, link)) in linked.iter().enumerate() {
            let Some(position) = changes.iter().position(|(a, _)| a == attribute) else {
                continue;
            };
            let new_key = params[position].as_integer();
            for old in before.column(column + 1) {
                if let Some(old) = old.as_integer() {
                    let usage = UsageKey::new(&link.relation, &link.attribute, old, relation);
                    self.usage.remove(&usage, 1, true);
                }
                if let Some(new) = new_key {
                    self.usage
                        .add(UsageKey::new(&link.relation, &link.attribute, new, relation), 1);
                }
            }
        }
        debug!(relation, changed, "updated rows");
        Ok(changed)
    }

    fn delete_rows(&mut self, relation: &str, location: &Location) -> Result<usize> {
        let predicate = self.compile_location(relation, location)?;
        let table = quote_identifier(relation)?;
        let linked: Vec<(String, ForeignLink)> = self
            .catalogue
            .links_of(relation)
            .map(|links| links.iter().map(|(a, l)| (a.clone(), l.clone())).collect())
            .unwrap_or_default();

        let before = if linked.is_empty() {
            None
        } else {
            let columns: Vec<String> = linked.iter().map(|(a, _)| a.clone()).collect();
            Some(self.exec.query(
                &format!(
                    "SELECT {} FROM {table}{}",
                    quote_all(&columns)?.join(", "),
                    predicate.where_clause()
                ),
                &predicate.params,
            )?)
        };
        let removed = self.exec.execute(
            &format!("DELETE FROM {table}{}", predicate.where_clause()),
            &predicate.params,
        )?;
        if removed > 0 {
            self.forget_lookups_into(relation);
        }

        if let Some(before) = before {
            for row in &before.values {
                for ((_, link), stored) in linked.iter().zip(row) {
                    if let Some(id) = stored.as_integer() {
                        let usage = UsageKey::new(&link.relation, &link.attribute, id, relation);
                        self.usage.remove(&usage, 1, true);
                    }
                }
            }
        }
        debug!(relation, removed, "removed rows");
        Ok(removed)
    }

    /// Drops cached reverse lookups when `relation` is a foreign relation
    /// whose rows just changed.
    fn forget_lookups_into(&mut self, relation: &str) {
        if self.catalogue.entries().any(|(_, _, link)| link.relation == relation) {
            debug!(relation, "foreign rows changed; reverse lookups cleared");
            self.lookups.clear();
        }
    }
}
