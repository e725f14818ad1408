//! Schema changes.
//!
//! Relations are created, renamed and dropped with plain DDL. Attribute
//! changes use `ALTER TABLE ... ADD COLUMN` when the engine can express
//! them in place and rebuild-and-copy otherwise:
//!
//! 1. snapshot the rows of the relation;
//! 2. rename it to `<relation>__rebuild` with `legacy_alter_table` on, so
//!    references held by other relations keep pointing at the original name;
//! 3. in one transaction, create the new table and reinsert the snapshot;
//! 4. drop the temporary table and refresh every derived cache.
//!
//! A failure in step 3 rolls the new table back and leaves the temporary
//! table in place; the error names it.

use relkit_core::{AttributeDef, RelationSchema, Value, quote_identifier};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::query::CreateOptions;
use crate::schema::{
    add_column_sql, create_table_sql, drop_table_sql, insert_sql, rebuild_table_name,
    rename_table_sql,
};
use crate::session::Session;

impl Session {
    /// Creates `schema` and returns `false` if it already existed.
    pub(crate) fn create_relation(
        &mut self,
        schema: &RelationSchema,
        options: CreateOptions,
    ) -> Result<bool> {
        self.ensure_writable()?;
        schema.validate()?;
        if self.introspector.has_relation(&mut self.exec, &schema.name)? {
            if options.no_replication {
                debug!(relation = %schema.name, "relation exists; create skipped");
                return Ok(false);
            }
            return Err(Error::InvalidRequest(format!(
                "relation '{}' already exists",
                schema.name
            )));
        }
        let sql = create_table_sql(schema)?;
        self.commit_before_ddl()?;
        self.exec.execute(&sql, &[])?;
        self.after_ddl(&schema.name)?;
        info!(relation = %schema.name, attributes = schema.attributes.len(), "created relation");
        Ok(true)
    }

    /// Drops `relation` and forgets its usage counts.
    pub(crate) fn drop_relation(&mut self, relation: &str) -> Result<()> {
        self.ensure_writable()?;
        self.require_relation(relation)?;
        self.commit_before_ddl()?;
        self.exec.execute(&drop_table_sql(relation)?, &[])?;
        self.usage.forget_relation(relation);
        self.after_ddl(relation)?;
        info!(relation, "dropped relation");
        Ok(())
    }

    /// Renames `from` to `to`; links held by other relations follow.
    pub(crate) fn rename_relation(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_writable()?;
        if !self.exec.capabilities().rename_table {
            return Err(Error::UnsupportedOperation(format!("renaming '{from}'")));
        }
        self.require_relation(from)?;
        if self.introspector.has_relation(&mut self.exec, to)? {
            return Err(Error::InvalidRequest(format!("relation '{to}' already exists")));
        }
        let sql = rename_table_sql(from, to)?;
        self.commit_before_ddl()?;
        self.exec.execute(&sql, &[])?;
        self.introspector.invalidate(to);
        self.after_ddl(from)?;
        info!(from, to, "renamed relation");
        Ok(())
    }

    /// Adds or redefines one attribute.
    pub(crate) fn add_attribute(&mut self, relation: &str, attribute: &AttributeDef) -> Result<()> {
        self.ensure_writable()?;
        let existing = self
            .introspector
            .attribute_names(&mut self.exec, relation, &[])?;
        if existing.contains(&attribute.name) || attribute.requires_rebuild() {
            return self.set_schema(relation, std::slice::from_ref(attribute), &[]);
        }
        let sql = add_column_sql(relation, attribute)?;
        self.commit_before_ddl()?;
        self.exec.execute(&sql, &[])?;
        self.after_ddl(relation)?;
        info!(relation, attribute = %attribute.name, "added attribute in place");
        Ok(())
    }

    /// Removes one attribute.
    pub(crate) fn remove_attribute(&mut self, relation: &str, attribute: &str) -> Result<()> {
        self.ensure_writable()?;
        self.introspector
            .require_attribute(&mut self.exec, relation, attribute)?;
        self.set_schema(relation, &[], &[attribute])
    }

    /// Replaces or appends `delta`, drops `remove`, and rebuilds `relation`
    /// when the result differs from the live schema.
    pub(crate) fn set_schema(
        &mut self,
        relation: &str,
        delta: &[AttributeDef],
        remove: &[&str],
    ) -> Result<()> {
        self.ensure_writable()?;
        let current = self.introspector.schema(&mut self.exec, relation)?;
        for name in remove {
            if current.attribute(name).is_none() {
                return Err(Error::attribute_not_found(relation, name));
            }
        }
        let target = current.merge(delta, remove);
        target.validate()?;
        if target == current {
            debug!(relation, "schema unchanged; rebuild skipped");
            return Ok(());
        }
        if target.attributes.is_empty() {
            return Err(Error::InvalidRequest(format!(
                "relation '{relation}' would have no attributes"
            )));
        }
        self.rebuild(&current, &target)
    }

    fn rebuild(&mut self, current: &RelationSchema, target: &RelationSchema) -> Result<()> {
        if !self.exec.capabilities().rename_table {
            return Err(Error::UnsupportedOperation(format!(
                "rebuilding '{}'",
                current.name
            )));
        }
        let relation = current.name.as_str();
        let unmodelled = self
            .introspector
            .unmodelled_constraints(&mut self.exec, relation)?;
        if !unmodelled.is_empty() {
            warn!(relation, constraints = ?unmodelled, "rebuild refused");
            return Err(Error::UnsupportedOperation(format!(
                "rebuilding '{relation}' would drop {}",
                unmodelled.join(", ")
            )));
        }
        let temporary = rebuild_table_name(relation);
        self.commit_before_ddl()?;
        if self.introspector.has_relation(&mut self.exec, &temporary)? {
            return Err(Error::InvalidRequest(format!(
                "'{temporary}' is left over from an earlier rebuild of '{relation}'; recover or drop it first"
            )));
        }

        let mut columns: Vec<String> = target
            .attributes
            .iter()
            .filter(|a| current.attribute(&a.name).is_some())
            .map(|a| a.name.clone())
            .collect();
        if current.primary_key().is_none() && target.primary_key().is_none() {
            columns.insert(0, "rowid".to_string());
        }
        let snapshot = if columns.is_empty() {
            let count = self
                .exec
                .query(&format!("SELECT COUNT(*) FROM {}", quote_identifier(relation)?), &[])?;
            let rows = count.scalar().and_then(Value::as_integer).unwrap_or(0);
            vec![Vec::new(); usize::try_from(rows).unwrap_or(0)]
        } else {
            let quoted = columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let key = quote_identifier(&self.introspector.key_column(&mut self.exec, relation)?)?;
            self.exec
                .query(
                    &format!(
                        "SELECT {} FROM {} ORDER BY {key}",
                        quoted.join(", "),
                        quote_identifier(relation)?
                    ),
                    &[],
                )?
                .values
        };
        debug!(relation, rows = snapshot.len(), "snapshot taken for rebuild");

        self.exec.execute_batch("PRAGMA legacy_alter_table = ON")?;
        let renamed = rename_table_sql(relation, &temporary)
            .and_then(|sql| self.exec.execute(&sql, &[]));
        let restored = self.exec.execute_batch("PRAGMA legacy_alter_table = OFF");
        renamed?;
        restored?;
        self.introspector.invalidate(relation);
        self.introspector.invalidate(&temporary);
        debug!(relation, temporary = %temporary, "moved original rows aside");

        if let Err(err) = self.copy_into(target, &columns, &snapshot) {
            if self.exec.in_transaction() && !self.exec.is_closed() {
                if let Err(rollback) = self.exec.rollback() {
                    warn!(error = %rollback, "rollback after failed rebuild failed");
                }
            }
            self.introspector.invalidate(relation);
            self.lookups.clear();
            error!(relation, temporary = %temporary, error = %err, "rebuild failed");
            return Err(Error::SchemaRebuildFailure {
                relation: relation.to_string(),
                temporary,
                source: Box::new(err),
            });
        }

        self.exec.execute(&drop_table_sql(&temporary)?, &[])?;
        self.after_ddl(relation)?;
        info!(relation, rows = snapshot.len(), "rebuilt relation");
        Ok(())
    }

    fn copy_into(
        &mut self,
        target: &RelationSchema,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<()> {
        self.exec.begin()?;
        self.exec.execute(&create_table_sql(target)?, &[])?;
        let insert = insert_sql(&target.name, columns)?;
        for row in rows {
            self.exec.execute(&insert, row)?;
        }
        self.exec.commit()
    }

    fn require_relation(&mut self, relation: &str) -> Result<()> {
        if !self.introspector.has_relation(&mut self.exec, relation)? {
            return Err(Error::RelationNotFound(relation.to_string()));
        }
        Ok(())
    }

    /// Refreshes everything derived from the schema after DDL on `relation`.
    fn after_ddl(&mut self, relation: &str) -> Result<()> {
        self.invalidate(relation);
        if self.exec.capabilities().foreign_keys {
            self.refresh_catalogue()?;
            self.rebuild_usage()?;
        }
        Ok(())
    }
}
