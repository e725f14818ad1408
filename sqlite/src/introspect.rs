//! Live schema discovery with per-relation caching.
//!
//! [`Introspector`] derives relation and attribute metadata from the
//! engine catalogue through the [`Executor`]. Results are cached in
//! [`LfuCache`]s keyed by relation and must be invalidated whenever that
//! relation's DDL changes.

use std::collections::BTreeMap;

use relkit_core::{AttributeDef, DataType, ForeignLink, RelationSchema};
use tracing::debug;

use crate::cache::LfuCache;
use crate::error::{Error, Result};
use crate::execute::Executor;
use crate::schema::{ColumnDefault, parse_default};

/// Cached catalogue reader.
#[derive(Debug)]
pub struct Introspector {
    relations: Option<Vec<String>>,
    attributes: LfuCache<String, Vec<String>>,
    schemas: LfuCache<String, RelationSchema>,
}

impl Introspector {
    /// Creates an introspector whose caches hold `capacity` relations each.
    pub fn new(capacity: usize) -> Self {
        Self {
            relations: None,
            attributes: LfuCache::new(capacity),
            schemas: LfuCache::new(capacity),
        }
    }

    /// Names of all relations, sorted.
    pub fn relation_names(&mut self, exec: &mut Executor) -> Result<Vec<String>> {
        if let Some(names) = &self.relations {
            return Ok(names.clone());
        }
        let names = exec.relation_names()?;
        self.relations = Some(names.clone());
        Ok(names)
    }

    /// Returns `true` if `relation` exists.
    pub fn has_relation(&mut self, exec: &mut Executor, relation: &str) -> Result<bool> {
        Ok(self
            .relation_names(exec)?
            .iter()
            .any(|name| name == relation))
    }

    /// Attribute names of `relation` in column order, minus `exclude`.
    ///
    /// Works on every dialect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelationNotFound`] if the relation does not exist.
    pub fn attribute_names(
        &mut self,
        exec: &mut Executor,
        relation: &str,
        exclude: &[&str],
    ) -> Result<Vec<String>> {
        let names = match self.attributes.get(relation) {
            Some(names) => names.clone(),
            None => {
                let info = exec.table_info(relation)?;
                if info.is_empty() {
                    return Err(Error::RelationNotFound(relation.to_string()));
                }
                let names: Vec<String> = info.into_iter().map(|column| column.name).collect();
                self.attributes.insert(relation.to_string(), names.clone());
                names
            }
        };
        Ok(names
            .into_iter()
            .filter(|name| !exclude.contains(&name.as_str()))
            .collect())
    }

    /// Checks that `attribute` belongs to `relation`.
    pub fn require_attribute(
        &mut self,
        exec: &mut Executor,
        relation: &str,
        attribute: &str,
    ) -> Result<()> {
        if self
            .attribute_names(exec, relation, &[])?
            .iter()
            .any(|name| name == attribute)
        {
            Ok(())
        } else {
            Err(Error::attribute_not_found(relation, attribute))
        }
    }

    /// Full schema of `relation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelationNotFound`] for an unknown relation and
    /// [`Error::UnsupportedOperation`] when the driver cannot report keys.
    pub fn schema(&mut self, exec: &mut Executor, relation: &str) -> Result<RelationSchema> {
        if let Some(schema) = self.schemas.get(relation) {
            return Ok(schema.clone());
        }
        let capabilities = exec.capabilities();
        if !capabilities.primary_keys {
            return Err(Error::UnsupportedOperation(format!(
                "primary key catalogue for '{relation}'"
            )));
        }
        let info = exec.table_info(relation)?;
        if info.is_empty() {
            return Err(Error::RelationNotFound(relation.to_string()));
        }
        if !capabilities.foreign_keys {
            return Err(Error::UnsupportedOperation(format!(
                "foreign key catalogue for '{relation}'"
            )));
        }
        let foreign: BTreeMap<String, ForeignLink> = exec
            .foreign_key_list(relation)?
            .into_iter()
            .map(|fk| (fk.from, ForeignLink::new(fk.table, fk.to)))
            .collect();
        let unique: Vec<String> = exec
            .unique_indexes(relation)?
            .into_iter()
            .filter(|columns| columns.len() == 1)
            .flatten()
            .collect();
        let autoincrement = exec
            .create_sql(relation)?
            .is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT"));
        let key_columns = info
            .iter()
            .filter(|column| column.primary_key_position > 0)
            .count();

        let mut schema = RelationSchema::new(relation);
        for column in info {
            let primary = key_columns == 1 && column.primary_key_position == 1;
            let data_type = DataType::from_declared(&column.declared_type);
            let (default, default_expression) =
                match column.default_sql.as_deref().and_then(parse_default) {
                    Some(ColumnDefault::Literal(value)) => (Some(value), None),
                    Some(ColumnDefault::Expression(sql)) => (None, Some(sql)),
                    None => (None, None),
                };
            schema.attributes.push(AttributeDef {
                data_type,
                not_null: column.not_null,
                default,
                default_expression,
                unique: unique.contains(&column.name),
                primary,
                auto_increment: primary && autoincrement,
                foreign: foreign.get(&column.name).cloned(),
                name: column.name,
            });
        }
        debug!(relation, attributes = schema.attributes.len(), "introspected relation");
        self.schemas.insert(relation.to_string(), schema.clone());
        Ok(schema)
    }

    /// Table constraints of `relation` that [`RelationSchema`] cannot carry.
    ///
    /// Composite primary keys, multi-column unique indexes and `CHECK`
    /// clauses are each reported as one description. Not cached.
    pub fn unmodelled_constraints(
        &mut self,
        exec: &mut Executor,
        relation: &str,
    ) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut key: Vec<(u32, String)> = exec
            .table_info(relation)?
            .into_iter()
            .filter(|column| column.primary_key_position > 0)
            .map(|column| (column.primary_key_position, column.name))
            .collect();
        if key.len() > 1 {
            key.sort();
            let names: Vec<String> = key.into_iter().map(|(_, name)| name).collect();
            found.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }
        for columns in exec.unique_indexes(relation)? {
            if columns.len() > 1 {
                found.push(format!("UNIQUE ({})", columns.join(", ")));
            }
        }
        if exec.create_sql(relation)?.is_some_and(|sql| has_check_clause(&sql)) {
            found.push("CHECK".to_string());
        }
        Ok(found)
    }

    /// Primary key attribute of `relation`, if it declares one.
    pub fn primary_key(&mut self, exec: &mut Executor, relation: &str) -> Result<Option<String>> {
        if !exec.capabilities().primary_keys {
            return Err(Error::UnsupportedOperation(format!(
                "primary key catalogue for '{relation}'"
            )));
        }
        Ok(self
            .schema(exec, relation)?
            .primary_key()
            .map(str::to_string))
    }

    /// Column addressing a row: the primary key, else the engine row id.
    pub fn key_column(&mut self, exec: &mut Executor, relation: &str) -> Result<String> {
        Ok(self
            .primary_key(exec, relation)?
            .unwrap_or_else(|| "rowid".to_string()))
    }

    /// Foreign links of `relation`, keyed by domestic attribute.
    pub fn foreign_links(
        &mut self,
        exec: &mut Executor,
        relation: &str,
    ) -> Result<BTreeMap<String, ForeignLink>> {
        if !exec.capabilities().foreign_keys {
            return Err(Error::UnsupportedOperation(format!(
                "foreign key catalogue for '{relation}'"
            )));
        }
        Ok(self.schema(exec, relation)?.foreign_links())
    }

    /// Forgets everything cached for `relation`, and the relation list.
    pub fn invalidate(&mut self, relation: &str) {
        self.relations = None;
        self.attributes.remove(relation);
        self.schemas.remove(relation);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.relations = None;
        self.attributes.clear();
        self.schemas.clear();
    }
}

fn has_check_clause(create_sql: &str) -> bool {
    let upper = create_sql.to_ascii_uppercase();
    upper.match_indices("CHECK").any(|(at, _)| {
        let before = upper[..at].chars().next_back();
        let boundary = before.is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '"'));
        boundary && upper[at + "CHECK".len()..].trim_start().starts_with('(')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SqliteDriver;
    use relkit_config::RetryPolicy;
    use relkit_core::Value;

    fn setup() -> (Executor, Introspector) {
        let mut exec = Executor::new(
            Box::new(SqliteDriver::open_in_memory().unwrap()),
            RetryPolicy::none(),
        );
        exec.execute_batch(
            "CREATE TABLE Names (id INTEGER PRIMARY KEY AUTOINCREMENT, first_name TEXT UNIQUE);
             CREATE TABLE Users (id INTEGER PRIMARY KEY, name INTEGER, age INTEGER NOT NULL DEFAULT 0,
                 note TEXT DEFAULT 'n/a', FOREIGN KEY (name) REFERENCES Names(first_name));
             CREATE TABLE Log (message TEXT);",
        )
        .unwrap();
        (exec, Introspector::new(8))
    }

    #[test]
    fn test_schema_report() {
        let (mut exec, mut intro) = setup();
        let report = intro.schema(&mut exec, "Users").unwrap().report();
        assert_eq!(report.schema["age"], DataType::Integer);
        assert!(report.not_null["age"]);
        assert!(report.primary["id"]);
        assert!(!report.auto_increment["id"]);
        assert_eq!(report.default["age"], Value::Integer(0));
        assert_eq!(report.default["note"], Value::from("n/a"));
        assert_eq!(report.foreign["name"]["Names"], "first_name");

        let names = intro.schema(&mut exec, "Names").unwrap();
        assert!(names.attribute("id").unwrap().auto_increment);
        assert!(names.attribute("first_name").unwrap().unique);
    }

    #[test]
    fn test_attribute_names_with_exclusion() {
        let (mut exec, mut intro) = setup();
        assert_eq!(
            intro.attribute_names(&mut exec, "Users", &["id", "note"]).unwrap(),
            vec!["name", "age"]
        );
    }

    #[test]
    fn test_unknown_relation() {
        let (mut exec, mut intro) = setup();
        assert!(matches!(
            intro.schema(&mut exec, "Nobody"),
            Err(Error::RelationNotFound(_))
        ));
        assert!(matches!(
            intro.attribute_names(&mut exec, "Nobody", &[]),
            Err(Error::RelationNotFound(_))
        ));
        assert!(!exec.is_closed());
    }

    #[test]
    fn test_key_column_falls_back_to_rowid() {
        let (mut exec, mut intro) = setup();
        assert_eq!(intro.key_column(&mut exec, "Users").unwrap(), "id");
        assert_eq!(intro.key_column(&mut exec, "Log").unwrap(), "rowid");
    }

    #[test]
    fn test_cache_is_invalidated() {
        let (mut exec, mut intro) = setup();
        assert_eq!(intro.attribute_names(&mut exec, "Log", &[]).unwrap().len(), 1);
        exec.execute_batch("ALTER TABLE Log ADD COLUMN level INTEGER").unwrap();
        assert_eq!(intro.attribute_names(&mut exec, "Log", &[]).unwrap().len(), 1);
        intro.invalidate("Log");
        assert_eq!(intro.attribute_names(&mut exec, "Log", &[]).unwrap().len(), 2);
    }

    #[test]
    fn test_expression_default_is_not_a_literal() {
        let (mut exec, mut intro) = setup();
        exec.execute_batch("CREATE TABLE Stamps (id INTEGER PRIMARY KEY, at TEXT DEFAULT CURRENT_TIMESTAMP)")
            .unwrap();
        let at = intro.schema(&mut exec, "Stamps").unwrap().attribute("at").cloned().unwrap();
        assert_eq!(at.default, None);
        assert_eq!(at.default_expression.as_deref(), Some("CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_unmodelled_constraints() {
        let (mut exec, mut intro) = setup();
        exec.execute_batch(
            "CREATE TABLE Pairs (a TEXT, b TEXT, c INTEGER CHECK (c > 0), PRIMARY KEY (b, a));
             CREATE TABLE Slots (id INTEGER PRIMARY KEY, a TEXT, b TEXT, UNIQUE (a, b));
             CREATE TABLE Checked (id INTEGER PRIMARY KEY, \"check\" TEXT);",
        )
        .unwrap();
        assert_eq!(
            intro.unmodelled_constraints(&mut exec, "Pairs").unwrap(),
            vec!["PRIMARY KEY (b, a)".to_string(), "CHECK".to_string()]
        );
        assert_eq!(
            intro.unmodelled_constraints(&mut exec, "Slots").unwrap(),
            vec!["UNIQUE (a, b)".to_string()]
        );
        assert!(intro.unmodelled_constraints(&mut exec, "Checked").unwrap().is_empty());
        assert!(intro.unmodelled_constraints(&mut exec, "Users").unwrap().is_empty());
        assert!(!intro.schema(&mut exec, "Slots").unwrap().attribute("a").unwrap().unique);
    }
}
