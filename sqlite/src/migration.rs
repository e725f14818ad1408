//! Schema comparison and revision bookkeeping.
//!
//! [`Database::compare_schema`] diffs the live database against a target
//! list of relations. The differences can be stored as a [`Revision`]
//! (JSON or YAML) and applied later with [`Database::apply_revision`],
//! which records every applied revision in the `relkit_revisions` table
//! and skips revisions it has already applied.
//!
//! # Example
//!
//! ```
//! use relkit_core::{AttributeDef, DataType, RelationSchema};
//! use relkit_sqlite::{Database, Revision};
//!
//! let db = Database::open_in_memory().unwrap();
//! let target = vec![
//!     RelationSchema::new("Users")
//!         .with_attribute(AttributeDef::primary_key("id"))
//!         .with_attribute(AttributeDef::new("age", DataType::Integer)),
//! ];
//!
//! let revision = Revision::from_differences("0001", "users", db.compare_schema(&target).unwrap());
//! assert!(db.apply_revision(&revision).unwrap());
//! assert!(!db.apply_revision(&revision).unwrap());
//! assert!(db.compare_schema(&target).unwrap().is_empty());
//! ```

use relkit_core::{AttributeDef, DataType, DateFields, RelationSchema, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::error::Result;
use crate::query::CreateOptions;
use crate::schema::REBUILD_SUFFIX;
use crate::session::Session;

/// Relation recording applied revisions.
pub const REVISIONS_TABLE: &str = "relkit_revisions";

/// One step between the live schema and a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaDifference {
    /// The target has a relation the database lacks.
    AddRelation {
        /// Relation to create.
        schema: RelationSchema,
    },
    /// The database has a relation the target lacks.
    DropRelation {
        /// Relation to drop.
        relation: String,
    },
    /// The target has an attribute the relation lacks.
    AddAttribute {
        /// Relation to change.
        relation: String,
        /// Attribute to add.
        attribute: AttributeDef,
    },
    /// The relation has an attribute the target lacks.
    RemoveAttribute {
        /// Relation to change.
        relation: String,
        /// Attribute to remove.
        attribute: String,
    },
    /// An attribute exists on both sides with different definitions.
    AlterAttribute {
        /// Relation to change.
        relation: String,
        /// Live definition.
        from: AttributeDef,
        /// Target definition.
        to: AttributeDef,
    },
}

impl SchemaDifference {
    /// Relation the step applies to.
    pub fn relation(&self) -> &str {
        match self {
            SchemaDifference::AddRelation { schema } => &schema.name,
            SchemaDifference::DropRelation { relation }
            | SchemaDifference::AddAttribute { relation, .. }
            | SchemaDifference::RemoveAttribute { relation, .. }
            | SchemaDifference::AlterAttribute { relation, .. } => relation,
        }
    }
}

/// A named, ordered list of schema steps.
///
/// # Examples
///
/// ```
/// use relkit_sqlite::{Revision, SchemaDifference};
///
/// let revision = Revision::new("0002", "drop logs")
///     .with_step(SchemaDifference::DropRelation { relation: "Logs".into() });
///
/// let yaml = revision.to_yaml().unwrap();
/// assert!(yaml.contains("op: drop_relation"));
/// assert_eq!(Revision::from_yaml(&yaml).unwrap(), revision);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Unique revision id.
    pub id: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Steps in application order.
    #[serde(default)]
    pub steps: Vec<SchemaDifference>,
}

impl Revision {
    /// Revision with no steps.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Revision applying `differences` in order.
    pub fn from_differences(
        id: impl Into<String>,
        description: impl Into<String>,
        differences: Vec<SchemaDifference>,
    ) -> Self {
        Self {
            steps: differences,
            ..Self::new(id, description)
        }
    }

    /// Appends a step (builder style).
    pub fn with_step(mut self, step: SchemaDifference) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns `true` if the revision changes nothing.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Serializes as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parses YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

/// One row of the revision table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRevision {
    /// Revision id.
    pub id: String,
    /// Description recorded with it.
    pub description: String,
    /// Local time it was applied.
    pub applied_on: String,
}

/// Applied revisions, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Most recently applied revision id.
    pub current: Option<String>,
    /// Every applied revision.
    pub applied: Vec<AppliedRevision>,
}

fn revisions_schema() -> RelationSchema {
    RelationSchema::new(REVISIONS_TABLE)
        .with_attribute(AttributeDef {
            primary: true,
            ..AttributeDef::new("id", DataType::Text)
        })
        .with_attribute(AttributeDef::new("description", DataType::Text))
        .with_attribute(AttributeDef::new("applied_on", DataType::DateTime).not_null())
}

fn is_managed(relation: &str) -> bool {
    relation != REVISIONS_TABLE && !relation.ends_with(REBUILD_SUFFIX)
}

impl Session {
    fn compare_schema(&mut self, target: &[RelationSchema]) -> Result<Vec<SchemaDifference>> {
        let live: Vec<String> = self
            .introspector
            .relation_names(&mut self.exec)?
            .into_iter()
            .filter(|r| is_managed(r))
            .collect();
        let mut differences = Vec::new();
        for wanted in target {
            wanted.validate()?;
            if !live.contains(&wanted.name) {
                differences.push(SchemaDifference::AddRelation {
                    schema: wanted.clone(),
                });
                continue;
            }
            let current = self.introspector.schema(&mut self.exec, &wanted.name)?;
            for attribute in &wanted.attributes {
                match current.attribute(&attribute.name) {
                    None => differences.push(SchemaDifference::AddAttribute {
                        relation: wanted.name.clone(),
                        attribute: attribute.clone(),
                    }),
                    Some(existing) if existing.differs_from(attribute) => {
                        differences.push(SchemaDifference::AlterAttribute {
                            relation: wanted.name.clone(),
                            from: existing.clone(),
                            to: attribute.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
            for attribute in &current.attributes {
                if wanted.attribute(&attribute.name).is_none() {
                    differences.push(SchemaDifference::RemoveAttribute {
                        relation: wanted.name.clone(),
                        attribute: attribute.name.clone(),
                    });
                }
            }
        }
        for relation in live {
            if !target.iter().any(|t| t.name == relation) {
                differences.push(SchemaDifference::DropRelation { relation });
            }
        }
        debug!(differences = differences.len(), "compared schema");
        Ok(differences)
    }

    fn apply_step(&mut self, step: &SchemaDifference) -> Result<()> {
        match step {
            SchemaDifference::AddRelation { schema } => {
                self.create_relation(schema, CreateOptions::default())?;
            }
            SchemaDifference::DropRelation { relation } => {
                if self.introspector.has_relation(&mut self.exec, relation)? {
                    self.drop_relation(relation)?;
                }
            }
            SchemaDifference::AddAttribute {
                relation,
                attribute,
            } => self.add_attribute(relation, attribute)?,
            SchemaDifference::RemoveAttribute {
                relation,
                attribute,
            } => self.remove_attribute(relation, attribute)?,
            SchemaDifference::AlterAttribute { relation, from, to } => {
                let remove: Vec<&str> = if from.name == to.name {
                    Vec::new()
                } else {
                    vec![from.name.as_str()]
                };
                self.set_schema(relation, std::slice::from_ref(to), &remove)?;
            }
        }
        Ok(())
    }

    fn applied_revisions(&mut self) -> Result<Vec<AppliedRevision>> {
        if !self.introspector.has_relation(&mut self.exec, REVISIONS_TABLE)? {
            return Ok(Vec::new());
        }
        let rows = self.exec.query(
            &format!("SELECT id, description, applied_on FROM {REVISIONS_TABLE} ORDER BY rowid"),
            &[],
        )?;
        let text = |value: &Value| value.as_text().unwrap_or_default().to_string();
        Ok(rows
            .values
            .iter()
            .map(|row| AppliedRevision {
                id: text(&row[0]),
                description: text(&row[1]),
                applied_on: text(&row[2]),
            })
            .collect())
    }

    fn apply_revision(&mut self, revision: &Revision) -> Result<bool> {
        self.ensure_writable()?;
        if self
            .applied_revisions()?
            .iter()
            .any(|applied| applied.id == revision.id)
        {
            info!(revision = %revision.id, "revision already applied");
            return Ok(false);
        }
        self.create_relation(&revisions_schema(), CreateOptions::default())?;
        for step in &revision.steps {
            debug!(revision = %revision.id, relation = step.relation(), "applying step");
            self.apply_step(step)?;
        }
        self.write(|s| {
            s.exec.execute(
                &format!("INSERT INTO {REVISIONS_TABLE} (id, description, applied_on) VALUES (?, ?, ?)"),
                &[
                    Value::from(revision.id.as_str()),
                    Value::from(revision.description.as_str()),
                    DateFields::stamp(),
                ],
            )
        })?;
        info!(revision = %revision.id, steps = revision.steps.len(), "applied revision");
        Ok(true)
    }
}

impl Database {
    /// Differences that turn the live schema into `target`.
    ///
    /// The revision table and leftover rebuild tables are ignored.
    pub fn compare_schema(&self, target: &[RelationSchema]) -> Result<Vec<SchemaDifference>> {
        self.with_session(|session| session.compare_schema(target))
    }

    /// Applies `revision` unless it was applied before; returns whether it
    /// ran.
    pub fn apply_revision(&self, revision: &Revision) -> Result<bool> {
        self.with_session(|session| session.apply_revision(revision))
    }

    /// Revisions applied so far.
    pub fn migration_status(&self) -> Result<MigrationStatus> {
        let applied = self.with_session(|session| session.applied_revisions())?;
        Ok(MigrationStatus {
            current: applied.last().map(|a| a.id.clone()),
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_json_round_trip() {
        let revision = Revision::new("0001", "users")
            .with_step(SchemaDifference::AddRelation {
                schema: RelationSchema::new("Users").with_attribute(AttributeDef::primary_key("id")),
            })
            .with_step(SchemaDifference::RemoveAttribute {
                relation: "Users".into(),
                attribute: "height".into(),
            });
        let json = revision.to_json().unwrap();
        assert!(json.contains("\"op\": \"add_relation\""));
        assert_eq!(Revision::from_json(&json).unwrap(), revision);
    }

    #[test]
    fn test_missing_fields_default() {
        let revision = Revision::from_yaml("id: '0003'\n").unwrap();
        assert!(revision.is_empty());
        assert_eq!(revision.description, "");
    }

    #[test]
    fn test_step_relation() {
        let step = SchemaDifference::AlterAttribute {
            relation: "Users".into(),
            from: AttributeDef::new("age", DataType::Integer),
            to: AttributeDef::new("age", DataType::Real),
        };
        assert_eq!(step.relation(), "Users");
    }

    #[test]
    fn test_revision_table_is_unmanaged() {
        assert!(!is_managed(REVISIONS_TABLE));
        assert!(!is_managed("Users__rebuild"));
        assert!(is_managed("Users"));
    }
}
