//! Reusable attribute groups composed into relation definitions.
//!
//! Many relations share the same bookkeeping columns: lookup tables carry a
//! label and sort order, user-maintained rows carry edit permissions, and
//! most rows carry creation/modification timestamps. Each concern is a
//! small struct; [`RelationDefinition`] embeds whichever groups a relation
//! needs and expands them into a [`RelationSchema`].
//!
//! # Example
//!
//! ```
//! use relkit_core::{AttributeDef, DataType, DateFields, RelationDefinition};
//!
//! let schema = RelationDefinition::new("Users")
//!     .with_dates(DateFields::default())
//!     .with_attribute(AttributeDef::new("age", DataType::Integer))
//!     .to_schema()
//!     .unwrap();
//!
//! assert_eq!(schema.primary_key(), Some("id"));
//! assert!(schema.attribute("created_on").is_some());
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::{AttributeDef, DataType, RelationSchema};
use crate::value::Value;

/// Timestamp format used by [`DateFields::stamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Columns for lookup ("choice") relations: a unique label and a sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceFields {
    /// Name of the unique label column.
    pub label: String,
    /// Name of the ordering column.
    pub sort_order: String,
}

impl Default for ChoiceFields {
    fn default() -> Self {
        Self {
            label: "label".to_string(),
            sort_order: "sort_order".to_string(),
        }
    }
}

impl ChoiceFields {
    /// Attribute definitions contributed by this group.
    pub fn attributes(&self) -> Vec<AttributeDef> {
        vec![
            AttributeDef::new(&self.label, DataType::Text).not_null().unique(),
            AttributeDef::new(&self.sort_order, DataType::Integer)
                .not_null()
                .with_default(0),
        ]
    }
}

/// Columns controlling whether end users may modify or delete a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditableFields {
    /// Name of the "may be edited" flag column.
    pub editable: String,
    /// Name of the "may be removed" flag column.
    pub removable: String,
}

impl Default for EditableFields {
    fn default() -> Self {
        Self {
            editable: "editable".to_string(),
            removable: "removable".to_string(),
        }
    }
}

impl EditableFields {
    /// Attribute definitions contributed by this group.
    pub fn attributes(&self) -> Vec<AttributeDef> {
        vec![
            AttributeDef::new(&self.editable, DataType::Boolean)
                .not_null()
                .with_default(true),
            AttributeDef::new(&self.removable, DataType::Boolean)
                .not_null()
                .with_default(true),
        ]
    }
}

/// Creation and last-modification timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateFields {
    /// Name of the creation timestamp column.
    pub created_on: String,
    /// Name of the modification timestamp column.
    pub last_modified: String,
}

impl Default for DateFields {
    fn default() -> Self {
        Self {
            created_on: "created_on".to_string(),
            last_modified: "last_modified".to_string(),
        }
    }
}

impl DateFields {
    /// Attribute definitions contributed by this group.
    pub fn attributes(&self) -> Vec<AttributeDef> {
        vec![
            AttributeDef::new(&self.created_on, DataType::DateTime),
            AttributeDef::new(&self.last_modified, DataType::DateTime),
        ]
    }

    /// Current local time as a storable value.
    pub fn stamp() -> Value {
        Value::Text(Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// Values to merge into a new row: both columns set to now.
    pub fn on_insert(&self) -> Vec<(String, Value)> {
        let now = Self::stamp();
        vec![
            (self.created_on.clone(), now.clone()),
            (self.last_modified.clone(), now),
        ]
    }

    /// Values to merge into an update: the modification column set to now.
    pub fn on_update(&self) -> Vec<(String, Value)> {
        vec![(self.last_modified.clone(), Self::stamp())]
    }
}

/// A relation assembled from a primary key, optional field groups, and
/// extra attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// Relation name.
    pub name: String,
    /// Primary key column; `None` creates a relation without one.
    pub primary_key: Option<String>,
    /// Lookup-table columns.
    pub choice: Option<ChoiceFields>,
    /// Edit-permission columns.
    pub editable: Option<EditableFields>,
    /// Timestamp columns.
    pub dates: Option<DateFields>,
    /// Relation-specific attributes, placed after the primary key.
    pub attributes: Vec<AttributeDef>,
}

impl RelationDefinition {
    /// Starts a definition with an auto-incrementing `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Some("id".to_string()),
            choice: None,
            editable: None,
            dates: None,
            attributes: Vec::new(),
        }
    }

    /// Renames or removes the primary key.
    pub fn with_primary_key(mut self, name: Option<&str>) -> Self {
        self.primary_key = name.map(str::to_string);
        self
    }

    /// Embeds the lookup-table group.
    pub fn with_choice(mut self, fields: ChoiceFields) -> Self {
        self.choice = Some(fields);
        self
    }

    /// Embeds the edit-permission group.
    pub fn with_editable(mut self, fields: EditableFields) -> Self {
        self.editable = Some(fields);
        self
    }

    /// Embeds the timestamp group.
    pub fn with_dates(mut self, fields: DateFields) -> Self {
        self.dates = Some(fields);
        self
    }

    /// Appends a relation-specific attribute.
    pub fn with_attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Expands the definition into a validated [`RelationSchema`].
    ///
    /// Column order: primary key, own attributes, then choice, editable and
    /// date groups.
    pub fn to_schema(&self) -> Result<RelationSchema> {
        let mut schema = RelationSchema::new(&self.name);
        if let Some(primary) = &self.primary_key {
            schema.attributes.push(AttributeDef::primary_key(primary));
        }
        schema.attributes.extend(self.attributes.iter().cloned());
        if let Some(choice) = &self.choice {
            schema.attributes.extend(choice.attributes());
        }
        if let Some(editable) = &self.editable {
            schema.attributes.extend(editable.attributes());
        }
        if let Some(dates) = &self.dates {
            schema.attributes.extend(dates.attributes());
        }
        schema.validate()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn test_choice_relation() {
        let schema = RelationDefinition::new("Colors")
            .with_choice(ChoiceFields::default())
            .to_schema()
            .unwrap();
        assert_eq!(schema.attribute_names(), vec!["id", "label", "sort_order"]);
        assert!(schema.attribute("label").unwrap().unique);
    }

    #[test]
    fn test_all_groups_compose() {
        let schema = RelationDefinition::new("Tasks")
            .with_attribute(AttributeDef::new("title", DataType::Text))
            .with_choice(ChoiceFields::default())
            .with_editable(EditableFields::default())
            .with_dates(DateFields::default())
            .to_schema()
            .unwrap();
        assert_eq!(
            schema.attribute_names(),
            vec![
                "id",
                "title",
                "label",
                "sort_order",
                "editable",
                "removable",
                "created_on",
                "last_modified"
            ]
        );
    }

    #[test]
    fn test_group_column_collision_is_rejected() {
        let result = RelationDefinition::new("Tasks")
            .with_attribute(AttributeDef::new("label", DataType::Text))
            .with_choice(ChoiceFields::default())
            .to_schema();
        assert!(matches!(result, Err(CoreError::DuplicateAttribute { .. })));
    }

    #[test]
    fn test_without_primary_key() {
        let schema = RelationDefinition::new("Log")
            .with_primary_key(None)
            .with_attribute(AttributeDef::new("line", DataType::Text))
            .to_schema()
            .unwrap();
        assert_eq!(schema.primary_key(), None);
    }

    #[test]
    fn test_stamp_format() {
        let stamp = DateFields::stamp();
        let text = stamp.as_text().unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).is_ok());
    }
}
